use crate::CLAP_STYLING;
use clap::{ArgMatches, arg};
use std::path::PathBuf;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("lurker")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("lurker")
        .styles(CLAP_STYLING)
        .about("Discovers communities and keeps their weekly metrics up to date")
        .arg(arg!(-q --"quiet" "Suppress the startup banner").required(false))
        .arg(
            arg!(-c --"config" <PATH>)
                .required(false)
                .help("Settings file to load instead of ./lurker.toml"),
        )
        .arg(
            arg!(--"database" <PATH>)
                .required(false)
                .help("SQLite database location (overrides store.path)"),
        )
        .arg(
            arg!(--"log-dir" <DIR>)
                .required(false)
                .help("Directory for the rotating log file (overrides logging.directory)"),
        )
        .arg(
            arg!(--"no-discovery")
                .required(false)
                .help("Only scrape the existing queue; do not walk for new targets"),
        )
}

/// Command-line overrides, applied on top of the loaded settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub database: Option<String>,
    pub log_dir: Option<String>,
    pub no_discovery: bool,
}

impl CliOptions {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            quiet: matches.get_flag("quiet"),
            config: matches.get_one::<String>("config").map(PathBuf::from),
            database: matches.get_one::<String>("database").cloned(),
            log_dir: matches.get_one::<String>("log-dir").cloned(),
            no_discovery: matches.get_flag("no-discovery"),
        }
    }

    pub fn apply(&self, settings: &mut crate::settings::Settings) {
        if let Some(database) = &self.database {
            settings.store.path = database.clone();
        }
        if let Some(log_dir) = &self.log_dir {
            settings.logging.directory = log_dir.clone();
        }
        if self.no_discovery {
            settings.discovery.enabled = false;
        }
    }
}
