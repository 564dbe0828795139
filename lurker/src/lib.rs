pub mod commands;
pub mod settings;
pub mod telemetry;

pub use commands::{CliOptions, command_argument_builder};
pub use settings::Settings;

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

pub fn print_banner() {
    println!(
        r#"
  _            _
 | |_  _ _ _ _| |_____ _ _
 | | || | '_| / / -_) '_|
 |_|\_,_|_| |_\_\___|_|    v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
