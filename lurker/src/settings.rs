use config::{Config, ConfigError, Environment, File};
use lurker_core::discovery::DiscoveryConfig;
use lurker_core::scheduler::SchedulerConfig;
use lurker_scanner::{FetchConfig, RetryTiming};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "LURKER";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    pub provisioning: ProvisioningSettings,
    pub fetch: FetchSettings,
    pub pool: PoolSettings,
    pub scheduler: SchedulerSettings,
    pub discovery: DiscoverySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// SQLite file; `~` is expanded.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningSettings {
    pub api_url: String,
    pub profile_ids: Vec<String>,
    /// Host the provisioned debug ports listen on, if not the API host.
    pub session_host: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub block_cooldown_secs: u64,
    pub timeout_cooldown_secs: u64,
    pub error_delay_secs: u64,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub rotation_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    pub acquire_timeout_secs: u64,
    pub health_interval_secs: u64,
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    pub batch_size: usize,
    pub task_timeout_secs: u64,
    pub page_timeout_secs: u64,
    /// Page loads per target before a block or timeout is reported.
    pub page_attempts: u32,
    pub batch_delay_secs: u64,
    pub idle_delay_secs: u64,
    pub retry_threshold: u32,
    pub precheck: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySettings {
    pub enabled: bool,
    pub seeds_per_pass: usize,
    pub authors_per_seed: usize,
    pub min_subscribers: u64,
    pub candidate_delay_ms: u64,
    pub seed_delay_ms: u64,
    pub idle_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub directory: String,
    pub file_prefix: String,
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: Option<String>,
}

impl Settings {
    /// Defaults, then `lurker.toml` in the working directory (or `path` if
    /// given, which must exist), then `LURKER__SECTION__KEY` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("lurker").required(false),
        };

        Self::defaults()?
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("provisioning.profile_ids"),
            )
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("store.path", "~/.config/lurker/lurker.db")?
            .set_default("provisioning.api_url", "http://local.adspower.net:50325")?
            .set_default("provisioning.profile_ids", Vec::<String>::new())?
            .set_default("fetch.base_url", "https://www.reddit.com")?
            .set_default("fetch.timeout_secs", 15)?
            .set_default("fetch.max_retries", 5)?
            .set_default("fetch.backoff_base_ms", 1000)?
            .set_default("fetch.block_cooldown_secs", 5)?
            .set_default("fetch.timeout_cooldown_secs", 3)?
            .set_default("fetch.error_delay_secs", 2)?
            .set_default("fetch.user_agent", FetchConfig::default().user_agent)?
            .set_default("pool.acquire_timeout_secs", 60)?
            .set_default("pool.health_interval_secs", 60)?
            .set_default("pool.probe_timeout_secs", 3)?
            .set_default("scheduler.batch_size", 6)?
            .set_default("scheduler.task_timeout_secs", 180)?
            .set_default("scheduler.page_timeout_secs", 60)?
            .set_default("scheduler.page_attempts", 3)?
            .set_default("scheduler.batch_delay_secs", 2)?
            .set_default("scheduler.idle_delay_secs", 60)?
            .set_default("scheduler.retry_threshold", 3)?
            .set_default("scheduler.precheck", true)?
            .set_default("discovery.enabled", true)?
            .set_default("discovery.seeds_per_pass", 10)?
            .set_default("discovery.authors_per_seed", 5)?
            .set_default("discovery.min_subscribers", 5000)?
            .set_default("discovery.candidate_delay_ms", 500)?
            .set_default("discovery.seed_delay_ms", 1000)?
            .set_default("discovery.idle_delay_secs", 60)?
            .set_default("logging.directory", "~/.config/lurker/logs")?
            .set_default("logging.file_prefix", "lurker.log")
    }

    pub fn database_path(&self) -> PathBuf {
        expand(&self.store.path)
    }

    pub fn log_directory(&self) -> PathBuf {
        expand(&self.logging.directory)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        let fetch = &self.fetch;
        FetchConfig {
            timeout: Duration::from_secs(fetch.timeout_secs),
            max_retries: fetch.max_retries,
            timing: RetryTiming {
                backoff_base: Duration::from_millis(fetch.backoff_base_ms),
                block_cooldown: Duration::from_secs(fetch.block_cooldown_secs),
                timeout_cooldown: Duration::from_secs(fetch.timeout_cooldown_secs),
                error_delay: Duration::from_secs(fetch.error_delay_secs),
            },
            proxy: fetch.proxy.clone(),
            user_agent: fetch.user_agent.clone(),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.scheduler.batch_size.max(1),
            task_timeout: Duration::from_secs(self.scheduler.task_timeout_secs),
            acquire_timeout: Duration::from_secs(self.pool.acquire_timeout_secs),
            batch_delay: Duration::from_secs(self.scheduler.batch_delay_secs),
            idle_delay: Duration::from_secs(self.scheduler.idle_delay_secs),
            min_subscribers: self.discovery.min_subscribers,
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            base_url: self.fetch.base_url.clone(),
            seeds_per_pass: self.discovery.seeds_per_pass,
            authors_per_seed: self.discovery.authors_per_seed,
            min_subscribers: self.discovery.min_subscribers,
            candidate_delay: Duration::from_millis(self.discovery.candidate_delay_ms),
            seed_delay: Duration::from_millis(self.discovery.seed_delay_ms),
            idle_delay: Duration::from_secs(self.discovery.idle_delay_secs),
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
