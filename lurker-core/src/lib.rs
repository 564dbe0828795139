pub mod classify;
pub mod discovery;
pub mod error;
pub mod model;
pub mod precheck;
pub mod scheduler;
pub mod scrape;
pub mod seen;
pub mod stats;
pub mod store;

pub use classify::{Classifier, Decision, ScrapeOutcome};
pub use discovery::{DiscoveryConfig, DiscoveryWalker};
pub use error::{CoreError, Result};
pub use model::{DiscoveryCandidate, Target, TargetName, TargetStatus};
pub use scheduler::{BatchScheduler, SchedulerConfig};
pub use seen::SeenSet;
pub use store::{SqliteStore, TargetStore};
