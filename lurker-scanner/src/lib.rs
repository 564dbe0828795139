pub mod error;
pub mod extract;
pub mod fetcher;
pub mod health;
pub mod listing;
pub mod pool;
pub mod provision;
pub mod result;
pub mod rotation;
pub mod session;

pub use error::ScanError;
pub use extract::PageMetrics;
pub use fetcher::{FetchConfig, Fetcher, RetryTiming};
pub use health::{HealthReport, HealthSweep};
pub use pool::{ExecutionHandle, HandlePool, PooledHandle};
pub use provision::{Provisioner, ProvisioningClient};
pub use result::{AttemptOutcome, FetchAttempt, PageLoad};
pub use rotation::IpRotator;
pub use session::{RemoteSession, Session};
