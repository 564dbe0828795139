use crate::error::{Result, ScanError};
use crate::provision::Provisioner;
use crate::session::{RemoteSession, Session};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

const PLACEHOLDER_PREFIX: &str = "PROFILE_";
const STARTUP_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A leased remote session bound to one provisioning profile.
pub struct ExecutionHandle {
    id: String,
    session: Arc<dyn Session>,
    live: AtomicBool,
    last_health_check: StdMutex<Option<DateTime<Utc>>>,
}

impl ExecutionHandle {
    pub fn new(id: impl Into<String>, session: Arc<dyn Session>) -> Self {
        Self {
            id: id.into(),
            session,
            live: AtomicBool::new(true),
            last_health_check: StdMutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed) && self.session.is_connected()
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn record_health_check(&self, at: DateTime<Utc>) {
        *lock(&self.last_health_check) = Some(at);
    }

    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_health_check)
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub acquired: u64,
    pub released: u64,
}

#[derive(Debug)]
struct PoolInner {
    handles: Vec<Arc<ExecutionHandle>>,
    idle: StdMutex<VecDeque<Arc<ExecutionHandle>>>,
    // One permit per idle handle; a permit is only returned after its
    // handle is back on the idle list.
    permits: Arc<Semaphore>,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Fixed-size pool of execution handles with checkout/return semantics.
#[derive(Debug, Clone)]
pub struct HandlePool {
    inner: Arc<PoolInner>,
}

impl HandlePool {
    pub fn new(handles: Vec<ExecutionHandle>) -> Self {
        let handles: Vec<Arc<ExecutionHandle>> = handles.into_iter().map(Arc::new).collect();
        let idle = handles.iter().cloned().collect::<VecDeque<_>>();

        Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(handles.len())),
                idle: StdMutex::new(idle),
                handles,
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Start every profile and keep the ones whose session answers a probe.
    ///
    /// Individual failures are logged and skipped; only an empty pool is an
    /// error.
    pub async fn provision(provisioner: &dyn Provisioner, profile_ids: &[String]) -> Result<Self> {
        info!("Initializing {} execution handles", profile_ids.len());
        let mut handles = Vec::new();

        for profile_id in profile_ids {
            if profile_id.starts_with(PLACEHOLDER_PREFIX) {
                warn!("Skipping placeholder profile: {}", profile_id);
                continue;
            }

            match Self::start_handle(provisioner, profile_id).await {
                Ok(handle) => {
                    info!("[OK] Handle {} ready", profile_id);
                    handles.push(handle);
                }
                Err(e) => {
                    error!("Error initializing handle {}: {}", profile_id, e);
                }
            }
        }

        info!("Initialized {}/{} handles", handles.len(), profile_ids.len());
        if handles.is_empty() {
            return Err(ScanError::NoHandles);
        }
        Ok(Self::new(handles))
    }

    async fn start_handle(provisioner: &dyn Provisioner, profile_id: &str) -> Result<ExecutionHandle> {
        let endpoint = provisioner.start(profile_id).await?;
        let session = RemoteSession::new(&endpoint.http_endpoint(provisioner.session_host()))?;

        let probe = tokio::time::timeout(STARTUP_PROBE_TIMEOUT, session.probe()).await;
        match probe {
            Ok(Ok(())) => Ok(ExecutionHandle::new(profile_id, Arc::new(session))),
            Ok(Err(e)) => {
                let _ = provisioner.stop(profile_id).await;
                Err(e)
            }
            Err(_) => {
                let _ = provisioner.stop(profile_id).await;
                Err(ScanError::Provisioning {
                    profile: profile_id.to_string(),
                    message: "session did not answer startup probe".to_string(),
                })
            }
        }
    }

    /// Wait up to `timeout` for a free handle.
    ///
    /// The returned guard puts the handle back when dropped, so a task that
    /// errors, panics or is cancelled still releases it.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledHandle> {
        let permit = match tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ScanError::Other("handle pool closed".to_string())),
            Err(_) => return Err(ScanError::PoolTimeout(timeout)),
        };

        let handle = lock(&self.inner.idle)
            .pop_front()
            .ok_or_else(|| ScanError::Other("permit granted with no idle handle".to_string()))?;

        self.inner.acquired.fetch_add(1, Ordering::Relaxed);
        debug!("Checked out handle {}", handle.id());

        Ok(PooledHandle {
            handle,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    pub fn handles(&self) -> &[Arc<ExecutionHandle>] {
        &self.inner.handles
    }

    pub fn size(&self) -> usize {
        self.inner.handles.len()
    }

    pub fn stats(&self) -> PoolStats {
        let idle = lock(&self.inner.idle).len();
        PoolStats {
            size: self.size(),
            idle,
            in_use: self.size() - idle,
            acquired: self.inner.acquired.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
        }
    }

    /// Drive `work` to completion, then stop every profile whatever it
    /// returned.
    pub async fn run_then_shutdown<F: Future>(&self, provisioner: &dyn Provisioner, work: F) -> F::Output {
        let output = work.await;
        self.shutdown(provisioner).await;
        output
    }

    /// Stop every provisioned profile. Errors are logged, never returned.
    pub async fn shutdown(&self, provisioner: &dyn Provisioner) {
        self.inner.permits.close();
        for handle in &self.inner.handles {
            match provisioner.stop(handle.id()).await {
                Ok(true) => info!("Closed handle {}", handle.id()),
                Ok(false) => warn!("Profile {} did not confirm stop", handle.id()),
                Err(e) => error!("Error closing handle {}: {}", handle.id(), e),
            }
        }
    }
}

/// A checked-out handle. Dropping it returns the handle to the pool.
#[derive(Debug)]
pub struct PooledHandle {
    handle: Arc<ExecutionHandle>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledHandle {
    /// Explicit return; equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Deref for PooledHandle {
    type Target = ExecutionHandle;

    fn deref(&self) -> &ExecutionHandle {
        &self.handle
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        if !self.handle.is_live() {
            warn!("Returning non-live handle {} to the pool", self.handle.id());
        }
        debug!("Returned handle {}", self.handle.id());
        lock(&self.pool.idle).push_back(self.handle.clone());
        self.pool.released.fetch_add(1, Ordering::Relaxed);
        // `_permit` is dropped after this body, once the handle is idle again.
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::{ProfileState, ProvisionedEndpoint};
    use crate::result::PageLoad;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    struct StubSession;

    #[async_trait]
    impl Session for StubSession {
        async fn load(&self, url: &str, _timeout: Duration) -> Result<PageLoad> {
            Ok(PageLoad::new(url.to_string(), 200, String::new()))
        }

        async fn probe(&self) -> Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn stub_pool(size: usize) -> HandlePool {
        HandlePool::new(
            (0..size)
                .map(|i| ExecutionHandle::new(format!("profile-{}", i), Arc::new(StubSession)))
                .collect(),
        )
    }

    /// Starts every profile on the same debug port, except `bad-*` ones.
    struct FakeProvisioner {
        port: u16,
        stopped: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Provisioner for FakeProvisioner {
        async fn start(&self, profile_id: &str) -> Result<ProvisionedEndpoint> {
            if profile_id.starts_with("bad") {
                return Err(ScanError::Provisioning {
                    profile: profile_id.to_string(),
                    message: "refused".to_string(),
                });
            }
            Ok(ProvisionedEndpoint {
                profile_id: profile_id.to_string(),
                ws_endpoint: None,
                debug_port: self.port,
            })
        }

        async fn stop(&self, profile_id: &str) -> Result<bool> {
            self.stopped.lock().unwrap().push(profile_id.to_string());
            Ok(true)
        }

        async fn status(&self, _profile_id: &str) -> Result<ProfileState> {
            Ok(ProfileState::Active)
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release_are_paired() {
        let pool = stub_pool(2);

        let a = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let b = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().in_use, 2);

        a.release();
        drop(b);

        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 2);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = stub_pool(1);
        let _held = pool.acquire(Duration::from_millis(50)).await.unwrap();

        let err = pool.acquire(Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, ScanError::PoolTimeout(_)));
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_waiter_gets_handle_after_release() {
        let pool = stub_pool(1);
        let held = pool.acquire(Duration::from_millis(50)).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let handle = pool.acquire(Duration::from_secs(2)).await.unwrap();
                handle.id().to_string()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap(), "profile-0");
    }

    #[tokio::test]
    async fn test_cancelled_holder_still_releases() {
        let pool = stub_pool(1);

        let cancelled = tokio::time::timeout(Duration::from_millis(20), {
            let pool = pool.clone();
            async move {
                let _handle = pool.acquire(Duration::from_millis(50)).await.unwrap();
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        })
        .await;
        assert!(cancelled.is_err());

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.acquired, stats.released);
        assert!(pool.acquire(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_holder_still_releases() {
        let pool = stub_pool(1);

        let task = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _handle = pool.acquire(Duration::from_millis(50)).await.unwrap();
                panic!("scrape blew up");
            })
        };
        assert!(task.await.is_err());

        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.stats().released, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_handle_is_shared_and_concurrency_is_bounded() {
        let pool = stub_pool(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let held: Arc<StdMutex<HashSet<String>>> = Arc::new(StdMutex::new(HashSet::new()));

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let max_in_flight = max_in_flight.clone();
            let held = held.clone();
            tasks.push(tokio::spawn(async move {
                let handle = pool.acquire(Duration::from_secs(5)).await.unwrap();
                assert!(
                    held.lock().unwrap().insert(handle.id().to_string()),
                    "handle {} checked out twice",
                    handle.id()
                );
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);

                tokio::time::sleep(Duration::from_millis(10)).await;

                in_flight.fetch_sub(1, Ordering::SeqCst);
                held.lock().unwrap().remove(handle.id());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(max_in_flight.load(Ordering::SeqCst) <= 3);
        let stats = pool.stats();
        assert_eq!(stats.acquired, 12);
        assert_eq!(stats.released, 12);
    }

    #[tokio::test]
    async fn test_provision_skips_failures_and_placeholders() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/version"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&mock_server)
            .await;

        let provisioner = FakeProvisioner {
            port: mock_server.address().port(),
            stopped: StdMutex::new(Vec::new()),
        };
        let profiles = vec![
            "good-1".to_string(),
            "bad-1".to_string(),
            "PROFILE_3".to_string(),
            "good-2".to_string(),
        ];

        let pool = HandlePool::provision(&provisioner, &profiles).await.unwrap();
        let ids: Vec<&str> = pool.handles().iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec!["good-1", "good-2"]);

        pool.shutdown(&provisioner).await;
        assert_eq!(*provisioner.stopped.lock().unwrap(), vec!["good-1", "good-2"]);
    }

    #[tokio::test]
    async fn test_failed_work_still_stops_profiles() {
        let pool = stub_pool(2);
        let provisioner = FakeProvisioner {
            port: 9,
            stopped: StdMutex::new(Vec::new()),
        };

        let result: std::result::Result<(), &str> = pool
            .run_then_shutdown(&provisioner, async { Err("bootstrap failed") })
            .await;

        assert_eq!(result, Err("bootstrap failed"));
        assert_eq!(*provisioner.stopped.lock().unwrap(), vec!["profile-0", "profile-1"]);
        assert!(pool.acquire(Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test]
    async fn test_provision_with_no_handles_is_fatal() {
        let provisioner = FakeProvisioner {
            port: 9,
            stopped: StdMutex::new(Vec::new()),
        };
        let profiles = vec!["bad-1".to_string(), "bad-2".to_string()];

        let err = HandlePool::provision(&provisioner, &profiles).await.unwrap_err();
        assert!(matches!(err, ScanError::NoHandles));
    }

    #[tokio::test]
    async fn test_unreachable_session_is_excluded_and_stopped() {
        let provisioner = FakeProvisioner {
            port: 9,
            stopped: StdMutex::new(Vec::new()),
        };
        let profiles = vec!["good-1".to_string()];

        let err = HandlePool::provision(&provisioner, &profiles).await.unwrap_err();
        assert!(matches!(err, ScanError::NoHandles));
        assert_eq!(*provisioner.stopped.lock().unwrap(), vec!["good-1"]);
    }
}
