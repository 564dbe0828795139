use crate::classify::{Decision, definitive_annotation_pattern};
use crate::error::{CoreError, Result};
use crate::model::{DiscoveryCandidate, Target, TargetMetrics, TargetName, TargetStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Page size for full scans of the target table.
pub const SCAN_PAGE_SIZE: usize = 1000;

/// Durable queue of targets plus per-run bookkeeping.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Insert a newly discovered target. On conflict only the size metric
    /// is refreshed. Returns true if the name was new.
    async fn enqueue(&self, candidate: &DiscoveryCandidate) -> Result<bool>;

    /// Never-attempted targets first, then scheduled retries, each largest
    /// first and at least `min_subscribers`. Targets annotated as
    /// definitively unavailable are skipped.
    async fn fetch_pending(&self, limit: usize, min_subscribers: u64) -> Result<Vec<Target>>;

    /// Move a claimable target to `in_progress`. False if it was not claimable.
    async fn claim(&self, name: &TargetName) -> Result<bool>;

    async fn record(&self, decision: &Decision) -> Result<()>;

    /// Put one `in_progress` target back to `pending` without touching its
    /// counter. False if it was not in progress.
    async fn requeue(&self, name: &TargetName) -> Result<bool>;

    /// Put rows a previous run left `in_progress` back to `pending`.
    async fn requeue_stale(&self) -> Result<usize>;

    async fn get(&self, name: &TargetName) -> Result<Option<Target>>;

    /// Random targets that are not permanently failed, used as walk seeds.
    async fn sample_seeds(&self, limit: usize) -> Result<Vec<TargetName>>;

    async fn scan_names(&self, offset: usize, limit: usize) -> Result<Vec<TargetName>>;

    async fn status_counts(&self) -> Result<Vec<(TargetStatus, u64)>>;

    async fn start_run(&self) -> Result<String>;

    async fn finish_run(&self, run_id: &str, stats: &serde_json::Value) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection off the async workers.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut guard)
        })
        .await?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS targets (
            name TEXT PRIMARY KEY,
            subscribers INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN (
                'unqueued', 'pending', 'in_progress', 'completed',
                'retry_scheduled', 'permanently_failed'
            )),
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            last_attempt_at INTEGER,

            -- Scraped metrics
            weekly_visitors INTEGER,
            weekly_contributions INTEGER,
            competition_score REAL,

            -- Discovery metadata
            description TEXT,
            source TEXT,
            discovered_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_targets_status ON targets(status, subscribers DESC);

        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            stats TEXT              -- JSON counters
        );
        ",
    )?;
    Ok(())
}

const TARGET_COLUMNS: &str = "name, subscribers, status, retry_count, last_error, last_attempt_at,
     weekly_visitors, weekly_contributions, competition_score, description";

struct TargetRow {
    name: String,
    subscribers: i64,
    status: String,
    retry_count: i64,
    last_error: Option<String>,
    last_attempt_at: Option<i64>,
    weekly_visitors: Option<i64>,
    weekly_contributions: Option<i64>,
    competition_score: Option<f64>,
    description: Option<String>,
}

impl TargetRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            subscribers: row.get(1)?,
            status: row.get(2)?,
            retry_count: row.get(3)?,
            last_error: row.get(4)?,
            last_attempt_at: row.get(5)?,
            weekly_visitors: row.get(6)?,
            weekly_contributions: row.get(7)?,
            competition_score: row.get(8)?,
            description: row.get(9)?,
        })
    }

    fn into_target(self) -> Result<Target> {
        Ok(Target {
            name: TargetName::new(&self.name)?,
            subscribers: self.subscribers.max(0) as u64,
            status: self.status.parse()?,
            retry_count: self.retry_count.max(0) as u32,
            last_error: self.last_error,
            last_attempt_at: self
                .last_attempt_at
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
            metrics: TargetMetrics {
                weekly_visitors: self.weekly_visitors.map(|v| v.max(0) as u64),
                weekly_contributions: self.weekly_contributions.map(|v| v.max(0) as u64),
                competition_score: self.competition_score,
            },
            description: self.description,
        })
    }
}

fn query_targets(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Target>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, TargetRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(TargetRow::into_target).collect()
}

fn query_names(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<TargetName>> {
    let mut stmt = conn.prepare(sql)?;
    let names = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    names.iter().map(|n| TargetName::new(n)).collect()
}

#[async_trait]
impl TargetStore for SqliteStore {
    async fn enqueue(&self, candidate: &DiscoveryCandidate) -> Result<bool> {
        let candidate = candidate.clone();
        self.call(move |conn| {
            let timestamp = current_timestamp();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO targets (
                    name, subscribers, status, description, source, discovered_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    candidate.name.as_str(),
                    candidate.subscribers as i64,
                    TargetStatus::Pending.as_str(),
                    &candidate.description,
                    candidate.source.as_str(),
                    timestamp,
                    timestamp,
                ],
            )?;

            if inserted == 0 {
                conn.execute(
                    "UPDATE targets SET subscribers = ?1, updated_at = ?2 WHERE name = ?3",
                    params![candidate.subscribers as i64, timestamp, candidate.name.as_str()],
                )?;
            }
            Ok(inserted == 1)
        })
        .await
    }

    async fn fetch_pending(&self, limit: usize, min_subscribers: u64) -> Result<Vec<Target>> {
        self.call(move |conn| {
            let mut pending = query_targets(
                conn,
                &format!(
                    "SELECT {TARGET_COLUMNS} FROM targets
                     WHERE status = 'pending' AND last_attempt_at IS NULL AND subscribers >= ?1
                     ORDER BY subscribers DESC, name
                     LIMIT ?2"
                ),
                params![min_subscribers as i64, limit as i64],
            )?;

            if pending.len() < limit {
                let retries = query_targets(
                    conn,
                    &format!(
                        "SELECT {TARGET_COLUMNS} FROM targets
                         WHERE (status = 'retry_scheduled'
                                OR (status = 'pending' AND last_attempt_at IS NOT NULL))
                           AND (last_error IS NULL OR last_error NOT LIKE ?1)
                           AND subscribers >= ?2
                         ORDER BY subscribers DESC, name
                         LIMIT ?3"
                    ),
                    params![
                        definitive_annotation_pattern(),
                        min_subscribers as i64,
                        (limit - pending.len()) as i64
                    ],
                )?;
                pending.extend(retries);
            }

            debug!("Fetched {} pending targets", pending.len());
            Ok(pending)
        })
        .await
    }

    async fn claim(&self, name: &TargetName) -> Result<bool> {
        let name = name.clone();
        self.call(move |conn| {
            let timestamp = current_timestamp();
            let changed = conn.execute(
                "UPDATE targets SET status = ?1, last_attempt_at = ?2, updated_at = ?2
                 WHERE name = ?3 AND status IN ('pending', 'retry_scheduled')",
                params![TargetStatus::InProgress.as_str(), timestamp, name.as_str()],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn record(&self, decision: &Decision) -> Result<()> {
        let decision = decision.clone();
        self.call(move |conn| {
            let tx = conn.transaction()?;

            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM targets WHERE name = ?1",
                    params![decision.name.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let current: TargetStatus = current
                .ok_or_else(|| CoreError::InvalidTarget(decision.name.to_string()))?
                .parse()?;

            if !current.can_transition_to(decision.status) {
                return Err(CoreError::InvalidTransition {
                    name: decision.name.to_string(),
                    from: current.to_string(),
                    to: decision.status.to_string(),
                });
            }

            let metrics = decision.metrics.unwrap_or_default();
            tx.execute(
                "UPDATE targets SET
                    status = ?1,
                    retry_count = MAX(retry_count, ?2),
                    last_error = ?3,
                    weekly_visitors = COALESCE(?4, weekly_visitors),
                    weekly_contributions = COALESCE(?5, weekly_contributions),
                    competition_score = CASE WHEN ?6 THEN ?7 ELSE competition_score END,
                    updated_at = ?8
                 WHERE name = ?9",
                params![
                    decision.status.as_str(),
                    decision.retry_count as i64,
                    &decision.annotation,
                    metrics.weekly_visitors.map(|v| v as i64),
                    metrics.weekly_contributions.map(|v| v as i64),
                    decision.metrics.is_some(),
                    metrics.competition_score,
                    current_timestamp(),
                    decision.name.as_str(),
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn requeue(&self, name: &TargetName) -> Result<bool> {
        let name = name.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE targets SET status = 'pending', updated_at = ?1
                 WHERE name = ?2 AND status = 'in_progress'",
                params![current_timestamp(), name.as_str()],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn requeue_stale(&self) -> Result<usize> {
        self.call(|conn| {
            let changed = conn.execute(
                "UPDATE targets SET status = 'pending', updated_at = ?1 WHERE status = 'in_progress'",
                params![current_timestamp()],
            )?;
            Ok(changed)
        })
        .await
    }

    async fn get(&self, name: &TargetName) -> Result<Option<Target>> {
        let name = name.clone();
        self.call(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE name = ?1"),
                    params![name.as_str()],
                    TargetRow::from_row,
                )
                .optional()?;
            row.map(TargetRow::into_target).transpose()
        })
        .await
    }

    async fn sample_seeds(&self, limit: usize) -> Result<Vec<TargetName>> {
        self.call(move |conn| {
            query_names(
                conn,
                "SELECT name FROM targets WHERE status != 'permanently_failed'
                 ORDER BY RANDOM() LIMIT ?1",
                params![limit as i64],
            )
        })
        .await
    }

    async fn scan_names(&self, offset: usize, limit: usize) -> Result<Vec<TargetName>> {
        self.call(move |conn| {
            query_names(
                conn,
                "SELECT name FROM targets ORDER BY name LIMIT ?1 OFFSET ?2",
                params![limit as i64, offset as i64],
            )
        })
        .await
    }

    async fn status_counts(&self) -> Result<Vec<(TargetStatus, u64)>> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM targets GROUP BY status ORDER BY status")?;
            let counts = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            counts
                .into_iter()
                .map(|(status, count)| -> Result<(TargetStatus, u64)> {
                    Ok((status.parse()?, count.max(0) as u64))
                })
                .collect()
        })
        .await
    }

    async fn start_run(&self) -> Result<String> {
        self.call(|conn| {
            let run_id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO runs (id, started_at) VALUES (?1, ?2)",
                params![&run_id, current_timestamp()],
            )?;
            Ok(run_id)
        })
        .await
    }

    async fn finish_run(&self, run_id: &str, stats: &serde_json::Value) -> Result<()> {
        let run_id = run_id.to_string();
        let stats = serde_json::to_string(stats)?;
        self.call(move |conn| {
            conn.execute(
                "UPDATE runs SET finished_at = ?1, stats = ?2 WHERE id = ?3",
                params![current_timestamp(), stats, run_id],
            )?;
            Ok(())
        })
        .await
    }
}

/// Load every known name, one page at a time.
pub async fn scan_all_names(store: &dyn TargetStore) -> Result<Vec<TargetName>> {
    let mut names = Vec::new();
    let mut offset = 0;

    loop {
        let page = store.scan_names(offset, SCAN_PAGE_SIZE).await?;
        let fetched = page.len();
        names.extend(page);

        if fetched < SCAN_PAGE_SIZE {
            break;
        }
        offset += SCAN_PAGE_SIZE;
    }

    Ok(names)
}
