use crate::error::Result;
use crate::model::TargetName;
use crate::store::{TargetStore, scan_all_names};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::info;

/// Every name known to this run: the store's contents at startup plus each
/// name admitted since. Only grows.
#[derive(Debug, Default)]
pub struct SeenSet {
    names: Mutex<HashSet<TargetName>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bootstrap(store: &dyn TargetStore) -> Result<Self> {
        info!("Loading existing targets from the store...");
        let names = scan_all_names(store).await?;
        let seen = Self {
            names: Mutex::new(names.into_iter().collect()),
        };
        info!("Loaded {} existing targets", seen.len().await);
        Ok(seen)
    }

    /// Insert under one lock; true if the name was not already present.
    pub async fn insert_if_new(&self, name: &TargetName) -> bool {
        self.names.lock().await.insert(name.clone())
    }

    pub async fn contains(&self, name: &TargetName) -> bool {
        self.names.lock().await.contains(name)
    }

    pub async fn len(&self) -> usize {
        self.names.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.names.lock().await.is_empty()
    }
}
