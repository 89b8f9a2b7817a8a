use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::registry::RegistryClient;
use crate::store::StateStore;
use crate::types::{TagRecord, WatchedRepository};

/// Outcome of scanning one repository.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub repository: String,
    /// Tags recorded for the first time by this scan.
    pub discovered: Vec<TagRecord>,
    /// Tags recorded earlier whose notification has not gone out yet.
    pub retry: Vec<TagRecord>,
    /// First scan of this repository: all current tags became the baseline.
    pub baselined: bool,
}

impl ScanResult {
    /// Everything the notifier should announce this tick, oldest first.
    pub fn to_notify(&self) -> impl Iterator<Item = &TagRecord> {
        self.retry.iter().chain(self.discovered.iter())
    }
}

/// Diffs the registry listing against the recorded tag set.
pub struct TagScanner<'a> {
    store: &'a StateStore,
    registry: &'a dyn RegistryClient,
}

impl<'a> TagScanner<'a> {
    pub fn new(store: &'a StateStore, registry: &'a dyn RegistryClient) -> Self {
        Self { store, registry }
    }

    /// Fetch, filter, diff and record.
    ///
    /// A registry failure returns before the store is touched. Filtered-out
    /// tags are neither recorded nor reported.
    pub fn scan(&self, watched: &WatchedRepository) -> Result<ScanResult> {
        let listed = self.registry.list_tags(&watched.path)?;
        let total = listed.len();
        let eligible: Vec<_> = listed
            .into_iter()
            .filter(|t| watched.filter.accepts(&t.name))
            .collect();

        let delta = self
            .store
            .record_scan(&watched.path, &eligible, Utc::now())?;

        if delta.baselined {
            tracing::info!(
                repository = %watched.path,
                "first scan: recorded {} existing tags as baseline",
                eligible.len()
            );
        } else {
            tracing::debug!(
                repository = %watched.path,
                listed = total,
                eligible = eligible.len(),
                discovered = delta.discovered.len(),
                retry = delta.retry.len(),
                "scanned"
            );
        }

        Ok(ScanResult {
            repository: watched.path.clone(),
            discovered: delta.discovered,
            retry: delta.retry,
            baselined: delta.baselined,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
