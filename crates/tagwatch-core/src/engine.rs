//! The assembled watcher: store, watch list and the three external
//! collaborators, driven one cycle at a time.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::action::ActionHandler;
use crate::config::Config;
use crate::deploy::{DeployTrigger, GiteaClient};
use crate::error::Result;
use crate::notifier::Notifier;
use crate::registry::{DockerHubClient, RegistryClient};
use crate::scanner::TagScanner;
use crate::store::StateStore;
use crate::telegram::TelegramBot;
use crate::transport::ChatTransport;
use crate::types::{DeployTarget, DeploymentOutcome, TagRecord, WatchedRepository};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryReport {
    pub repository: String,
    pub baselined: bool,
    /// Tags announced this cycle (new or retried).
    pub notified: Vec<String>,
    /// Tags whose announcement failed; retried next cycle.
    pub failed: Vec<String>,
    /// Set when the registry scan itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepositoryReport {
    fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            baselined: false,
            notified: Vec::new(),
            failed: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pruned_actions: u32,
    pub repositories: Vec<RepositoryReport>,
}

impl CycleReport {
    pub fn notified(&self) -> usize {
        self.repositories.iter().map(|r| r.notified.len()).sum()
    }

    pub fn failures(&self) -> usize {
        self.repositories
            .iter()
            .map(|r| r.failed.len() + usize::from(r.error.is_some()))
            .sum()
    }
}

/// A watched repository with everything recorded for it.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryOverview {
    pub repository: String,
    /// The deploy target with its credential removed.
    pub deploy: DeployTarget,
    pub scanned: bool,
    pub baselined_at: Option<DateTime<Utc>>,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub tags: Vec<TagRecord>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    store: StateStore,
    watched: Vec<WatchedRepository>,
    chat_id: i64,
    registry: Arc<dyn RegistryClient>,
    transport: Arc<dyn ChatTransport>,
    deploy: Arc<dyn DeployTrigger>,
    action_ttl: Duration,
    cycle_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        store: StateStore,
        watched: Vec<WatchedRepository>,
        chat_id: i64,
        registry: Arc<dyn RegistryClient>,
        transport: Arc<dyn ChatTransport>,
        deploy: Arc<dyn DeployTrigger>,
    ) -> Self {
        Self {
            store,
            watched,
            chat_id,
            registry,
            transport,
            deploy,
            action_ttl: Duration::from_secs(7 * 24 * 3600),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_action_ttl(mut self, ttl: Duration) -> Self {
        self.action_ttl = ttl;
        self
    }

    /// Wire the production adapters described by `config`.
    ///
    /// Builds blocking HTTP clients, so call it outside an async context.
    pub fn from_config(config: &Config, state_path: &Path) -> Result<Self> {
        let watched = config.watched_repositories()?;
        let timeout = config.http_timeout();
        let registry = DockerHubClient::new(
            &config.registry.base_url,
            config.registry.page_size,
            timeout,
        )?;
        let transport = TelegramBot::new(
            &config.telegram.api_url,
            &config.telegram.token,
            config.telegram.chat_id,
            timeout,
        )?;
        let deploy = GiteaClient::new(&config.ci.base_url, &config.ci.token, timeout)?;
        let store = StateStore::open(state_path)?;
        tracing::debug!(
            state = %state_path.display(),
            repositories = watched.len(),
            "engine ready"
        );
        Ok(Self::new(
            store,
            watched,
            config.telegram.chat_id,
            Arc::new(registry),
            Arc::new(transport),
            Arc::new(deploy),
        )
        .with_action_ttl(config.action_ttl()))
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn watched(&self) -> &[WatchedRepository] {
        &self.watched
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    pub fn action_ttl(&self) -> Duration {
        self.action_ttl
    }

    pub fn transport(&self) -> &dyn ChatTransport {
        self.transport.as_ref()
    }

    /// One scan+notify pass over every watched repository.
    ///
    /// Cycles never overlap: a caller arriving mid-cycle waits for it to end.
    /// A failing repository or tag is reported and skipped; the rest proceed.
    pub fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().unwrap_or_else(|e| e.into_inner());
        let started_at = Utc::now();

        let pruned_actions = match self.prune_actions() {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("failed to prune expired actions: {e}");
                0
            }
        };

        let repositories: Vec<RepositoryReport> =
            self.watched.iter().map(|w| self.cycle_one(w)).collect();

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            pruned_actions,
            repositories,
        };
        tracing::info!(
            repositories = report.repositories.len(),
            notified = report.notified(),
            failures = report.failures(),
            pruned = pruned_actions,
            "cycle complete"
        );
        report
    }

    fn cycle_one(&self, watched: &WatchedRepository) -> RepositoryReport {
        let mut report = RepositoryReport::new(&watched.path);
        let scan = match TagScanner::new(&self.store, self.registry.as_ref()).scan(watched) {
            Ok(scan) => scan,
            Err(e) => {
                tracing::warn!(repository = %watched.path, "scan failed: {e}");
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.baselined = scan.baselined;

        let notifier = Notifier::new(&self.store, self.transport.as_ref());
        for record in scan.to_notify() {
            match notifier.notify(&watched.path, record) {
                Ok(_) => report.notified.push(record.name.clone()),
                Err(e) => {
                    tracing::warn!(
                        repository = %watched.path,
                        tag = %record.name,
                        "notification failed, retrying next cycle: {e}"
                    );
                    report.failed.push(record.name.clone());
                }
            }
        }
        report
    }

    pub fn handle_action(&self, action_id: Uuid) -> Result<DeploymentOutcome> {
        ActionHandler::new(
            &self.store,
            self.deploy.as_ref(),
            &self.watched,
            self.action_ttl,
        )
        .handle_action(action_id)
    }

    /// Every watched repository, in configuration order, with its recorded
    /// tags. Repositories not scanned yet come back with `scanned: false`.
    pub fn overview(&self) -> Result<Vec<RepositoryOverview>> {
        self.watched
            .iter()
            .map(|watched| {
                let state = self.store.repository(&watched.path)?;
                let mut deploy = watched.deploy.clone();
                deploy.token = None;
                Ok(RepositoryOverview {
                    repository: watched.path.clone(),
                    deploy,
                    scanned: state.is_some(),
                    baselined_at: state.as_ref().map(|s| s.baselined_at),
                    last_scan_at: state.as_ref().map(|s| s.last_scan_at),
                    tags: state
                        .map(|s| s.tags.into_values().collect())
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Drop actions past their TTL.
    pub fn prune_actions(&self) -> Result<u32> {
        let pruned = self.store.prune_actions(Utc::now(), self.action_ttl)?;
        if pruned > 0 {
            tracing::info!("pruned {pruned} expired actions");
        }
        Ok(pruned)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
