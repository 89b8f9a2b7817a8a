//! Durable state for tagwatch using redb.
//!
//! # Table design
//!
//! ```text
//! repositories: repository path (str)  -> JSON RepositoryState
//! actions:      action uuid (16 bytes) -> JSON PendingAction
//! ```
//!
//! Every read-modify-write runs inside a single redb write transaction.
//! redb admits one writer at a time, so updates to a repository's tag set
//! never race, and the consumed check-and-set on an action is atomic with
//! the tag record moving to `ActionPending`.

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use uuid::Uuid;

use crate::error::{Result, TagwatchError};
use crate::types::{NotificationState, PendingAction, RegistryTag, RepositoryState, TagRecord};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const REPOSITORIES: TableDefinition<&str, &[u8]> = TableDefinition::new("repositories");
const ACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("actions");

fn db<E: Display>(e: E) -> TagwatchError {
    TagwatchError::Store(e.to_string())
}

fn read_repo<T>(table: &T, repository: &str) -> Result<Option<RepositoryState>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(repository).map_err(db)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn read_action<T>(table: &T, id: Uuid) -> Result<Option<PendingAction>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(id.as_bytes().as_slice()).map_err(db)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn tag_mut<'a>(
    state: &'a mut RepositoryState,
    repository: &str,
    tag: &str,
) -> Result<&'a mut TagRecord> {
    state
        .tags
        .get_mut(tag)
        .ok_or_else(|| TagwatchError::TagNotFound {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What one scan changed in the store.
#[derive(Debug, Clone, Default)]
pub struct ScanDelta {
    /// Records created by this scan, in registry order.
    pub discovered: Vec<TagRecord>,
    /// Records created by earlier scans that are still `Unnotified`.
    pub retry: Vec<TagRecord>,
    /// True when this was the repository's first scan and every tag was
    /// recorded as `Baseline`.
    pub baselined: bool,
}

/// Result of the atomic consumed check-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller owns the deploy for this action.
    Claimed(PendingAction),
    /// The action (or its tag) was acted on before.
    AlreadyConsumed(PendingAction),
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Persistent store for tag records and pending actions.
pub struct StateStore {
    db: Database,
}

impl StateStore {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        crate::io::ensure_parent(path)?;
        let database = Database::create(path).map_err(db)?;
        // Ensure both tables exist before any reads
        let wt = database.begin_write().map_err(db)?;
        wt.open_table(REPOSITORIES).map_err(db)?;
        wt.open_table(ACTIONS).map_err(db)?;
        wt.commit().map_err(db)?;
        Ok(Self { db: database })
    }

    /// Run `f` in one write transaction, committing only on success.
    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T>) -> Result<T> {
        let wt = self.db.begin_write().map_err(db)?;
        match f(&wt) {
            Ok(out) => {
                wt.commit().map_err(db)?;
                Ok(out)
            }
            Err(e) => {
                if let Err(abort) = wt.abort() {
                    tracing::error!("failed to abort state transaction: {abort}");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Repositories
    // -----------------------------------------------------------------------

    pub fn repository(&self, repository: &str) -> Result<Option<RepositoryState>> {
        let rt = self.db.begin_read().map_err(db)?;
        let table = rt.open_table(REPOSITORIES).map_err(db)?;
        read_repo(&table, repository)
    }

    /// All repository records, ordered by path.
    pub fn repositories(&self) -> Result<Vec<RepositoryState>> {
        let rt = self.db.begin_read().map_err(db)?;
        let table = rt.open_table(REPOSITORIES).map_err(db)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db)? {
            let (_, v) = entry.map_err(db)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Record the outcome of one registry listing.
    ///
    /// On a repository's first scan every tag is stored as `Baseline` and
    /// nothing is reported as discovered. Afterwards each unrecorded tag is
    /// stored as `Unnotified`. Existing records are never removed, so an empty
    /// listing changes nothing but `last_scan_at`.
    pub fn record_scan(
        &self,
        repository: &str,
        tags: &[RegistryTag],
        now: DateTime<Utc>,
    ) -> Result<ScanDelta> {
        self.write(|wt| {
            let mut table = wt.open_table(REPOSITORIES).map_err(db)?;
            let existing = read_repo(&table, repository)?;
            let baselined = existing.is_none();
            let mut state = existing.unwrap_or_else(|| RepositoryState::new(repository, now));

            let retry: Vec<TagRecord> = state
                .in_state(NotificationState::Unnotified)
                .cloned()
                .collect();

            let initial = if baselined {
                NotificationState::Baseline
            } else {
                NotificationState::Unnotified
            };
            let mut discovered = Vec::new();
            for tag in tags {
                if state.tags.contains_key(&tag.name) {
                    continue;
                }
                let record = TagRecord::observed(tag, initial, now);
                if !baselined {
                    discovered.push(record.clone());
                }
                state.tags.insert(tag.name.clone(), record);
            }
            state.last_scan_at = now;

            let value = serde_json::to_vec(&state)?;
            table
                .insert(repository, value.as_slice())
                .map_err(db)?;

            Ok(ScanDelta {
                discovered,
                retry,
                baselined,
            })
        })
    }

    /// Move a tag to `Notified` and bind it to the action its message carries.
    ///
    /// If the operator already claimed that same action (the button was
    /// pressed before this write landed) the record is left as is.
    pub fn mark_notified(
        &self,
        repository: &str,
        tag: &str,
        action_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TagRecord> {
        self.write(|wt| {
            let mut table = wt.open_table(REPOSITORIES).map_err(db)?;
            let mut state = read_repo(&table, repository)?.ok_or_else(|| {
                TagwatchError::TagNotFound {
                    repository: repository.to_string(),
                    tag: tag.to_string(),
                }
            })?;
            let record = tag_mut(&mut state, repository, tag)?;
            if record.action_id == Some(action_id)
                && matches!(
                    record.state,
                    NotificationState::ActionPending | NotificationState::ActionCompleted
                )
            {
                return Ok(record.clone());
            }
            record.advance(NotificationState::Notified, now)?;
            record.action_id = Some(action_id);
            let updated = record.clone();

            let value = serde_json::to_vec(&state)?;
            table
                .insert(repository, value.as_slice())
                .map_err(db)?;
            Ok(updated)
        })
    }

    /// Move a claimed tag from `ActionPending` to `ActionCompleted`.
    pub fn complete_action(
        &self,
        repository: &str,
        tag: &str,
        now: DateTime<Utc>,
    ) -> Result<TagRecord> {
        self.write(|wt| {
            let mut table = wt.open_table(REPOSITORIES).map_err(db)?;
            let mut state = read_repo(&table, repository)?.ok_or_else(|| {
                TagwatchError::TagNotFound {
                    repository: repository.to_string(),
                    tag: tag.to_string(),
                }
            })?;
            let record = tag_mut(&mut state, repository, tag)?;
            record.advance(NotificationState::ActionCompleted, now)?;
            let updated = record.clone();

            let value = serde_json::to_vec(&state)?;
            table
                .insert(repository, value.as_slice())
                .map_err(db)?;
            Ok(updated)
        })
    }

    // -----------------------------------------------------------------------
    // Pending actions
    // -----------------------------------------------------------------------

    pub fn insert_action(&self, action: &PendingAction) -> Result<()> {
        let value = serde_json::to_vec(action)?;
        self.write(|wt| {
            let mut table = wt.open_table(ACTIONS).map_err(db)?;
            table
                .insert(action.id.as_bytes().as_slice(), value.as_slice())
                .map_err(db)?;
            Ok(())
        })
    }

    /// Remove an action whose message never went out. Returns whether it existed.
    pub fn discard_action(&self, id: Uuid) -> Result<bool> {
        self.write(|wt| {
            let mut table = wt.open_table(ACTIONS).map_err(db)?;
            let removed = table.remove(id.as_bytes().as_slice()).map_err(db)?;
            Ok(removed.is_some())
        })
    }

    pub fn action(&self, id: Uuid) -> Result<Option<PendingAction>> {
        let rt = self.db.begin_read().map_err(db)?;
        let table = rt.open_table(ACTIONS).map_err(db)?;
        read_action(&table, id)
    }

    /// All actions, newest first.
    pub fn actions(&self) -> Result<Vec<PendingAction>> {
        let rt = self.db.begin_read().map_err(db)?;
        let table = rt.open_table(ACTIONS).map_err(db)?;
        let mut result: Vec<PendingAction> = Vec::new();
        for entry in table.iter().map_err(db)? {
            let (_, v) = entry.map_err(db)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    /// Atomically consume an action and move its tag to `ActionPending`.
    ///
    /// Absent or expired actions fail with `UnknownAction`. A consumed action,
    /// or one whose tag was already acted on through another action, yields
    /// `Claim::AlreadyConsumed` and changes nothing about the tag.
    pub fn claim_action(&self, id: Uuid, now: DateTime<Utc>, ttl: Duration) -> Result<Claim> {
        self.write(|wt| {
            let mut actions = wt.open_table(ACTIONS).map_err(db)?;
            let mut action = read_action(&actions, id)?
                .filter(|a| !a.is_expired(now, ttl))
                .ok_or_else(|| TagwatchError::UnknownAction(id.to_string()))?;
            if action.consumed {
                return Ok(Claim::AlreadyConsumed(action));
            }

            let mut repos = wt.open_table(REPOSITORIES).map_err(db)?;
            let mut state = read_repo(&repos, &action.repository)?.ok_or_else(|| {
                TagwatchError::TagNotFound {
                    repository: action.repository.clone(),
                    tag: action.tag.clone(),
                }
            })?;
            let record = tag_mut(&mut state, &action.repository, &action.tag)?;

            action.consumed = true;
            action.consumed_at = Some(now);
            let action_value = serde_json::to_vec(&action)?;
            actions
                .insert(id.as_bytes().as_slice(), action_value.as_slice())
                .map_err(db)?;

            match record.state {
                NotificationState::ActionPending | NotificationState::ActionCompleted => {
                    return Ok(Claim::AlreadyConsumed(action));
                }
                // The send succeeded but its mark_notified has not landed yet.
                NotificationState::Unnotified => {
                    record.advance(NotificationState::Notified, now)?;
                }
                _ => {}
            }
            record.advance(NotificationState::ActionPending, now)?;
            record.action_id = Some(id);

            let value = serde_json::to_vec(&state)?;
            repos
                .insert(action.repository.as_str(), value.as_slice())
                .map_err(db)?;
            Ok(Claim::Claimed(action))
        })
    }

    /// Drop every action older than `ttl`. Returns the number removed.
    pub fn prune_actions(&self, now: DateTime<Utc>, ttl: Duration) -> Result<u32> {
        self.write(|wt| {
            let mut table = wt.open_table(ACTIONS).map_err(db)?;
            let mut stale = Vec::new();
            for entry in table.iter().map_err(db)? {
                let (k, v) = entry.map_err(db)?;
                let action: PendingAction = serde_json::from_slice(v.value())?;
                if action.is_expired(now, ttl) {
                    stale.push(k.value().to_vec());
                }
            }
            for key in &stale {
                table.remove(key.as_slice()).map_err(db)?;
            }
            Ok(stale.len() as u32)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
