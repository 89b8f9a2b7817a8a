use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::error::{Result, TagwatchError};

/// Prefix of the callback payload attached to every deploy button.
pub const DEPLOY_CALLBACK_PREFIX: &str = "deploy:";

// ---------------------------------------------------------------------------
// Repository names
// ---------------------------------------------------------------------------

/// Normalize a registry repository path.
///
/// Official images are addressed without a namespace (`nginx`); the registry
/// API wants them under `library/`.
pub fn normalize_repository(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/').to_lowercase();
    if trimmed.contains('/') {
        trimmed
    } else {
        format!("library/{trimmed}")
    }
}

// ---------------------------------------------------------------------------
// TagFilter
// ---------------------------------------------------------------------------

/// Decides which registry tags are eligible for tracking.
///
/// Applied before the diff: a rejected tag is never recorded.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub pattern: Option<Regex>,
    pub skip_artifacts: bool,
}

impl TagFilter {
    pub fn new(pattern: Option<&str>, skip_artifacts: bool) -> Result<Self> {
        let pattern = pattern
            .map(|p| {
                Regex::new(p).map_err(|source| TagwatchError::InvalidPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .transpose()?;
        Ok(Self {
            pattern,
            skip_artifacts,
        })
    }

    pub fn accepts(&self, tag: &str) -> bool {
        if self.skip_artifacts && is_artifact_tag(tag) {
            return false;
        }
        match &self.pattern {
            Some(re) => re.is_match(tag),
            None => true,
        }
    }
}

/// Signature and attestation tags pushed next to real images.
pub fn is_artifact_tag(tag: &str) -> bool {
    tag.ends_with(".sig") || tag.ends_with(".att") || tag.starts_with("sha256-")
}

// ---------------------------------------------------------------------------
// WatchedRepository
// ---------------------------------------------------------------------------

/// The CI repository and ref that a deploy tag is created on.
///
/// `base_url` and `token` point this repository at its own CI instance; when
/// unset the global `ci` section is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    pub repository: String,
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl DeployTarget {
    pub fn new(repository: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            git_ref: git_ref.into(),
            base_url: None,
            token: None,
        }
    }
}

pub fn default_ref() -> String {
    "main".to_string()
}

/// One registry image path being monitored. Immutable for a run.
#[derive(Debug, Clone)]
pub struct WatchedRepository {
    pub path: String,
    pub filter: TagFilter,
    pub deploy: DeployTarget,
}

impl WatchedRepository {
    pub fn new(path: &str, filter: TagFilter, deploy: DeployTarget) -> Self {
        Self {
            path: normalize_repository(path),
            filter,
            deploy,
        }
    }

    pub fn from_config(cfg: &RepositoryConfig) -> Result<Self> {
        let filter = TagFilter::new(cfg.tag_pattern.as_deref(), cfg.skip_artifacts)?;
        Ok(Self::new(&cfg.path, filter, cfg.deploy.clone()))
    }
}

// ---------------------------------------------------------------------------
// RegistryTag
// ---------------------------------------------------------------------------

/// A tag as reported by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryTag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl RegistryTag {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: None,
            last_updated: None,
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationState
// ---------------------------------------------------------------------------

/// Lifecycle of a recorded tag.
///
/// Transitions: `Unnotified → Notified → ActionPending → ActionCompleted`.
/// `Baseline` is terminal: the tag existed before the repository was first
/// scanned and is never announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    Baseline,
    Unnotified,
    Notified,
    ActionPending,
    ActionCompleted,
}

impl NotificationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Unnotified => "unnotified",
            Self::Notified => "notified",
            Self::ActionPending => "action_pending",
            Self::ActionCompleted => "action_completed",
        }
    }

    pub fn can_advance_to(self, next: NotificationState) -> bool {
        matches!(
            (self, next),
            (Self::Unnotified, Self::Notified)
                | (Self::Notified, Self::ActionPending)
                | (Self::ActionPending, Self::ActionCompleted)
        )
    }
}

impl fmt::Display for NotificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TagRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub name: String,
    pub first_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub state: NotificationState,
    /// The pending action bound to this tag once its notification went out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TagRecord {
    pub fn observed(tag: &RegistryTag, state: NotificationState, now: DateTime<Utc>) -> Self {
        Self {
            name: tag.name.clone(),
            first_seen: now,
            digest: tag.digest.clone(),
            last_updated: tag.last_updated,
            state,
            action_id: None,
            notified_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`, rejecting anything but a single forward step.
    pub fn advance(&mut self, next: NotificationState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(TagwatchError::InvalidTransition {
                tag: self.name.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        match next {
            NotificationState::Notified => self.notified_at = Some(now),
            NotificationState::ActionCompleted => self.completed_at = Some(now),
            _ => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RepositoryState
// ---------------------------------------------------------------------------

/// The persisted record for one watched repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryState {
    pub repository: String,
    /// When the first scan seeded the baseline.
    pub baselined_at: DateTime<Utc>,
    pub last_scan_at: DateTime<Utc>,
    /// Keyed by tag name; the map key is the uniqueness guard.
    #[serde(default)]
    pub tags: BTreeMap<String, TagRecord>,
}

impl RepositoryState {
    pub fn new(repository: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            repository: repository.into(),
            baselined_at: now,
            last_scan_at: now,
            tags: BTreeMap::new(),
        }
    }

    pub fn in_state(&self, state: NotificationState) -> impl Iterator<Item = &TagRecord> {
        self.tags.values().filter(move |t| t.state == state)
    }
}

// ---------------------------------------------------------------------------
// PendingAction
// ---------------------------------------------------------------------------

/// A single-use invitation to deploy one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: Uuid,
    pub repository: String,
    pub tag: String,
    pub created_at: DateTime<Utc>,
    pub consumed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl PendingAction {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository: repository.into(),
            tag: tag.into(),
            created_at: now,
            consumed: false,
            consumed_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.created_at + ttl < now,
            // A TTL too large to represent never expires.
            Err(_) => false,
        }
    }

    /// The payload carried by the chat button, e.g. `deploy:<uuid>`.
    pub fn callback_data(&self) -> String {
        format!("{DEPLOY_CALLBACK_PREFIX}{}", self.id)
    }
}

/// Extract the action identifier from a button payload.
pub fn parse_callback_data(data: &str) -> Option<Uuid> {
    data.strip_prefix(DEPLOY_CALLBACK_PREFIX)
        .and_then(|id| Uuid::parse_str(id.trim()).ok())
}

// ---------------------------------------------------------------------------
// DeploymentOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentOutcome {
    /// The CI tag was created, or already existed.
    Deployed {
        repository: String,
        tag: String,
        already_existed: bool,
    },
    /// The action was consumed earlier; nothing was triggered.
    AlreadyHandled { repository: String, tag: String },
    /// The CI call failed. The action stays consumed.
    DeployFailed {
        repository: String,
        tag: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_get_library_namespace() {
        assert_eq!(normalize_repository("nginx"), "library/nginx");
        assert_eq!(normalize_repository(" Grafana/Grafana "), "grafana/grafana");
        assert_eq!(normalize_repository("/acme/api/"), "acme/api");
    }

    #[test]
    fn filter_skips_artifact_tags() {
        let filter = TagFilter::new(None, true).unwrap();
        assert!(filter.accepts("v1.0"));
        assert!(!filter.accepts("sha256-abcdef.sig"));
        assert!(!filter.accepts("sha256-abcdef"));
        assert!(!filter.accepts("v1.0.sig"));

        let permissive = TagFilter::new(None, false).unwrap();
        assert!(permissive.accepts("v1.0.sig"));
    }

    #[test]
    fn filter_applies_pattern() {
        let filter = TagFilter::new(Some(r"^v\d+\.\d+$"), false).unwrap();
        assert!(filter.accepts("v1.2"));
        assert!(!filter.accepts("latest"));
        assert!(!filter.accepts("v1.2-rc1"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = TagFilter::new(Some("(unclosed"), false).unwrap_err();
        assert!(matches!(err, TagwatchError::InvalidPattern { .. }));
    }

    #[test]
    fn state_only_moves_forward() {
        use NotificationState::*;
        assert!(Unnotified.can_advance_to(Notified));
        assert!(Notified.can_advance_to(ActionPending));
        assert!(ActionPending.can_advance_to(ActionCompleted));

        assert!(!Notified.can_advance_to(Unnotified));
        assert!(!ActionPending.can_advance_to(Notified));
        assert!(!ActionCompleted.can_advance_to(ActionPending));
        assert!(!Baseline.can_advance_to(Notified));
        assert!(!Unnotified.can_advance_to(ActionCompleted));
    }

    #[test]
    fn advance_records_timestamps() {
        let now = Utc::now();
        let mut rec = TagRecord::observed(
            &RegistryTag::named("v1.0"),
            NotificationState::Unnotified,
            now,
        );
        rec.advance(NotificationState::Notified, now).unwrap();
        assert_eq!(rec.notified_at, Some(now));

        let err = rec.advance(NotificationState::Unnotified, now).unwrap_err();
        assert!(matches!(err, TagwatchError::InvalidTransition { .. }));
        assert_eq!(rec.state, NotificationState::Notified);
    }

    #[test]
    fn callback_data_fits_telegram_limit() {
        let action = PendingAction::new("library/nginx", "1.27.0", Utc::now());
        let data = action.callback_data();
        assert!(data.len() <= 64, "{} bytes", data.len());
        assert_eq!(parse_callback_data(&data), Some(action.id));
    }

    #[test]
    fn parse_callback_data_rejects_foreign_payloads() {
        assert_eq!(parse_callback_data("deploy:not-a-uuid"), None);
        assert_eq!(parse_callback_data("remove:library/nginx"), None);
    }

    #[test]
    fn action_expiry_uses_ttl() {
        let now = Utc::now();
        let mut action = PendingAction::new("acme/api", "v1", now);
        action.created_at = now - chrono::Duration::hours(2);
        assert!(action.is_expired(now, Duration::from_secs(3600)));
        assert!(!action.is_expired(now, Duration::from_secs(3 * 3600)));
    }

    #[test]
    fn outcome_serializes_tagged() {
        let outcome = DeploymentOutcome::AlreadyHandled {
            repository: "acme/api".into(),
            tag: "v1".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "already_handled");
    }
}
