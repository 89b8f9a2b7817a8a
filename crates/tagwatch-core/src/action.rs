use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::deploy::DeployTrigger;
use crate::error::{Result, TagwatchError};
use crate::store::{Claim, StateStore};
use crate::types::{DeploymentOutcome, WatchedRepository};

/// Turns an operator's button press into at most one deploy-tag call.
///
/// The consumed flag is claimed before the CI is contacted and is never
/// reset: a failed deploy is reported, not replayed.
pub struct ActionHandler<'a> {
    store: &'a StateStore,
    deploy: &'a dyn DeployTrigger,
    watched: &'a [WatchedRepository],
    ttl: Duration,
}

impl<'a> ActionHandler<'a> {
    pub fn new(
        store: &'a StateStore,
        deploy: &'a dyn DeployTrigger,
        watched: &'a [WatchedRepository],
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            deploy,
            watched,
            ttl,
        }
    }

    pub fn handle_action(&self, action_id: Uuid) -> Result<DeploymentOutcome> {
        let pending = self
            .store
            .action(action_id)?
            .ok_or_else(|| TagwatchError::UnknownAction(action_id.to_string()))?;
        let target = self
            .watched
            .iter()
            .find(|w| w.path == pending.repository)
            .map(|w| w.deploy.clone())
            .ok_or_else(|| {
                TagwatchError::UnknownAction(format!(
                    "{action_id} (repository {} is no longer watched)",
                    pending.repository
                ))
            })?;

        let action = match self.store.claim_action(action_id, Utc::now(), self.ttl)? {
            Claim::Claimed(action) => action,
            Claim::AlreadyConsumed(action) => {
                tracing::info!(
                    repository = %action.repository,
                    tag = %action.tag,
                    action = %action_id,
                    "action already handled; not deploying again"
                );
                return Ok(DeploymentOutcome::AlreadyHandled {
                    repository: action.repository,
                    tag: action.tag,
                });
            }
        };

        let already_existed = match self.deploy.create_deploy_tag(&target, &action.tag) {
            Ok(()) => false,
            Err(TagwatchError::TagAlreadyExists { .. }) => true,
            Err(e) => {
                tracing::warn!(
                    repository = %action.repository,
                    tag = %action.tag,
                    ci_repository = %target.repository,
                    "deploy trigger failed: {e}"
                );
                return Ok(DeploymentOutcome::DeployFailed {
                    repository: action.repository,
                    tag: action.tag,
                    reason: e.to_string(),
                });
            }
        };

        self.store
            .complete_action(&action.repository, &action.tag, Utc::now())?;
        tracing::info!(
            repository = %action.repository,
            tag = %action.tag,
            ci_repository = %target.repository,
            already_existed,
            "deploy tag created"
        );
        Ok(DeploymentOutcome::Deployed {
            repository: action.repository,
            tag: action.tag,
            already_existed,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DeployMode, FakeDeploy};
    use crate::types::{DeployTarget, NotificationState, PendingAction, RegistryTag, TagFilter};
    use tempfile::TempDir;

    const REPO: &str = "acme/api";
    const TTL: Duration = Duration::from_secs(3600);

    struct Fixture {
        _dir: TempDir,
        store: StateStore,
        deploy: FakeDeploy,
        watched: Vec<WatchedRepository>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = StateStore::open(&dir.path().join("state.redb")).unwrap();
            store.record_scan(REPO, &[], Utc::now()).unwrap();
            Self {
                _dir: dir,
                store,
                deploy: FakeDeploy::default(),
                watched: vec![WatchedRepository::new(
                    REPO,
                    TagFilter::default(),
                    DeployTarget::new("ops/api", "main"),
                )],
            }
        }

        fn handler(&self) -> ActionHandler<'_> {
            ActionHandler::new(&self.store, &self.deploy, &self.watched, TTL)
        }

        fn notified(&self, tag: &str) -> Uuid {
            self.store
                .record_scan(REPO, &[RegistryTag::named(tag)], Utc::now())
                .unwrap();
            let action = PendingAction::new(REPO, tag, Utc::now());
            self.store.insert_action(&action).unwrap();
            self.store
                .mark_notified(REPO, tag, action.id, Utc::now())
                .unwrap();
            action.id
        }

        fn state(&self, tag: &str) -> NotificationState {
            self.store.repository(REPO).unwrap().unwrap().tags[tag].state
        }
    }

    #[test]
    fn deploys_once_then_reports_already_handled() {
        let fx = Fixture::new();
        let id = fx.notified("v1.1");

        let first = fx.handler().handle_action(id).unwrap();
        assert_eq!(
            first,
            DeploymentOutcome::Deployed {
                repository: REPO.into(),
                tag: "v1.1".into(),
                already_existed: false,
            }
        );
        assert_eq!(fx.state("v1.1"), NotificationState::ActionCompleted);

        let second = fx.handler().handle_action(id).unwrap();
        assert!(matches!(second, DeploymentOutcome::AlreadyHandled { .. }));
        assert_eq!(fx.deploy.calls(), vec![("ops/api".to_string(), "v1.1".to_string())]);
    }

    #[test]
    fn ci_failure_does_not_replay() {
        let fx = Fixture::new();
        fx.deploy.set_mode(DeployMode::Unavailable);
        let id = fx.notified("v1.2");

        let outcome = fx.handler().handle_action(id).unwrap();
        assert!(matches!(outcome, DeploymentOutcome::DeployFailed { .. }));
        assert_eq!(fx.state("v1.2"), NotificationState::ActionPending);
        assert!(fx.store.action(id).unwrap().unwrap().consumed);

        fx.deploy.set_mode(DeployMode::Succeed);
        let again = fx.handler().handle_action(id).unwrap();
        assert!(matches!(again, DeploymentOutcome::AlreadyHandled { .. }));
        assert_eq!(fx.deploy.calls().len(), 1);
        assert_eq!(fx.state("v1.2"), NotificationState::ActionPending);
    }

    #[test]
    fn existing_ci_tag_counts_as_deployed() {
        let fx = Fixture::new();
        fx.deploy.set_mode(DeployMode::AlreadyExists);
        let id = fx.notified("v1.3");

        let outcome = fx.handler().handle_action(id).unwrap();
        assert!(matches!(
            outcome,
            DeploymentOutcome::Deployed {
                already_existed: true,
                ..
            }
        ));
        assert_eq!(fx.state("v1.3"), NotificationState::ActionCompleted);
    }

    #[test]
    fn unknown_action_is_an_error_without_deploy() {
        let fx = Fixture::new();
        let err = fx.handler().handle_action(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, TagwatchError::UnknownAction(_)));
        assert!(fx.deploy.calls().is_empty());
    }

    #[test]
    fn unwatched_repository_is_rejected_before_claim() {
        let fx = Fixture::new();
        let id = fx.notified("v1.4");
        let handler = ActionHandler::new(&fx.store, &fx.deploy, &[], TTL);

        let err = handler.handle_action(id).unwrap_err();
        assert!(matches!(err, TagwatchError::UnknownAction(_)));
        assert!(!fx.store.action(id).unwrap().unwrap().consumed);
    }

    #[test]
    fn concurrent_presses_deploy_once() {
        let fx = Fixture::new();
        let id = fx.notified("v2.0");

        let outcomes: Vec<DeploymentOutcome> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| fx.handler().handle_action(id).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let deployed = outcomes
            .iter()
            .filter(|o| matches!(o, DeploymentOutcome::Deployed { .. }))
            .count();
        assert_eq!(deployed, 1);
        assert_eq!(fx.deploy.calls().len(), 1);
    }
}
