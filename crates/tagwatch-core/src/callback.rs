//! Inbound adapter: button press → action handler → operator reply.

use serde::Serialize;

use crate::engine::Engine;
use crate::error::TagwatchError;
use crate::transport::{escape_code, escape_markdown, InboundCallback};
use crate::types::{parse_callback_data, DeploymentOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct CallbackReply {
    /// `None` when the press was ignored or could not be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DeploymentOutcome>,
    /// MarkdownV2 text sent back to the chat.
    pub text: String,
}

/// Resolve one button press and tell the operator what happened.
///
/// Never fails: every error becomes reply text. The acknowledgement is
/// best-effort, since the outcome is already persisted.
pub fn dispatch_callback(engine: &Engine, callback: &InboundCallback) -> CallbackReply {
    let reply = resolve(engine, callback);
    if let Err(e) = engine.transport().acknowledge(callback, &reply.text) {
        tracing::warn!(callback = %callback.callback_id, "failed to acknowledge: {e}");
    }
    reply
}

fn resolve(engine: &Engine, callback: &InboundCallback) -> CallbackReply {
    if callback.chat_id != engine.chat_id() {
        tracing::warn!(
            chat = callback.chat_id,
            user = callback.user.as_deref().unwrap_or("-"),
            "ignoring callback from unexpected chat"
        );
        return CallbackReply {
            outcome: None,
            text: "⛔ This chat is not allowed to trigger deploys\\.".to_string(),
        };
    }

    let Some(action_id) = parse_callback_data(&callback.data) else {
        tracing::debug!(data = %callback.data, "ignoring unrecognized callback data");
        return CallbackReply {
            outcome: None,
            text: "⚠️ Unrecognized button\\.".to_string(),
        };
    };

    tracing::info!(
        action = %action_id,
        user = callback.user.as_deref().unwrap_or("-"),
        "deploy requested"
    );
    match engine.handle_action(action_id) {
        Ok(outcome) => CallbackReply {
            text: outcome_text(&outcome),
            outcome: Some(outcome),
        },
        Err(TagwatchError::UnknownAction(_)) => CallbackReply {
            outcome: None,
            text: "⚠️ This button has expired or is no longer known\\. Nothing was deployed\\."
                .to_string(),
        },
        Err(e) => {
            tracing::error!(action = %action_id, "action handling failed: {e}");
            CallbackReply {
                outcome: None,
                text: format!(
                    "❌ Could not process the request: {}",
                    escape_markdown(&e.to_string())
                ),
            }
        }
    }
}

pub fn outcome_text(outcome: &DeploymentOutcome) -> String {
    match outcome {
        DeploymentOutcome::Deployed {
            repository,
            tag,
            already_existed,
        } => {
            let mut text = format!(
                "✅ Deploy triggered for *{}* `{}`",
                escape_markdown(repository),
                escape_code(tag)
            );
            if *already_existed {
                text.push_str("\n_The deploy tag already existed\\._");
            }
            text
        }
        DeploymentOutcome::AlreadyHandled { repository, tag } => format!(
            "ℹ️ *{}* `{}` was already handled\\. Not deploying again\\.",
            escape_markdown(repository),
            escape_code(tag)
        ),
        DeploymentOutcome::DeployFailed {
            repository,
            tag,
            reason,
        } => format!(
            "⚠️ Deploy of *{}* `{}` failed: {}\nIt will not be retried automatically\\.",
            escape_markdown(repository),
            escape_code(tag),
            escape_markdown(reason)
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{fixture, CHAT, REPO};
    use crate::testing::DeployMode;

    fn press(chat_id: i64, data: &str) -> InboundCallback {
        InboundCallback {
            callback_id: "cb".into(),
            chat_id,
            user: Some("ops".into()),
            data: data.into(),
        }
    }

    #[test]
    fn deploys_and_acknowledges() {
        let fx = fixture();
        let action = fx.notified("v1.1");

        let reply = dispatch_callback(&fx.engine, &press(CHAT, &action.callback_data()));
        assert!(matches!(
            reply.outcome,
            Some(DeploymentOutcome::Deployed { .. })
        ));
        assert!(reply.text.contains("Deploy triggered"));
        let acks = fx.transport.acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].1, reply.text);
    }

    #[test]
    fn second_press_is_already_handled() {
        let fx = fixture();
        let action = fx.notified("v1.1");
        let callback = press(CHAT, &action.callback_data());

        dispatch_callback(&fx.engine, &callback);
        let reply = dispatch_callback(&fx.engine, &callback);
        assert!(matches!(
            reply.outcome,
            Some(DeploymentOutcome::AlreadyHandled { .. })
        ));
        assert_eq!(fx.deploy.calls().len(), 1);
    }

    #[test]
    fn foreign_chat_is_ignored() {
        let fx = fixture();
        let action = fx.notified("v1.1");

        let reply = dispatch_callback(&fx.engine, &press(CHAT + 1, &action.callback_data()));
        assert!(reply.outcome.is_none());
        assert!(fx.deploy.calls().is_empty());
        assert!(!fx.engine.store().action(action.id).unwrap().unwrap().consumed);
    }

    #[test]
    fn unknown_and_malformed_payloads() {
        let fx = fixture();
        let unknown = dispatch_callback(
            &fx.engine,
            &press(CHAT, &format!("deploy:{}", uuid::Uuid::new_v4())),
        );
        assert!(unknown.outcome.is_none());
        assert!(unknown.text.contains("expired"));

        let garbage = dispatch_callback(&fx.engine, &press(CHAT, "hello"));
        assert!(garbage.outcome.is_none());
        assert!(fx.deploy.calls().is_empty());
    }

    #[test]
    fn failure_text_mentions_no_retry() {
        let fx = fixture();
        fx.deploy.set_mode(DeployMode::Unavailable);
        let action = fx.notified("v1.2");

        let reply = dispatch_callback(&fx.engine, &press(CHAT, &action.callback_data()));
        assert!(matches!(
            reply.outcome,
            Some(DeploymentOutcome::DeployFailed { .. })
        ));
        assert!(reply.text.contains("not be retried"));
        assert!(reply.text.contains(&escape_markdown(REPO)));
    }
}
