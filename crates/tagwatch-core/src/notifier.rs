use chrono::Utc;

use crate::error::{Result, TagwatchError};
use crate::store::StateStore;
use crate::transport::{escape_code, escape_markdown, ActionButton, ChatTransport, OutboundMessage};
use crate::types::{PendingAction, TagRecord};

const BUTTON_TAG_MAX: usize = 20;

/// Announces a recorded tag and hands the operator a single-use deploy action.
pub struct Notifier<'a> {
    store: &'a StateStore,
    transport: &'a dyn ChatTransport,
}

impl<'a> Notifier<'a> {
    pub fn new(store: &'a StateStore, transport: &'a dyn ChatTransport) -> Self {
        Self { store, transport }
    }

    /// Persist a pending action, send the message, then mark the tag notified.
    ///
    /// The action is stored before the send so a button press can always be
    /// resolved. If the send fails the action is discarded and the tag stays
    /// `Unnotified`, so the next tick issues a fresh action.
    pub fn notify(&self, repository: &str, record: &TagRecord) -> Result<PendingAction> {
        let action = PendingAction::new(repository, &record.name, Utc::now());
        self.store.insert_action(&action)?;

        let message = compose(repository, record, &action);
        if let Err(e) = self.transport.send(&message) {
            if let Err(discard) = self.store.discard_action(action.id) {
                // An orphaned action is harmless: claiming it cannot deploy a
                // tag that another action already acted on.
                tracing::error!(
                    repository,
                    tag = %record.name,
                    "failed to discard action {}: {discard}",
                    action.id
                );
            }
            return Err(match e {
                TagwatchError::TransportSendFailure(_) => e,
                other => TagwatchError::TransportSendFailure(other.to_string()),
            });
        }

        self.store
            .mark_notified(repository, &record.name, action.id, Utc::now())?;
        tracing::info!(repository, tag = %record.name, action = %action.id, "notified new tag");
        Ok(action)
    }
}

/// Build the announcement for one tag.
pub fn compose(repository: &str, record: &TagRecord, action: &PendingAction) -> OutboundMessage {
    let mut text = format!(
        "🔔 New tag for *{}*\n\n🏷️ *Tag:* `{}`\n",
        escape_markdown(repository),
        escape_code(&record.name)
    );
    if let Some(updated) = record.last_updated {
        text.push_str(&format!(
            "   *Updated:* {}\n",
            escape_markdown(&updated.format("%Y-%m-%d %H:%M UTC").to_string())
        ));
    }
    if let Some(digest) = &record.digest {
        let short: String = digest.chars().take(19).collect();
        text.push_str(&format!("   *Digest:* `{}`\n", escape_code(&short)));
    }

    OutboundMessage {
        text,
        buttons: vec![ActionButton {
            label: format!("Deploy {}", button_tag(&record.name)),
            callback_data: action.callback_data(),
        }],
    }
}

fn button_tag(tag: &str) -> String {
    if tag.chars().count() > BUTTON_TAG_MAX {
        let head: String = tag.chars().take(BUTTON_TAG_MAX - 3).collect();
        format!("{head}...")
    } else {
        tag.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
