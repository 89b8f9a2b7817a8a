//! Read-only chat commands: `/start` (or `/help`) and `/list`.
//!
//! The watch list comes from configuration, so nothing here changes state.

use serde::Serialize;

use crate::engine::{Engine, RepositoryOverview};
use crate::transport::{escape_code, escape_markdown, InboundCommand};
use crate::types::NotificationState;

/// Tags listed per repository before the rest is summarized.
const LIST_MAX_TAGS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReply {
    pub command: String,
    /// MarkdownV2 text sent back to the chat.
    pub text: String,
}

/// Answer one command from the operator chat.
///
/// Commands from any other chat are dropped without a reply. Sending the
/// reply is best-effort.
pub fn dispatch_command(engine: &Engine, command: &InboundCommand) -> Option<CommandReply> {
    if command.chat_id != engine.chat_id() {
        tracing::warn!(
            chat = command.chat_id,
            user = command.user.as_deref().unwrap_or("-"),
            command = %command.command,
            "ignoring command from unexpected chat"
        );
        return None;
    }

    tracing::debug!(command = %command.command, "chat command");
    let text = match command.command.as_str() {
        "start" | "help" => help_text(),
        "list" | "listrepos" => match engine.overview() {
            Ok(overview) => list_text(&overview),
            Err(e) => {
                tracing::error!("failed to read state for /list: {e}");
                format!("❌ Could not read state: {}", escape_markdown(&e.to_string()))
            }
        },
        other => format!(
            "Unknown command `/{}`\\. Try /help\\.",
            escape_code(other)
        ),
    };

    if let Err(e) = engine.transport().reply(command.chat_id, &text) {
        tracing::warn!(command = %command.command, "failed to reply: {e}");
    }
    Some(CommandReply {
        command: command.command.clone(),
        text,
    })
}

fn help_text() -> String {
    [
        "*tagwatch*",
        "New image tags are announced here with a deploy button\\. \
         Each button works once\\.",
        "",
        "/list \\- watched repositories and their new tags",
        "/help \\- this message",
    ]
    .join("\n")
}

fn list_text(overview: &[RepositoryOverview]) -> String {
    if overview.is_empty() {
        return "No repositories are being watched\\.".to_string();
    }

    let noun = if overview.len() == 1 {
        "repository"
    } else {
        "repositories"
    };
    let mut out = format!("*Watching {} {noun}*", overview.len());

    for repo in overview {
        out.push_str(&format!(
            "\n\n*{}* → `{}` @ `{}`",
            escape_markdown(&repo.repository),
            escape_code(&repo.deploy.repository),
            escape_code(&repo.deploy.git_ref)
        ));
        if !repo.scanned {
            out.push_str("\n_not scanned yet_");
            continue;
        }

        let mut tags: Vec<_> = repo
            .tags
            .iter()
            .filter(|t| t.state != NotificationState::Baseline)
            .collect();
        if tags.is_empty() {
            let since = repo
                .baselined_at
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_default();
            out.push_str(&format!("\n_no new tags since {}_", escape_markdown(&since)));
            continue;
        }

        tags.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        for tag in tags.iter().take(LIST_MAX_TAGS) {
            out.push_str(&format!(
                "\n`{}` {}",
                escape_code(&tag.name),
                escape_markdown(&tag.state.as_str().replace('_', " "))
            ));
        }
        if tags.len() > LIST_MAX_TAGS {
            out.push_str(&format!("\n…and {} more", tags.len() - LIST_MAX_TAGS));
        }
    }
    out
}
