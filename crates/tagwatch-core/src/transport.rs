//! Chat transport boundary.
//!
//! Outbound: one message with labeled action buttons. Inbound: a callback
//! carrying the pressed button's payload plus its chat context, or a slash
//! command typed into the chat. Delivery is at-least-once in both directions.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Characters that must be escaped in Telegram MarkdownV2 text.
const MARKDOWN_V2_SPECIAL: &str = r"_*[]()~`>#+-=|{}.!\";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionButton {
    pub label: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// MarkdownV2 body.
    pub text: String,
    #[serde(default)]
    pub buttons: Vec<ActionButton>,
}

/// An operator button press as delivered by the chat platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundCallback {
    /// Platform id used to acknowledge the press.
    pub callback_id: String,
    pub chat_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub data: String,
}

/// A `/command` typed into a chat the bot is in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundCommand {
    pub chat_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Lowercased, without the leading slash or an `@botname` suffix.
    pub command: String,
    #[serde(default)]
    pub args: String,
}

impl InboundCommand {
    /// Parse `text` as a command; `None` for anything not starting with `/`.
    pub fn parse(chat_id: i64, user: Option<String>, text: &str) -> Option<Self> {
        let rest = text.trim_start().strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let command = head.split('@').next().unwrap_or_default().to_lowercase();
        if command.is_empty() {
            return None;
        }
        Some(Self {
            chat_id,
            user,
            command,
            args: args.to_string(),
        })
    }
}

/// Anything the chat platform delivers that tagwatch acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Callback(InboundCallback),
    Command(InboundCommand),
}

pub trait ChatTransport: Send + Sync {
    /// Send `message` to the operator chat.
    ///
    /// An error means delivery is not confirmed; the message may or may not
    /// have arrived.
    fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Answer a button press and post `text` (MarkdownV2) to its chat.
    fn acknowledge(&self, callback: &InboundCallback, text: &str) -> Result<()>;

    /// Post `text` (MarkdownV2) to `chat_id`, without buttons.
    fn reply(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// Escape free text for MarkdownV2.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape text placed inside a MarkdownV2 code span.
pub fn escape_code(text: &str) -> String {
    text.replace('\\', "\\\\").replace('`', "\\`")
}
