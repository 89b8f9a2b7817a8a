//! Telegram Bot API transport.
//!
//! Outbound messages use MarkdownV2 with an inline keyboard. Inbound button
//! presses arrive as `callback_query` updates and chat commands as `message`
//! updates, either pushed to the webhook route or drained with `getUpdates`
//! long polling.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Result, TagwatchError};
use crate::transport::{ChatTransport, Inbound, InboundCallback, InboundCommand, OutboundMessage};

/// Telegram caps callback-query answers at 200 characters.
const ANSWER_MAX: usize = 200;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl User {
    fn display_name(self) -> Option<String> {
        self.username.or(self.first_name)
    }
}

impl Update {
    /// The button press or slash command carried by this update, if any.
    pub fn into_inbound(self) -> Option<Inbound> {
        if let Some(query) = self.callback_query {
            let data = query.data?;
            let chat_id = query.message.map(|m| m.chat.id).unwrap_or(query.from.id);
            return Some(Inbound::Callback(InboundCallback {
                callback_id: query.id,
                chat_id,
                user: query.from.display_name(),
                data,
            }));
        }
        let message = self.message?;
        let text = message.text?;
        let user = message.from.and_then(User::display_name);
        InboundCommand::parse(message.chat.id, user, &text).map(Inbound::Command)
    }
}

// ---------------------------------------------------------------------------
// TelegramBot
// ---------------------------------------------------------------------------

pub struct TelegramBot {
    http: reqwest::blocking::Client,
    api_url: String,
    token: String,
    chat_id: i64,
    timeout: Duration,
}

impl TelegramBot {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        chat_id: i64,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TagwatchError::InvalidConfig(format!("telegram client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id,
            timeout,
        })
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    /// Call a Bot API method, mapping every failure to `TransportSendFailure`.
    ///
    /// The token is part of the URL, so reqwest errors are stripped of it.
    fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T> {
        let failure = |reason: String| TagwatchError::TransportSendFailure(format!("{method}: {reason}"));
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .map_err(|e| failure(e.without_url().to_string()))?;
        let status = response.status();
        let parsed: ApiResponse<T> = response
            .json()
            .map_err(|e| failure(format!("HTTP {status}: {}", e.without_url())))?;
        if !parsed.ok {
            let description = parsed.description.unwrap_or_else(|| format!("HTTP {status}"));
            return Err(failure(description));
        }
        parsed
            .result
            .ok_or_else(|| failure("response without result".to_string()))
    }

    fn send_text(&self, chat_id: i64, text: &str, markup: Option<serde_json::Value>) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "MarkdownV2",
        });
        if let Some(markup) = &markup {
            body["reply_markup"] = markup.clone();
        }
        match self.call::<serde_json::Value>("sendMessage", &body, self.timeout) {
            // Telegram rejected the formatting, so nothing was delivered; send
            // it again as plain text.
            Err(TagwatchError::TransportSendFailure(reason))
                if reason.contains("can't parse entities") =>
            {
                tracing::warn!("MarkdownV2 rejected, falling back to plain text: {reason}");
                let mut plain = json!({
                    "chat_id": chat_id,
                    "text": strip_markdown(text),
                });
                if let Some(markup) = markup {
                    plain["reply_markup"] = markup;
                }
                self.call::<serde_json::Value>("sendMessage", &plain, self.timeout)
                    .map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }

    /// Drain pending button presses and commands with long polling.
    ///
    /// Returns them with the offset to pass on the next call; updates before
    /// that offset are confirmed to Telegram and not redelivered.
    pub fn poll_updates(&self, offset: i64, poll_timeout: Duration) -> Result<(Vec<Inbound>, i64)> {
        let body = json!({
            "offset": offset,
            "timeout": poll_timeout.as_secs(),
            "allowed_updates": ["callback_query", "message"],
        });
        let updates: Vec<Update> =
            self.call("getUpdates", &body, poll_timeout + self.timeout)?;
        let next = updates
            .iter()
            .map(|u| u.update_id + 1)
            .max()
            .unwrap_or(offset);
        let inbound = updates
            .into_iter()
            .filter_map(Update::into_inbound)
            .collect();
        Ok((inbound, next))
    }
}

impl ChatTransport for TelegramBot {
    fn send(&self, message: &OutboundMessage) -> Result<()> {
        let markup = (!message.buttons.is_empty()).then(|| {
            let rows: Vec<serde_json::Value> = message
                .buttons
                .iter()
                .map(|b| json!([{ "text": b.label, "callback_data": b.callback_data }]))
                .collect();
            json!({ "inline_keyboard": rows })
        });
        self.send_text(self.chat_id, &message.text, markup)
    }

    fn acknowledge(&self, callback: &InboundCallback, text: &str) -> Result<()> {
        let answer: String = strip_markdown(text).chars().take(ANSWER_MAX).collect();
        let body = json!({
            "callback_query_id": callback.callback_id,
            "text": answer,
        });
        if let Err(e) = self.call::<bool>("answerCallbackQuery", &body, self.timeout) {
            // Answers expire after a while; the chat message below still informs.
            tracing::warn!("failed to answer callback {}: {e}", callback.callback_id);
        }
        self.send_text(callback.chat_id, text, None)
    }

    fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_text(chat_id, text, None)
    }
}

/// Undo MarkdownV2 escaping and drop emphasis markers.
pub fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '*' | '`' => {}
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
