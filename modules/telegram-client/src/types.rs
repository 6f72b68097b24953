use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Public channel preview types (t.me/s/<channel>) ---

/// One page of a public channel preview, oldest message first as served.
#[derive(Debug, Clone, Default)]
pub struct PreviewPage {
    /// Channel title from the page header. `None` when the page has no
    /// channel header (unknown or private channel).
    pub title: Option<String>,
    pub messages: Vec<PreviewMessage>,
}

impl PreviewPage {
    /// Smallest message id on the page, used as the `before` cursor.
    pub fn oldest_id(&self) -> Option<i64> {
        self.messages.iter().map(|m| m.id).min()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewMessage {
    pub id: i64,
    pub date: Option<DateTime<Utc>>,
    /// Message text with markup stripped and entities decoded.
    pub text: String,
    pub document: Option<PreviewDocument>,
}

/// A document attached to a preview message. The preview only exposes the
/// file name; `url` is set when the page links the file directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewDocument {
    pub name: String,
    pub url: Option<String>,
}

// --- Bot API types ---

/// Envelope returned by every Bot API method.
#[derive(Debug, Clone, Deserialize)]
pub struct BotResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<u16>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

/// Result of `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub is_bot: bool,
    pub username: Option<String>,
}

/// Body of `sendMessage`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageInput {
    pub chat_id: String,
    pub text: String,
    pub parse_mode: String,
    pub disable_web_page_preview: bool,
}

/// The subset of a sent message we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}
