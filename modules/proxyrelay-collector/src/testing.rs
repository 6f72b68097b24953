// Test mocks for the relay pipeline.
//
// MockTransport stands in for the Telegram transport: channels map to canned
// message lists, file URLs map to canned bytes, and every send is recorded so
// tests can assert on captions, targets and pacing.
//
// Plus helpers for building ChannelMessage values.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};

use proxyrelay_common::{ChannelMessage, ChannelTarget, FileRef, ParseMode, TransportError};

use crate::traits::Transport;

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// One delivered post.
#[derive(Debug, Clone, PartialEq)]
pub struct SentItem {
    pub chat: String,
    pub text: String,
    /// Set for `send_file`.
    pub file: Option<PathBuf>,
    pub at: tokio::time::Instant,
}

/// HashMap-based transport. Unregistered channels fail to resolve,
/// unregistered file URLs fail to download.
/// Builder pattern: `.on_channel()`, `.failing_after()`, `.ignoring_limit()`, `.on_file()`,
/// `.failing_send()`.
#[derive(Default)]
pub struct MockTransport {
    unauthorized: bool,
    channels: HashMap<String, Vec<ChannelMessage>>,
    fail_after: HashMap<String, usize>,
    files: HashMap<String, Vec<u8>>,
    failing_sends: HashSet<usize>,
    ignore_limit: bool,
    send_attempts: Mutex<usize>,
    sent: Mutex<Vec<SentItem>>,
    downloads: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `authorize` call fails.
    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }

    /// Register a channel with its history, newest first.
    pub fn on_channel(mut self, handle: &str, messages: Vec<ChannelMessage>) -> Self {
        self.channels.insert(handle.to_string(), messages);
        self
    }

    /// The history walk of `handle` errors after yielding `n` messages.
    pub fn failing_after(mut self, handle: &str, n: usize) -> Self {
        self.fail_after.insert(handle.to_string(), n);
        self
    }

    /// History walks return every registered message, whatever the limit.
    pub fn ignoring_limit(mut self) -> Self {
        self.ignore_limit = true;
        self
    }

    pub fn on_file(mut self, url: &str, bytes: &[u8]) -> Self {
        self.files.insert(url.to_string(), bytes.to_vec());
        self
    }

    /// The send attempt at this 0-based position fails.
    pub fn failing_send(mut self, attempt: usize) -> Self {
        self.failing_sends.insert(attempt);
        self
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().unwrap().clone()
    }

    /// URLs passed to `download`, in call order.
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    fn record_send(&self, chat: &str, text: &str, file: Option<&Path>) -> Result<(), TransportError> {
        let attempt = {
            let mut attempts = self.send_attempts.lock().unwrap();
            let current = *attempts;
            *attempts += 1;
            current
        };
        if self.failing_sends.contains(&attempt) {
            return Err(TransportError::Network(format!("send {attempt} rejected")));
        }
        self.sent.lock().unwrap().push(SentItem {
            chat: chat.to_string(),
            text: text.to_string(),
            file: file.map(Path::to_path_buf),
            at: tokio::time::Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn authorize(&self) -> Result<(), TransportError> {
        if self.unauthorized {
            return Err(TransportError::Unauthorized("token rejected".to_string()));
        }
        Ok(())
    }

    async fn resolve(&self, handle: &str) -> Result<ChannelTarget, TransportError> {
        if !self.channels.contains_key(handle) {
            return Err(TransportError::NotFound(format!("{handle} does not exist")));
        }
        Ok(ChannelTarget {
            handle: handle.to_string(),
            title: Some(handle.trim_start_matches('@').to_string()),
            first_page: Vec::new(),
        })
    }

    fn messages<'a>(
        &'a self,
        target: &'a ChannelTarget,
        limit: u32,
    ) -> BoxStream<'a, Result<ChannelMessage, TransportError>> {
        let history = self.channels.get(&target.handle).cloned().unwrap_or_default();
        let limit = if self.ignore_limit { usize::MAX } else { limit as usize };
        let mut items: Vec<Result<ChannelMessage, TransportError>> = history
            .into_iter()
            .take(limit)
            .map(Ok)
            .collect();
        if let Some(&n) = self.fail_after.get(&target.handle) {
            items.truncate(n);
            items.push(Err(TransportError::Network("connection reset".to_string())));
        }
        stream::iter(items).boxed()
    }

    async fn download(&self, file: &FileRef, dest: &Path) -> Result<PathBuf, TransportError> {
        let url = file
            .url
            .clone()
            .ok_or_else(|| TransportError::Unsupported(format!("{} has no download link", file.name)))?;
        self.downloads.lock().unwrap().push(url.clone());
        let bytes = self
            .files
            .get(&url)
            .ok_or_else(|| TransportError::Network(format!("download of {url} failed")))?;
        tokio::fs::write(dest, bytes).await?;
        Ok(dest.to_path_buf())
    }

    async fn send_message(&self, chat: &str, text: &str, _mode: ParseMode) -> Result<(), TransportError> {
        self.record_send(chat, text, None)
    }

    async fn send_file(
        &self,
        chat: &str,
        path: &Path,
        caption: &str,
        _mode: ParseMode,
    ) -> Result<(), TransportError> {
        self.record_send(chat, caption, Some(path))
    }
}

// ---------------------------------------------------------------------------
// Message helpers
// ---------------------------------------------------------------------------

/// Undated text message (counts as recent).
pub fn message(id: i64, text: &str) -> ChannelMessage {
    ChannelMessage {
        id,
        date: None,
        text: text.to_string(),
        file: None,
    }
}

pub fn dated_message(id: i64, date: DateTime<Utc>, text: &str) -> ChannelMessage {
    ChannelMessage {
        date: Some(date),
        ..message(id, text)
    }
}

/// Message carrying a file downloadable from `url`.
pub fn file_message(id: i64, name: &str, url: &str) -> ChannelMessage {
    ChannelMessage {
        file: Some(FileRef {
            name: name.to_string(),
            url: Some(url.to_string()),
            size: None,
        }),
        ..message(id, "")
    }
}
