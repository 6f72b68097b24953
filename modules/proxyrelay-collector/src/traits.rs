// Transport capability the pipeline talks through.
//
// Everything network-facing (resolving channels, walking history, downloading
// files, posting) sits behind one trait so the pipeline can be driven by
// MockTransport in tests: no network, no credentials.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use proxyrelay_common::{ChannelMessage, ChannelTarget, FileRef, ParseMode, TransportError};
use telegram_client::{PreviewMessage, TelegramClient, TelegramError};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Transport: Send + Sync {
    /// Verify the credential. A failure here aborts the run.
    async fn authorize(&self) -> Result<(), TransportError>;

    /// Resolve a configured handle into an addressable channel.
    async fn resolve(&self, handle: &str) -> Result<ChannelTarget, TransportError>;

    /// Newest-first message history, at most `limit` items. An `Err` item
    /// ends the walk.
    fn messages<'a>(
        &'a self,
        target: &'a ChannelTarget,
        limit: u32,
    ) -> BoxStream<'a, Result<ChannelMessage, TransportError>>;

    /// Download a message file to `dest`.
    async fn download(&self, file: &FileRef, dest: &Path) -> Result<PathBuf, TransportError>;

    async fn send_message(
        &self,
        chat: &str,
        text: &str,
        mode: ParseMode,
    ) -> Result<(), TransportError>;

    async fn send_file(
        &self,
        chat: &str,
        path: &Path,
        caption: &str,
        mode: ParseMode,
    ) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// TelegramClient adapter
// ---------------------------------------------------------------------------

fn transport_error(err: TelegramError) -> TransportError {
    match err {
        TelegramError::Unauthorized(msg) => TransportError::Unauthorized(msg),
        TelegramError::ChannelNotFound(msg) => TransportError::NotFound(msg),
        TelegramError::RateLimited { retry_after } => TransportError::RateLimited { retry_after },
        TelegramError::Io(e) => TransportError::Io(e),
        other => TransportError::Network(other.to_string()),
    }
}

fn channel_message(m: PreviewMessage) -> ChannelMessage {
    ChannelMessage {
        id: m.id,
        date: m.date,
        text: m.text,
        file: m.document.map(|d| FileRef {
            name: d.name,
            url: d.url,
            size: None,
        }),
    }
}

/// Paging state for the preview walk.
struct PreviewCursor {
    before: Option<i64>,
    buffered: VecDeque<ChannelMessage>,
    remaining: u32,
    exhausted: bool,
}

#[async_trait]
impl Transport for TelegramClient {
    async fn authorize(&self) -> Result<(), TransportError> {
        let me = self.get_me().await.map_err(transport_error)?;
        tracing::info!(bot = ?me.username, "Bot credential accepted");
        Ok(())
    }

    async fn resolve(&self, handle: &str) -> Result<ChannelTarget, TransportError> {
        let name = TelegramClient::channel_name(handle);
        let page = self
            .fetch_preview(&name, None)
            .await
            .map_err(transport_error)?;
        if page.title.is_none() {
            return Err(TransportError::NotFound(format!("{handle} is private or does not exist")));
        }
        if page.messages.is_empty() {
            return Err(TransportError::NotFound(format!("{handle} has no public messages")));
        }
        let mut first_page: Vec<ChannelMessage> =
            page.messages.into_iter().map(channel_message).collect();
        first_page.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(ChannelTarget {
            handle: name,
            title: page.title,
            first_page,
        })
    }

    fn messages<'a>(
        &'a self,
        target: &'a ChannelTarget,
        limit: u32,
    ) -> BoxStream<'a, Result<ChannelMessage, TransportError>> {
        let cursor = PreviewCursor {
            before: target.first_page.last().map(|m| m.id),
            buffered: target.first_page.iter().cloned().collect(),
            remaining: limit,
            exhausted: false,
        };

        stream::unfold(cursor, move |mut cur| async move {
            loop {
                if cur.remaining == 0 {
                    return None;
                }
                if let Some(m) = cur.buffered.pop_front() {
                    cur.remaining -= 1;
                    return Some((Ok(m), cur));
                }
                if cur.exhausted {
                    return None;
                }

                match self.fetch_preview(&target.handle, cur.before).await {
                    Ok(page) => {
                        let mut messages: Vec<PreviewMessage> = page
                            .messages
                            .into_iter()
                            .filter(|m| cur.before.map_or(true, |b| m.id < b))
                            .collect();
                        if messages.is_empty() {
                            cur.exhausted = true;
                            continue;
                        }
                        messages.sort_by(|a, b| b.id.cmp(&a.id));
                        cur.before = messages.last().map(|m| m.id);
                        cur.buffered.extend(messages.into_iter().map(channel_message));
                    }
                    Err(e) => {
                        cur.exhausted = true;
                        cur.buffered.clear();
                        return Some((Err(transport_error(e)), cur));
                    }
                }
            }
        })
        .boxed()
    }

    async fn download(&self, file: &FileRef, dest: &Path) -> Result<PathBuf, TransportError> {
        let url = file.url.as_deref().ok_or_else(|| {
            TransportError::Unsupported(format!("{} has no download link", file.name))
        })?;
        TelegramClient::download(self, url, dest)
            .await
            .map_err(transport_error)?;
        Ok(dest.to_path_buf())
    }

    async fn send_message(
        &self,
        chat: &str,
        text: &str,
        mode: ParseMode,
    ) -> Result<(), TransportError> {
        TelegramClient::send_message(self, chat, text, mode.as_str())
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn send_file(
        &self,
        chat: &str,
        path: &Path,
        caption: &str,
        mode: ParseMode,
    ) -> Result<(), TransportError> {
        self.send_document(chat, path, caption, mode.as_str())
            .await
            .map_err(transport_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preloaded(ids: &[i64]) -> ChannelTarget {
        ChannelTarget {
            handle: "relaychan".to_string(),
            title: Some("Relay".to_string()),
            first_page: ids
                .iter()
                .map(|&id| ChannelMessage {
                    id,
                    date: None,
                    text: format!("post {id}"),
                    file: None,
                })
                .collect(),
        }
    }

    // Nothing listens on the discard port, so any page request fails.
    fn offline_client() -> TelegramClient {
        TelegramClient::new("t".to_string())
            .with_base_urls("http://127.0.0.1:9", "http://127.0.0.1:9")
    }

    #[tokio::test]
    async fn walk_starts_from_the_resolved_page_without_refetching_it() {
        let client = offline_client();
        let target = preloaded(&[30, 29, 28]);

        let items: Vec<_> = client.messages(&target, 3).collect().await;
        let ids: Vec<i64> = items.into_iter().map(|m| m.unwrap().id).collect();
        assert_eq!(ids, vec![30, 29, 28]);
    }

    #[tokio::test]
    async fn walk_pages_past_the_resolved_page_only_when_needed() {
        let client = offline_client();
        let target = preloaded(&[30, 29]);

        let items: Vec<_> = client.messages(&target, 5).collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(items[2].is_err());
    }
}
