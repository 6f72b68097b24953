//! Per-channel fetch: resolve, walk recent history, extract, download files.
//!
//! Failures never escape as errors. Resolution failure returns an empty,
//! invalid outcome; a transport error mid-walk returns whatever was gathered
//! up to that point, marked invalid.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use proxyrelay_common::{
    Attachment, Category, ChannelMessage, FileRef, Record, SourcedRecord, TransportError,
};

use crate::pipeline::extractor::{extract_categories, TagClassifier};
use crate::traits::Transport;

/// Bounds of one history walk.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub message_limit: u32,
    pub lookback: chrono::Duration,
    pub now: DateTime<Utc>,
}

impl FetchWindow {
    /// Messages dated before this instant only yield time-insensitive records.
    /// Saturates at the earliest representable instant.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.now
            .checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Categories to extract from a message with this date. Undated
    /// messages count as recent.
    fn categories_for(&self, date: Option<DateTime<Utc>>) -> &'static [Category] {
        const RECENT: &[Category] = &Category::ALL;
        const STALE: &[Category] = &Category::CONFIGS;
        match date {
            Some(d) if d < self.cutoff() => STALE,
            _ => RECENT,
        }
    }
}

/// Everything one channel produced in this run.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub channel: String,
    /// Unique per channel, first occurrence wins.
    pub records: Vec<SourcedRecord>,
    pub tag_buckets: BTreeMap<String, Vec<Record>>,
    pub attachments: Vec<Attachment>,
    pub messages_scanned: u32,
    pub is_valid: bool,
    pub error: Option<String>,
}

impl FetchOutcome {
    fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            is_valid: true,
            ..Default::default()
        }
    }

    fn invalidate(&mut self, err: &TransportError) {
        self.is_valid = false;
        self.error = Some(err.to_string());
    }

    pub fn records_in(&self, category: Category) -> impl Iterator<Item = &SourcedRecord> {
        self.records
            .iter()
            .filter(move |r| r.record.category == category)
    }
}

pub struct SourceFetcher<'a> {
    transport: &'a dyn Transport,
    classifier: &'a TagClassifier,
    attachment_extensions: &'a [String],
    attachments_dir: &'a Path,
    window: FetchWindow,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        classifier: &'a TagClassifier,
        attachment_extensions: &'a [String],
        attachments_dir: &'a Path,
        window: FetchWindow,
    ) -> Self {
        Self {
            transport,
            classifier,
            attachment_extensions,
            attachments_dir,
            window,
        }
    }

    pub async fn fetch(&self, channel: &str) -> FetchOutcome {
        let mut outcome = FetchOutcome::new(channel);

        let target = match self.transport.resolve(channel).await {
            Ok(t) => t,
            Err(e) => {
                warn!(channel, error = %e, "Channel could not be resolved");
                outcome.invalidate(&e);
                return outcome;
            }
        };

        let mut seen_records: HashSet<Record> = HashSet::new();
        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut messages = self
            .transport
            .messages(&target, self.window.message_limit)
            .take(self.window.message_limit as usize);

        while let Some(item) = messages.next().await {
            let message = match item {
                Ok(m) => m,
                Err(e) => {
                    warn!(channel, error = %e, scanned = outcome.messages_scanned, "History walk failed, keeping partial results");
                    outcome.invalidate(&e);
                    break;
                }
            };
            outcome.messages_scanned += 1;

            self.collect_records(&message, &mut outcome, &mut seen_records);

            if let Some(file) = message.file.as_ref() {
                match self.collect_attachment(channel, message.id, file).await {
                    Ok(Some(attachment)) => {
                        if seen_hashes.insert(attachment.content_hash.clone()) {
                            outcome.attachments.push(attachment);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(channel, message_id = message.id, file = file.name.as_str(), error = %e, "Attachment download failed, keeping partial results");
                        outcome.invalidate(&e);
                        break;
                    }
                }
            }
        }

        info!(
            channel,
            messages = outcome.messages_scanned,
            records = outcome.records.len(),
            attachments = outcome.attachments.len(),
            valid = outcome.is_valid,
            "Processed channel"
        );
        outcome
    }

    fn collect_records(
        &self,
        message: &ChannelMessage,
        outcome: &mut FetchOutcome,
        seen: &mut HashSet<Record>,
    ) {
        let categories = self.window.categories_for(message.date);
        let found = extract_categories(&message.text, categories);
        if found.is_empty() {
            return;
        }
        let tag = self.classifier.classify(&message.text);

        for (category, values) in found {
            debug!(channel = outcome.channel.as_str(), message_id = message.id, %category, count = values.len(), "Extracted records");
            for value in values {
                let record = Record::new(category, value);
                if !seen.insert(record.clone()) {
                    continue;
                }
                if let Some(tag) = tag {
                    outcome
                        .tag_buckets
                        .entry(tag.to_string())
                        .or_default()
                        .push(record.clone());
                }
                outcome.records.push(SourcedRecord {
                    record,
                    channel: outcome.channel.clone(),
                    message_id: message.id,
                });
            }
        }
    }

    /// Download a reserved-extension file unless it is already on disk.
    /// Files without a reserved extension or a download link are ignored.
    async fn collect_attachment(
        &self,
        channel: &str,
        message_id: i64,
        file: &FileRef,
    ) -> Result<Option<Attachment>, TransportError> {
        let wanted = file
            .extension()
            .is_some_and(|ext| self.attachment_extensions.iter().any(|e| *e == ext));
        if !wanted {
            return Ok(None);
        }
        if file.url.is_none() {
            debug!(channel, message_id, file = file.name.as_str(), "File has no download link, skipping");
            return Ok(None);
        }

        let dest = attachment_path(self.attachments_dir, channel, message_id, &file.name);
        if tokio::fs::try_exists(&dest).await? {
            debug!(dest = %dest.display(), "Attachment already on disk, skipping download");
        } else {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            self.transport.download(file, &dest).await?;
        }

        let bytes = tokio::fs::read(&dest).await?;
        Ok(Some(Attachment {
            path: dest,
            content_hash: content_hash(&bytes),
            channel: channel.to_string(),
            message_id,
        }))
    }
}

/// `<dir>/<channel>_<message id>_<file name>`, with path-hostile characters
/// replaced.
pub fn attachment_path(dir: &Path, channel: &str, message_id: i64, file_name: &str) -> PathBuf {
    dir.join(format!(
        "{}_{}_{}",
        sanitize(channel.trim_start_matches('@')),
        message_id,
        sanitize(file_name)
    ))
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// SHA-256 of file content, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{message, MockTransport};

    #[test]
    fn old_messages_skip_time_sensitive_categories() {
        let now = Utc::now();
        let window = FetchWindow {
            message_limit: 10,
            lookback: chrono::Duration::hours(24),
            now,
        };
        assert_eq!(window.categories_for(Some(now - chrono::Duration::hours(30))), &Category::CONFIGS);
        assert_eq!(window.categories_for(Some(now - chrono::Duration::hours(1))), &Category::ALL);
        assert_eq!(window.categories_for(None), &Category::ALL);
    }

    #[test]
    fn huge_lookback_saturates_instead_of_overflowing() {
        let window = FetchWindow {
            message_limit: 10,
            lookback: chrono::Duration::MAX,
            now: Utc::now(),
        };
        assert_eq!(window.cutoff(), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window.categories_for(Some(Utc::now())), &Category::ALL);
    }

    #[test]
    fn attachment_path_is_name_addressed_and_sanitized() {
        let path = attachment_path(Path::new("/tmp/a"), "@chan", 42, "my file/../x.npvt");
        assert_eq!(path, Path::new("/tmp/a/chan_42_my_file_.._x.npvt"));
    }

    #[test]
    fn content_hash_is_sha256_hex() {
        let h = content_hash(b"abc");
        assert_eq!(h, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[tokio::test]
    async fn walk_stops_at_message_limit_even_when_transport_overruns() {
        let history = (1..=10)
            .rev()
            .map(|i| message(i, &format!("vless://node{i}@h:443")))
            .collect();
        let transport = MockTransport::new()
            .on_channel("@big", history)
            .ignoring_limit();
        let classifier = TagClassifier::new(&[]);
        let dir = tempfile::tempdir().unwrap();
        let window = FetchWindow {
            message_limit: 3,
            lookback: chrono::Duration::hours(24),
            now: Utc::now(),
        };

        let fetcher = SourceFetcher::new(&transport, &classifier, &[], dir.path(), window);
        let outcome = fetcher.fetch("@big").await;

        assert!(outcome.is_valid);
        assert_eq!(outcome.messages_scanned, 3);
        let values: Vec<&str> = outcome.records.iter().map(|r| r.record.value.as_str()).collect();
        assert_eq!(values, vec!["vless://node10@h:443", "vless://node9@h:443", "vless://node8@h:443"]);
    }
}
