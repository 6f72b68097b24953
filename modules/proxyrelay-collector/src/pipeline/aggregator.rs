//! Sequential collection pass over every configured channel.
//!
//! Channels are fetched one at a time. Parallel fetches against the same
//! credential trip flood control, which costs more than the latency.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use proxyrelay_common::{
    Attachment, Category, CategoryCounts, Record, RelayError, RelayPolicy, SourceStats,
    SourcedRecord,
};

use crate::pipeline::extractor::TagClassifier;
use crate::pipeline::fetcher::{FetchOutcome, FetchWindow, SourceFetcher};
use crate::traits::Transport;

/// A valid channel's own records, kept with provenance for selection.
#[derive(Debug, Clone, Default)]
pub struct SourcePool {
    pub channel: String,
    pub score: u64,
    /// Config records (every category except proxies).
    pub records: Vec<SourcedRecord>,
    pub proxies: Vec<SourcedRecord>,
    pub attachments: Vec<Attachment>,
}

impl SourcePool {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.attachments.is_empty() && self.proxies.is_empty()
    }
}

/// Everything one run accumulated. Owned by the aggregator while the pass
/// runs, then handed to the later stages.
#[derive(Debug, Clone, Default)]
pub struct RunAggregate {
    /// Global values per category in arrival order, duplicates included.
    pub records: BTreeMap<Category, Vec<String>>,
    /// Tag of every tagged record. The first channel, in configuration
    /// order, to tag a record decides its bucket.
    pub record_tags: BTreeMap<Record, String>,
    /// One entry per configured channel, in configuration order.
    pub stats: Vec<SourceStats>,
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
    /// Pools of valid channels, in configuration order.
    pub pools: Vec<SourcePool>,
}

impl RunAggregate {
    fn merge_records(&mut self, records: &[SourcedRecord]) {
        for r in records {
            self.records
                .entry(r.record.category)
                .or_default()
                .push(r.record.value.clone());
        }
    }

    fn merge_tags(&mut self, buckets: &BTreeMap<String, Vec<Record>>) {
        for (tag, records) in buckets {
            for record in records {
                self.record_tags
                    .entry(record.clone())
                    .or_insert_with(|| tag.clone());
            }
        }
    }

    /// Values grouped by tag. Each record sits in at most one bucket.
    pub fn tag_buckets(&self) -> BTreeMap<String, Vec<String>> {
        let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (record, tag) in &self.record_tags {
            buckets.entry(tag.clone()).or_default().push(record.value.clone());
        }
        buckets
    }

    fn absorb(&mut self, outcome: FetchOutcome, policy: &RelayPolicy) {
        self.merge_records(&outcome.records);
        self.merge_tags(&outcome.tag_buckets);

        if !outcome.is_valid {
            let reason = outcome
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            self.stats.push(SourceStats::failed(&outcome.channel, reason));
            self.invalid.push(outcome.channel);
            return;
        }

        let mut counts = CategoryCounts::default();
        for r in &outcome.records {
            counts.add(r.record.category, 1);
        }
        let attachment_count = outcome.attachments.len() as u32;
        let score = policy.scoring.score(&counts, attachment_count);

        self.stats.push(SourceStats {
            channel: outcome.channel.clone(),
            counts,
            attachment_count,
            total_configs: counts.total(),
            score,
            error: None,
        });

        let (proxies, records): (Vec<_>, Vec<_>) = outcome
            .records
            .into_iter()
            .partition(|r| r.record.category == Category::Proxy);

        self.valid.push(outcome.channel.clone());
        self.pools.push(SourcePool {
            channel: outcome.channel,
            score,
            records,
            proxies,
            attachments: outcome.attachments,
        });
    }

    pub fn stats_for(&self, channel: &str) -> Option<&SourceStats> {
        self.stats.iter().find(|s| s.channel == channel)
    }

    pub fn pool_for(&self, channel: &str) -> Option<&SourcePool> {
        self.pools.iter().find(|p| p.channel == channel)
    }
}

pub struct Aggregator<'a> {
    transport: &'a dyn Transport,
    policy: &'a RelayPolicy,
    attachments_dir: &'a Path,
}

impl<'a> Aggregator<'a> {
    pub fn new(transport: &'a dyn Transport, policy: &'a RelayPolicy, attachments_dir: &'a Path) -> Self {
        Self {
            transport,
            policy,
            attachments_dir,
        }
    }

    /// Run the collection pass. Only a credential failure is an error; every
    /// per-channel failure is recorded in the aggregate.
    pub async fn run(&self, channels: &[String], now: DateTime<Utc>) -> Result<RunAggregate, RelayError> {
        if let Err(e) = self.transport.authorize().await {
            error!(error = %e, "Transport authorization failed, aborting run");
            return Err(RelayError::Unauthorized(e.to_string()));
        }

        let classifier = TagClassifier::new(&self.policy.tag_rules);
        let window = FetchWindow {
            message_limit: self.policy.message_limit,
            lookback: self.policy.proxy_lookback,
            now,
        };
        let fetcher = SourceFetcher::new(
            self.transport,
            &classifier,
            &self.policy.attachment_extensions,
            self.attachments_dir,
            window,
        );

        let mut aggregate = RunAggregate::default();
        for (i, channel) in channels.iter().enumerate() {
            info!(channel = channel.as_str(), position = i + 1, total = channels.len(), "Fetching channel");
            let outcome = fetcher.fetch(channel).await;
            if !outcome.is_valid {
                warn!(channel = channel.as_str(), error = ?outcome.error, "Channel is invalid");
            }
            aggregate.absorb(outcome, self.policy);
        }

        info!(
            valid = aggregate.valid.len(),
            invalid = aggregate.invalid.len(),
            "Collection pass complete"
        );
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sourced(category: Category, value: &str, channel: &str) -> SourcedRecord {
        SourcedRecord {
            record: Record::new(category, value),
            channel: channel.to_string(),
            message_id: 1,
        }
    }

    #[test]
    fn valid_outcome_is_scored_and_split_into_pools() {
        let policy = RelayPolicy::default();
        let outcome = FetchOutcome {
            channel: "@a".to_string(),
            records: vec![
                sourced(Category::Vless, "vless://1", "@a"),
                sourced(Category::Vless, "vless://2", "@a"),
                sourced(Category::Proxy, "tg://proxy?x", "@a"),
            ],
            is_valid: true,
            ..Default::default()
        };

        let mut aggregate = RunAggregate::default();
        aggregate.absorb(outcome, &policy);

        let stats = aggregate.stats_for("@a").unwrap();
        assert_eq!(stats.counts.vless, 2);
        assert_eq!(stats.counts.proxy, 1);
        assert_eq!(stats.total_configs, 3);
        assert_eq!(stats.score, 3);
        let pool = aggregate.pool_for("@a").unwrap();
        assert_eq!(pool.records.len(), 2);
        assert_eq!(pool.proxies.len(), 1);
        assert_eq!(aggregate.valid, vec!["@a"]);
    }

    fn tagged(channel: &str, tag: &str, value: &str) -> FetchOutcome {
        let record = sourced(Category::Vless, value, channel);
        let mut tag_buckets = BTreeMap::new();
        tag_buckets.insert(tag.to_string(), vec![record.record.clone()]);
        FetchOutcome {
            channel: channel.to_string(),
            records: vec![record],
            tag_buckets,
            is_valid: true,
            ..Default::default()
        }
    }

    #[test]
    fn first_channel_to_tag_a_record_owns_it() {
        let policy = RelayPolicy::default();
        let mut aggregate = RunAggregate::default();
        aggregate.absorb(tagged("@a", "mci", "vless://same@h:443#n"), &policy);
        aggregate.absorb(tagged("@b", "irancell", "vless://same@h:443#n"), &policy);
        aggregate.absorb(tagged("@b", "irancell", "vless://other@h:443#n"), &policy);

        let buckets = aggregate.tag_buckets();
        assert_eq!(buckets["mci"], vec!["vless://same@h:443#n"]);
        assert_eq!(buckets["irancell"], vec!["vless://other@h:443#n"]);
    }

    #[test]
    fn invalid_outcome_keeps_partial_records_but_scores_zero() {
        let policy = RelayPolicy::default();
        let mut tag_buckets = BTreeMap::new();
        tag_buckets.insert("wifi".to_string(), vec![Record::new(Category::Vmess, "vmess://x")]);
        let outcome = FetchOutcome {
            channel: "@b".to_string(),
            records: vec![sourced(Category::Vmess, "vmess://x", "@b")],
            tag_buckets,
            is_valid: false,
            error: Some("Network error: reset".to_string()),
            ..Default::default()
        };

        let mut aggregate = RunAggregate::default();
        aggregate.absorb(outcome, &policy);

        let stats = aggregate.stats_for("@b").unwrap();
        assert_eq!(stats.score, 0);
        assert_eq!(stats.total_configs, 0);
        assert!(stats.error.as_deref().unwrap().contains("reset"));
        assert_eq!(aggregate.records[&Category::Vmess], vec!["vmess://x"]);
        assert_eq!(aggregate.tag_buckets()["wifi"], vec!["vmess://x"]);
        assert!(aggregate.pool_for("@b").is_none());
        assert_eq!(aggregate.invalid, vec!["@b"]);
    }
}
