//! One complete relay run: collect, dedupe, rank, persist, select, publish.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use typed_builder::TypedBuilder;

use proxyrelay_common::{RelayError, RelayPolicy};

use crate::pipeline::aggregator::Aggregator;
use crate::pipeline::publisher::Publisher;
use crate::pipeline::ranking::{dedupe_records, dedupe_tags, rank, rank_pools};
use crate::pipeline::selector::{Selection, Selector};
use crate::pipeline::stats::RunSummary;
use crate::store::{load_sources, save_sources, OutputStore};
use crate::traits::Transport;

#[derive(TypedBuilder)]
pub struct Relay {
    transport: Arc<dyn Transport>,
    #[builder(default)]
    policy: RelayPolicy,
    #[builder(setter(into))]
    destination: String,
    /// Source list, read at start and rewritten with the valid channels.
    #[builder(setter(into))]
    sources_path: PathBuf,
    #[builder(setter(into))]
    attachments_dir: PathBuf,
    store: OutputStore,
    #[builder(default = true)]
    publish: bool,
}

impl Relay {
    fn select(&self, selector: &Selector<'_>) -> Selection {
        match self.policy.selection_seed {
            Some(seed) => selector.select(&mut StdRng::seed_from_u64(seed)),
            None => selector.select(&mut rand::rng()),
        }
    }

    /// Execute the run. A rejected credential fails before any channel is
    /// processed and before anything is written.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunSummary, RelayError> {
        let channels = load_sources(&self.sources_path).await?;
        let aggregator = Aggregator::new(self.transport.as_ref(), &self.policy, &self.attachments_dir);
        let aggregate = aggregator.run(&channels, now).await?;

        let records = dedupe_records(&aggregate.records);
        let tags = dedupe_tags(&aggregate.tag_buckets());
        let ranked = rank(&aggregate.stats);
        self.store
            .write_artifacts(&records, &tags, &aggregate.invalid, &ranked)
            .await?;

        let pools = rank_pools(&aggregate.pools);
        let selector = Selector::new(&pools, self.policy.posts_per_run, self.policy.proxy_block_size);
        let selection = self.select(&selector);
        self.store.write_selected_proxies(&selection.proxies).await?;

        let mut summary = RunSummary {
            channels_total: channels.len() as u32,
            channels_valid: aggregate.valid.len() as u32,
            channels_invalid: aggregate.invalid.len() as u32,
            unique_by_category: records
                .iter()
                .map(|(c, values)| (*c, values.len() as u32))
                .collect(),
            attachments: aggregate.pools.iter().map(|p| p.attachments.len() as u32).sum(),
            tag_buckets: tags.len() as u32,
            proxies_selected: selection.proxies.len() as u32,
            posts_selected: selection.posts.len() as u32,
            publish_skipped: !self.publish,
            ..Default::default()
        };

        if self.publish {
            let publisher = Publisher::new(
                self.transport.as_ref(),
                &self.destination,
                self.policy.post_delay,
                self.policy.proxy_row_width,
            );
            let results = publisher.publish(&selection.posts).await;
            summary.posts_sent = results.iter().filter(|ok| **ok).count() as u32;
            summary.posts_failed = results.len() as u32 - summary.posts_sent;
        } else {
            info!(posts = selection.posts.len(), "Publishing disabled, skipping batch");
        }

        save_sources(&self.sources_path, &aggregate.valid).await?;

        info!(
            valid = summary.channels_valid,
            invalid = summary.channels_invalid,
            sent = summary.posts_sent,
            "Relay run complete"
        );
        Ok(summary)
    }
}
