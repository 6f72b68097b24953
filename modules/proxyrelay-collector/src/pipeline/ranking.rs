//! Deduplication of global pools and score ranking.

use std::collections::{BTreeMap, BTreeSet};

use proxyrelay_common::{Category, SourceStats};

use crate::pipeline::aggregator::SourcePool;

/// Unique values of one pool. Sorted, so persisted output is stable across
/// runs over the same content.
pub fn dedupe<'a, I>(values: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    values.into_iter().cloned().collect()
}

/// Collapse every category pool to its unique values. Every category is
/// present in the result, empty or not.
pub fn dedupe_records(pools: &BTreeMap<Category, Vec<String>>) -> BTreeMap<Category, BTreeSet<String>> {
    Category::ALL
        .iter()
        .map(|c| (*c, pools.get(c).map(|v| dedupe(v)).unwrap_or_default()))
        .collect()
}

/// Collapse tag buckets to unique values.
pub fn dedupe_tags(buckets: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, BTreeSet<String>> {
    buckets
        .iter()
        .map(|(tag, values)| (tag.clone(), dedupe(values)))
        .collect()
}

/// Stats sorted by score, highest first. Ties keep configuration order.
pub fn rank(stats: &[SourceStats]) -> Vec<SourceStats> {
    let mut ranked = stats.to_vec();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

/// Pools sorted the same way as [`rank`].
pub fn rank_pools(pools: &[SourcePool]) -> Vec<SourcePool> {
    let mut ranked = pools.to_vec();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}
