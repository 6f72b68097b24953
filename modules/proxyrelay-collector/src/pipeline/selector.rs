//! Batch selection for outbound posts.
//!
//! A batch is built by running fixed strategies in order until it holds
//! `batch_size` picks:
//!
//! 1. primary   - one paired pick from each randomly sampled channel
//! 2. fallback  - paired picks from the best-ranked channel until it runs dry
//! 3. resweep   - leftover records and files of the sampled channels, taken
//!    independently and zipped together
//! 4. remaining - paired picks from every other valid channel, in rank order
//! 5. repeat    - earlier picks again, cyclically, to fill the batch
//!
//! The order is part of the contract: the same pools and seed always give the
//! same batch.

use std::collections::HashSet;

use rand::Rng;
use tracing::{debug, info};

use proxyrelay_common::{Attachment, SourcedRecord};

use crate::pipeline::aggregator::SourcePool;

/// One record and/or one file. Never both empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    pub record: Option<SourcedRecord>,
    pub attachment: Option<Attachment>,
}

/// A ready-to-format post.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    /// 1-based position in the batch.
    pub index: usize,
    pub total: usize,
    pub record: Option<SourcedRecord>,
    pub attachment: Option<Attachment>,
    /// Proxy block shared by every post of the batch.
    pub proxies: Vec<SourcedRecord>,
}

impl Post {
    pub fn record_source(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.channel.as_str())
    }

    pub fn attachment_source(&self) -> Option<&str> {
        self.attachment.as_ref().map(|a| a.channel.as_str())
    }

    /// Channels contributing to the proxy block, first appearance order.
    pub fn proxy_sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.proxies
            .iter()
            .map(|p| p.channel.as_str())
            .filter(|c| seen.insert(*c))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub posts: Vec<Post>,
    pub proxies: Vec<SourcedRecord>,
}

// ---------------------------------------------------------------------------
// Strategy plumbing
// ---------------------------------------------------------------------------

struct Plan<'a> {
    /// Valid channel pools, best score first.
    pools: &'a [SourcePool],
    /// Indices into `pools`, in sample order.
    primaries: Vec<usize>,
    fallback: Option<usize>,
}

/// Per-pool cursors plus the picks made so far.
struct SelectionState {
    record_cursor: Vec<usize>,
    attachment_cursor: Vec<usize>,
    picks: Vec<Pick>,
}

impl SelectionState {
    fn new(pools: usize) -> Self {
        Self {
            record_cursor: vec![0; pools],
            attachment_cursor: vec![0; pools],
            picks: Vec::new(),
        }
    }

    fn next_record(&mut self, plan: &Plan<'_>, i: usize) -> Option<SourcedRecord> {
        let record = plan.pools[i].records.get(self.record_cursor[i])?.clone();
        self.record_cursor[i] += 1;
        Some(record)
    }

    fn next_attachment(&mut self, plan: &Plan<'_>, i: usize) -> Option<Attachment> {
        let attachment = plan.pools[i].attachments.get(self.attachment_cursor[i])?.clone();
        self.attachment_cursor[i] += 1;
        Some(attachment)
    }

    /// Next unused record paired with next unused file of the same pool.
    fn paired(&mut self, plan: &Plan<'_>, i: usize) -> Option<Pick> {
        let record = self.next_record(plan, i);
        let attachment = self.next_attachment(plan, i);
        if record.is_none() && attachment.is_none() {
            return None;
        }
        Some(Pick { record, attachment })
    }

    /// Paired picks from pool `i` until it is dry or `needed` is reached.
    fn drain(&mut self, plan: &Plan<'_>, i: usize, picks: &mut Vec<Pick>, needed: usize) {
        while picks.len() < needed {
            match self.paired(plan, i) {
                Some(p) => picks.push(p),
                None => break,
            }
        }
    }
}

type Strategy = fn(&Plan<'_>, &mut SelectionState, usize) -> Vec<Pick>;

const STRATEGIES: [(&str, Strategy); 5] = [
    ("primary", primary_picks),
    ("fallback", fallback_picks),
    ("resweep", resweep_picks),
    ("remaining", remaining_picks),
    ("repeat", cyclic_repeat),
];

fn primary_picks(plan: &Plan<'_>, state: &mut SelectionState, needed: usize) -> Vec<Pick> {
    let mut picks = Vec::new();
    for &i in &plan.primaries {
        if picks.len() == needed {
            break;
        }
        if let Some(p) = state.paired(plan, i) {
            picks.push(p);
        }
    }
    picks
}

fn fallback_picks(plan: &Plan<'_>, state: &mut SelectionState, needed: usize) -> Vec<Pick> {
    let mut picks = Vec::new();
    if let Some(i) = plan.fallback {
        state.drain(plan, i, &mut picks, needed);
    }
    picks
}

fn resweep_picks(plan: &Plan<'_>, state: &mut SelectionState, needed: usize) -> Vec<Pick> {
    let mut picks = Vec::new();
    while picks.len() < needed {
        let record = plan
            .primaries
            .iter()
            .find_map(|&i| state.next_record(plan, i));
        let attachment = plan
            .primaries
            .iter()
            .find_map(|&i| state.next_attachment(plan, i));
        if record.is_none() && attachment.is_none() {
            break;
        }
        picks.push(Pick { record, attachment });
    }
    picks
}

fn remaining_picks(plan: &Plan<'_>, state: &mut SelectionState, needed: usize) -> Vec<Pick> {
    let mut picks = Vec::new();
    for i in 0..plan.pools.len() {
        if plan.primaries.contains(&i) || plan.fallback == Some(i) {
            continue;
        }
        state.drain(plan, i, &mut picks, needed);
    }
    picks
}

fn cyclic_repeat(_plan: &Plan<'_>, state: &mut SelectionState, needed: usize) -> Vec<Pick> {
    if state.picks.is_empty() {
        return Vec::new();
    }
    let len = state.picks.len();
    (0..needed).map(|k| state.picks[k % len].clone()).collect()
}

/// Up to `size` distinct proxies: round-robin over the sampled channels,
/// then topped up from the fallback channel.
fn proxy_block(plan: &Plan<'_>, size: usize) -> Vec<SourcedRecord> {
    let mut block: Vec<SourcedRecord> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut cursors = vec![0usize; plan.primaries.len()];

    'rounds: loop {
        let mut progressed = false;
        for (slot, &i) in plan.primaries.iter().enumerate() {
            if block.len() >= size {
                break 'rounds;
            }
            let proxies = &plan.pools[i].proxies;
            while let Some(p) = proxies.get(cursors[slot]) {
                cursors[slot] += 1;
                if seen.insert(p.record.value.as_str()) {
                    block.push(p.clone());
                    progressed = true;
                    break;
                }
            }
        }
        if !progressed {
            break;
        }
    }

    if let Some(f) = plan.fallback {
        for p in &plan.pools[f].proxies {
            if block.len() >= size {
                break;
            }
            if seen.insert(p.record.value.as_str()) {
                block.push(p.clone());
            }
        }
    }
    block
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

pub struct Selector<'a> {
    pools: &'a [SourcePool],
    batch_size: usize,
    proxy_block_size: usize,
}

impl<'a> Selector<'a> {
    /// `ranked_pools` must hold valid channels only, best score first.
    pub fn new(ranked_pools: &'a [SourcePool], batch_size: usize, proxy_block_size: usize) -> Self {
        Self {
            pools: ranked_pools,
            batch_size,
            proxy_block_size,
        }
    }

    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Selection {
        let sample_size = self.batch_size.min(self.pools.len());
        let primaries = rand::seq::index::sample(rng, self.pools.len(), sample_size).into_vec();
        let plan = Plan {
            pools: self.pools,
            primaries,
            fallback: if self.pools.is_empty() { None } else { Some(0) },
        };

        let mut state = SelectionState::new(self.pools.len());
        for (name, strategy) in STRATEGIES {
            let needed = self.batch_size.saturating_sub(state.picks.len());
            if needed == 0 {
                break;
            }
            let extra = strategy(&plan, &mut state, needed);
            debug!(strategy = name, added = extra.len(), "Selection strategy applied");
            state.picks.extend(extra);
        }

        let proxies = proxy_block(&plan, self.proxy_block_size);
        let total = state.picks.len();
        let posts = state
            .picks
            .into_iter()
            .enumerate()
            .map(|(i, pick)| Post {
                index: i + 1,
                total,
                record: pick.record,
                attachment: pick.attachment,
                proxies: proxies.clone(),
            })
            .collect::<Vec<_>>();

        info!(
            posts = posts.len(),
            proxies = proxies.len(),
            sampled = plan.primaries.len(),
            "Selected batch"
        );
        Selection { posts, proxies }
    }
}
