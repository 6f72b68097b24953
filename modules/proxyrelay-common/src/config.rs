use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::RelayError;
use crate::types::{default_tag_rules, Category, CategoryCounts, TagRule};

/// Weights turning per-source yield counts into a score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringPolicy {
    /// Per-category weight. Categories missing from the map weigh 1.
    pub category_weights: BTreeMap<Category, u32>,
    /// Attachments are scarcer than inline records and weigh more.
    pub attachment_weight: u32,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            category_weights: BTreeMap::new(),
            attachment_weight: 2,
        }
    }
}

impl ScoringPolicy {
    pub fn weight(&self, category: Category) -> u32 {
        self.category_weights.get(&category).copied().unwrap_or(1)
    }

    /// `Σ weight(c) * count(c) + attachments * attachment_weight`.
    pub fn score(&self, counts: &CategoryCounts, attachment_count: u32) -> u64 {
        let records: u64 = Category::ALL
            .iter()
            .map(|c| u64::from(self.weight(*c)) * u64::from(counts.get(*c)))
            .sum();
        records + u64::from(attachment_count) * u64::from(self.attachment_weight)
    }
}

/// Everything that shapes one collection pass.
#[derive(Debug, Clone)]
pub struct RelayPolicy {
    /// Newest messages scanned per channel.
    pub message_limit: u32,
    /// Horizon for time-sensitive categories.
    pub proxy_lookback: chrono::Duration,
    /// Posts published per run.
    pub posts_per_run: usize,
    /// Proxies shared by every post of a run.
    pub proxy_block_size: usize,
    /// Proxy links per caption row.
    pub proxy_row_width: usize,
    /// Pause between two consecutive posts.
    pub post_delay: Duration,
    pub scoring: ScoringPolicy,
    /// Fixed seed for the primary source sample; random when unset.
    pub selection_seed: Option<u64>,
    /// Lowercase file extensions worth downloading.
    pub attachment_extensions: Vec<String>,
    pub tag_rules: Vec<TagRule>,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            message_limit: 200,
            proxy_lookback: chrono::Duration::hours(24),
            posts_per_run: 5,
            proxy_block_size: 8,
            proxy_row_width: 4,
            post_delay: Duration::from_secs(3),
            scoring: ScoringPolicy::default(),
            selection_seed: None,
            attachment_extensions: ["npvt", "hc", "ehi", "ovpn", "nm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tag_rules: default_tag_rules(),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub destination_chat: String,
    pub policy: RelayPolicy,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RelayError> {
        let defaults = RelayPolicy::default();

        let mut scoring = ScoringPolicy {
            attachment_weight: parsed(&lookup, "ATTACHMENT_WEIGHT", defaults.scoring.attachment_weight)?,
            ..ScoringPolicy::default()
        };
        if let Some(raw) = lookup("CATEGORY_WEIGHTS") {
            scoring.category_weights = parse_category_weights(&raw)?;
        }

        let attachment_extensions = match lookup("ATTACHMENT_EXTENSIONS") {
            Some(raw) => raw
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            None => defaults.attachment_extensions,
        };

        let selection_seed = match lookup("SELECTION_SEED") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| {
                RelayError::Config("SELECTION_SEED must be a number".to_string())
            })?),
            None => None,
        };

        let lookback_hours: i64 = parsed(&lookup, "PROXY_LOOKBACK_HOURS", 24)?;
        let proxy_lookback = chrono::Duration::try_hours(lookback_hours)
            .filter(|_| lookback_hours > 0)
            .ok_or_else(|| {
                RelayError::Config(format!(
                    "PROXY_LOOKBACK_HOURS must be a positive number of hours, got {lookback_hours}"
                ))
            })?;
        let post_delay_secs: u64 = parsed(&lookup, "POST_DELAY_SECS", defaults.post_delay.as_secs())?;

        let policy = RelayPolicy {
            message_limit: parsed(&lookup, "MESSAGE_LIMIT", defaults.message_limit)?,
            proxy_lookback,
            posts_per_run: parsed(&lookup, "POSTS_PER_RUN", defaults.posts_per_run)?,
            proxy_block_size: parsed(&lookup, "PROXY_BLOCK_SIZE", defaults.proxy_block_size)?,
            proxy_row_width: parsed(&lookup, "PROXY_ROW_WIDTH", defaults.proxy_row_width)?.max(1),
            post_delay: Duration::from_secs(post_delay_secs),
            scoring,
            selection_seed,
            attachment_extensions,
            tag_rules: defaults.tag_rules,
        };

        Ok(Self {
            bot_token: required(&lookup, "TELEGRAM_BOT_TOKEN")?,
            destination_chat: required(&lookup, "DESTINATION_CHAT")?,
            policy,
        })
    }

    /// Log the effective configuration without the credential.
    pub fn log_redacted(&self) {
        let p = &self.policy;
        info!(
            destination = self.destination_chat.as_str(),
            bot_token = if self.bot_token.is_empty() { "(empty)" } else { "(set)" },
            message_limit = p.message_limit,
            lookback_hours = p.proxy_lookback.num_hours(),
            posts_per_run = p.posts_per_run,
            post_delay_secs = p.post_delay.as_secs(),
            attachment_weight = p.scoring.attachment_weight,
            seed = ?p.selection_seed,
            extensions = ?p.attachment_extensions,
            "Loaded configuration"
        );
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, RelayError> {
    match lookup(key) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(RelayError::Config(format!("{key} environment variable is required"))),
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, RelayError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::Config(format!("{key} must be a number"))),
        None => Ok(default),
    }
}

/// Parse `vless=2,proxy=1` into a weight map.
fn parse_category_weights(raw: &str) -> Result<BTreeMap<Category, u32>, RelayError> {
    let mut weights = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, weight) = pair
            .split_once('=')
            .ok_or_else(|| RelayError::Config(format!("CATEGORY_WEIGHTS entry '{pair}' is not name=weight")))?;
        let category: Category = name.parse().map_err(RelayError::Config)?;
        let weight: u32 = weight
            .trim()
            .parse()
            .map_err(|_| RelayError::Config(format!("CATEGORY_WEIGHTS weight for {name} must be a number")))?;
        weights.insert(category, weight);
    }
    Ok(weights)
}
