//! On-disk run outputs and the source list.
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! crash mid-write never leaves a truncated artifact behind.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use proxyrelay_common::{Category, RelayError, SourceStats, SourcedRecord};

pub const EMPTY_CATEGORY: &str = "No configs found for this protocol.";
pub const EMPTY_INVALID: &str = "No invalid channels found.";
pub const EMPTY_SELECTION: &str = "No proxies selected.";

pub const INVALID_CHANNELS_FILE: &str = "invalid_channels.txt";
pub const CHANNEL_STATS_FILE: &str = "channel_stats.json";
pub const SELECTED_PROXIES_FILE: &str = "selected_proxies.txt";

/// Artifact file name for a category.
pub fn category_file(category: Category) -> String {
    match category {
        Category::Proxy => "proxies.txt".to_string(),
        other => format!("{}.txt", other.as_str()),
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), RelayError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), bytes = contents.len(), "Wrote file");
    Ok(())
}

/// One value per line, or the placeholder line when there are none.
fn lines_or<'a, I>(values: I, placeholder: &str) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut body: String = values.into_iter().map(|v| format!("{v}\n")).collect();
    if body.is_empty() {
        body = format!("{placeholder}\n");
    }
    body
}

pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Category files, tag files, the invalid channel list and channel stats.
    pub async fn write_artifacts(
        &self,
        records: &BTreeMap<Category, BTreeSet<String>>,
        tags: &BTreeMap<String, BTreeSet<String>>,
        invalid: &[String],
        ranked: &[SourceStats],
    ) -> Result<(), RelayError> {
        for category in Category::ALL {
            let values = records.get(&category);
            let body = lines_or(values.into_iter().flatten().map(String::as_str), EMPTY_CATEGORY);
            write_atomic(&self.path(&category_file(category)), body.as_bytes()).await?;
        }

        for (tag, values) in tags {
            let body = lines_or(values.iter().map(String::as_str), EMPTY_CATEGORY);
            write_atomic(&self.root.join("tags").join(format!("{tag}.txt")), body.as_bytes()).await?;
        }

        let body = lines_or(invalid.iter().map(String::as_str), EMPTY_INVALID);
        write_atomic(&self.path(INVALID_CHANNELS_FILE), body.as_bytes()).await?;

        let json = serde_json::to_string_pretty(ranked)?;
        write_atomic(&self.path(CHANNEL_STATS_FILE), json.as_bytes()).await?;

        info!(
            root = %self.root.display(),
            tags = tags.len(),
            channels = ranked.len(),
            "Run artifacts written"
        );
        Ok(())
    }

    pub async fn write_selected_proxies(&self, proxies: &[SourcedRecord]) -> Result<(), RelayError> {
        let body = lines_or(proxies.iter().map(|p| p.record.value.as_str()), EMPTY_SELECTION);
        write_atomic(&self.path(SELECTED_PROXIES_FILE), body.as_bytes()).await
    }
}

// ---------------------------------------------------------------------------
// Source list
// ---------------------------------------------------------------------------

/// Parse a source list: one handle per line, blank lines and `#` comments
/// ignored, duplicates dropped keeping the first.
pub fn parse_sources(contents: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter(|l| seen.insert(l.to_string()))
        .map(str::to_string)
        .collect()
}

pub async fn load_sources(path: &Path) -> Result<Vec<String>, RelayError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let sources = parse_sources(&contents);
    info!(path = %path.display(), count = sources.len(), "Loaded source list");
    Ok(sources)
}

/// Overwrite the source list with `sources`, one per line.
pub async fn save_sources(path: &Path, sources: &[String]) -> Result<(), RelayError> {
    let body: String = sources.iter().map(|s| format!("{s}\n")).collect();
    write_atomic(path, body.as_bytes()).await?;
    info!(path = %path.display(), count = sources.len(), "Saved source list");
    Ok(())
}
