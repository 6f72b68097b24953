use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Record categories
// ---------------------------------------------------------------------------

/// Connection-scheme family of an extracted record.
///
/// The first five are long-lived connection configs. `Proxy` covers MTProto
/// proxy links, which go stale quickly and are only collected from recent
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Vless,
    Vmess,
    Shadowsocks,
    Trojan,
    Hysteria2,
    Proxy,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Vless,
        Category::Vmess,
        Category::Shadowsocks,
        Category::Trojan,
        Category::Hysteria2,
        Category::Proxy,
    ];

    /// Config families only (everything except `Proxy`).
    pub const CONFIGS: [Category; 5] = [
        Category::Vless,
        Category::Vmess,
        Category::Shadowsocks,
        Category::Trojan,
        Category::Hysteria2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Vless => "vless",
            Category::Vmess => "vmess",
            Category::Shadowsocks => "shadowsocks",
            Category::Trojan => "trojan",
            Category::Hysteria2 => "hysteria2",
            Category::Proxy => "proxy",
        }
    }

    /// Human-facing label used in captions.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Vless => "VLESS",
            Category::Vmess => "VMess",
            Category::Shadowsocks => "Shadowsocks",
            Category::Trojan => "Trojan",
            Category::Hysteria2 => "Hysteria2",
            Category::Proxy => "MTProto",
        }
    }

    /// Records of this category are only taken from messages inside the
    /// lookback window.
    pub fn is_time_sensitive(&self) -> bool {
        matches!(self, Category::Proxy)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vless" => Ok(Category::Vless),
            "vmess" => Ok(Category::Vmess),
            "shadowsocks" | "ss" => Ok(Category::Shadowsocks),
            "trojan" => Ok(Category::Trojan),
            "hysteria2" | "hy2" => Ok(Category::Hysteria2),
            "proxy" | "mtproto" => Ok(Category::Proxy),
            other => Err(format!("unknown record category: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Records and attachments
// ---------------------------------------------------------------------------

/// A category-tagged value extracted verbatim from message text.
/// Identity is the exact value within its category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Record {
    pub category: Category,
    pub value: String,
}

impl Record {
    pub fn new(category: Category, value: impl Into<String>) -> Self {
        Self {
            category,
            value: value.into(),
        }
    }
}

/// A record together with where it came from. Only lives in per-source pools;
/// the global deduplicated sets keep bare values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedRecord {
    pub record: Record,
    pub channel: String,
    pub message_id: i64,
}

/// A downloaded file. Identity is `content_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub path: PathBuf,
    pub content_hash: String,
    pub channel: String,
    pub message_id: i64,
}

/// Ordered keyword table entry for secondary tag classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub tag: String,
    pub keywords: Vec<String>,
}

impl TagRule {
    pub fn new(tag: &str, keywords: &[&str]) -> Self {
        Self {
            tag: tag.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Operator keywords, checked in order. First match wins.
pub fn default_tag_rules() -> Vec<TagRule> {
    vec![
        TagRule::new("mci", &["mci", "hamrah", "همراه اول", "همراه"]),
        TagRule::new("irancell", &["irancell", "mtn", "ایرانسل"]),
        TagRule::new("rightel", &["rightel", "رایتل"]),
        TagRule::new("wifi", &["wifi", "wi-fi", "adsl", "وای فای"]),
    ]
}

// ---------------------------------------------------------------------------
// Run stats
// ---------------------------------------------------------------------------

/// Per-category record counts for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    #[serde(rename = "vless_count")]
    pub vless: u32,
    #[serde(rename = "vmess_count")]
    pub vmess: u32,
    #[serde(rename = "shadowsocks_count")]
    pub shadowsocks: u32,
    #[serde(rename = "trojan_count")]
    pub trojan: u32,
    #[serde(rename = "hysteria2_count")]
    pub hysteria2: u32,
    #[serde(rename = "proxy_count")]
    pub proxy: u32,
}

impl CategoryCounts {
    pub fn get(&self, category: Category) -> u32 {
        match category {
            Category::Vless => self.vless,
            Category::Vmess => self.vmess,
            Category::Shadowsocks => self.shadowsocks,
            Category::Trojan => self.trojan,
            Category::Hysteria2 => self.hysteria2,
            Category::Proxy => self.proxy,
        }
    }

    pub fn add(&mut self, category: Category, n: u32) {
        let slot = match category {
            Category::Vless => &mut self.vless,
            Category::Vmess => &mut self.vmess,
            Category::Shadowsocks => &mut self.shadowsocks,
            Category::Trojan => &mut self.trojan,
            Category::Hysteria2 => &mut self.hysteria2,
            Category::Proxy => &mut self.proxy,
        };
        *slot += n;
    }

    pub fn total(&self) -> u32 {
        Category::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

/// One stats entry per configured source, valid or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub channel: String,
    #[serde(flatten)]
    pub counts: CategoryCounts,
    pub attachment_count: u32,
    pub total_configs: u32,
    pub score: u64,
    pub error: Option<String>,
}

impl SourceStats {
    /// Zero-score entry for a source that could not be fetched.
    pub fn failed(channel: &str, error: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            counts: CategoryCounts::default(),
            attachment_count: 0,
            total_configs: 0,
            score: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Transport-facing types
// ---------------------------------------------------------------------------

/// A resolved, transport-addressable channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub handle: String,
    pub title: Option<String>,
    /// Newest messages already read while resolving, newest first. History
    /// walks start from here instead of fetching them again.
    pub first_page: Vec<ChannelMessage>,
}

/// A file carried by a message. `url` is present when the transport can
/// download it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub name: String,
    pub url: Option<String>,
    pub size: Option<u64>,
}

impl FileRef {
    /// Lowercased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: i64,
    pub date: Option<DateTime<Utc>>,
    pub text: String,
    pub file: Option<FileRef>,
}

/// Text formatting of outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Html,
    Markdown,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
            ParseMode::Markdown => "MarkdownV2",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_total_covers_every_category() {
        let mut counts = CategoryCounts::default();
        for (i, c) in Category::ALL.iter().enumerate() {
            counts.add(*c, i as u32 + 1);
        }
        assert_eq!(counts.total(), 21);
        assert_eq!(counts.get(Category::Proxy), 6);
    }

    #[test]
    fn stats_serialize_with_count_suffixes_and_null_error() {
        let mut counts = CategoryCounts::default();
        counts.add(Category::Vless, 3);
        let stats = SourceStats {
            channel: "@a".to_string(),
            counts,
            attachment_count: 1,
            total_configs: 3,
            score: 5,
            error: None,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["vless_count"], 3);
        assert_eq!(json["proxy_count"], 0);
        assert_eq!(json["channel"], "@a");
        assert!(json["error"].is_null());
    }

    #[test]
    fn category_parses_aliases() {
        assert_eq!("ss".parse::<Category>().unwrap(), Category::Shadowsocks);
        assert_eq!("HY2".parse::<Category>().unwrap(), Category::Hysteria2);
        assert!("socks".parse::<Category>().is_err());
    }

    #[test]
    fn file_extension_is_lowercased() {
        let file = FileRef {
            name: "Config.NPVT".to_string(),
            url: None,
            size: None,
        };
        assert_eq!(file.extension().as_deref(), Some("npvt"));

        let dotfile = FileRef {
            name: ".npvt".to_string(),
            url: None,
            size: None,
        };
        assert_eq!(dotfile.extension(), None);
    }
}
