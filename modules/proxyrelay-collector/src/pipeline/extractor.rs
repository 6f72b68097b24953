//! Lexical record extraction.
//!
//! One regex per category defines what a record looks like. Extraction itself
//! is a single left-to-right scan over scheme anchors: a record runs from its
//! anchor to the next whitespace or the next anchor, whichever comes first.
//! Records therefore never overlap, and a text like `vless://a,ss://b` yields
//! two records instead of one vless record with a shadowsocks record inside.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use proxyrelay_common::{Category, TagRule};

static VLESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bvless://\S+").expect("valid regex"));
static VMESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bvmess://\S+").expect("valid regex"));
static SHADOWSOCKS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bss://\S+").expect("valid regex"));
static TROJAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\btrojan://\S+").expect("valid regex"));
static HYSTERIA2_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:hysteria2|hy2)://\S+").expect("valid regex"));
static PROXY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\btg://proxy\?|\bhttps?://t\.me/proxy\?)\S+").expect("valid regex")
});

/// Start of any record, every category.
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:vless|vmess|ss|trojan|hysteria2|hy2)://|\btg://proxy\?|\bhttps?://t\.me/proxy\?")
        .expect("valid regex")
});

/// The pattern a category's records must match.
pub fn pattern(category: Category) -> &'static Regex {
    match category {
        Category::Vless => &VLESS_RE,
        Category::Vmess => &VMESS_RE,
        Category::Shadowsocks => &SHADOWSOCKS_RE,
        Category::Trojan => &TROJAN_RE,
        Category::Hysteria2 => &HYSTERIA2_RE,
        Category::Proxy => &PROXY_RE,
    }
}

fn anchor_category(anchor: &str) -> Category {
    match anchor.split("://").next().unwrap_or_default() {
        "vless" => Category::Vless,
        "vmess" => Category::Vmess,
        "ss" => Category::Shadowsocks,
        "trojan" => Category::Trojan,
        "hysteria2" | "hy2" => Category::Hysteria2,
        _ => Category::Proxy,
    }
}

/// Every record in `text` with its category, in text order.
fn scan(text: &str) -> Vec<(Category, &str)> {
    let anchors: Vec<regex::Match<'_>> = ANCHOR_RE.find_iter(text).collect();
    anchors
        .iter()
        .enumerate()
        .filter_map(|(i, anchor)| {
            let limit = anchors.get(i + 1).map_or(text.len(), |next| next.start());
            let body = &text[anchor.end()..limit];
            let len = body.find(char::is_whitespace).unwrap_or(body.len());
            if len == 0 {
                return None;
            }
            Some((anchor_category(anchor.as_str()), &text[anchor.start()..anchor.end() + len]))
        })
        .collect()
}

/// Extract every record from `text`, grouped by category in match order.
/// Categories without matches are absent from the map.
pub fn extract(text: &str) -> BTreeMap<Category, Vec<String>> {
    extract_categories(text, &Category::ALL)
}

/// Like [`extract`] but limited to `categories`.
pub fn extract_categories(text: &str, categories: &[Category]) -> BTreeMap<Category, Vec<String>> {
    let mut found: BTreeMap<Category, Vec<String>> = BTreeMap::new();
    for (category, value) in scan(text) {
        if categories.contains(&category) {
            found.entry(category).or_default().push(value.to_string());
        }
    }
    found
}

/// Case-insensitive keyword classifier over an ordered rule table.
pub struct TagClassifier {
    rules: Vec<TagRule>,
}

impl TagClassifier {
    pub fn new(rules: &[TagRule]) -> Self {
        let rules = rules
            .iter()
            .map(|r| TagRule {
                tag: r.tag.clone(),
                keywords: r
                    .keywords
                    .iter()
                    .map(|k| k.to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self { rules }
    }

    /// Tag of the first rule with a keyword occurring in `text`.
    pub fn classify(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.rules
            .iter()
            .find(|r| r.keywords.iter().any(|k| haystack.contains(k.as_str())))
            .map(|r| r.tag.as_str())
    }
}
