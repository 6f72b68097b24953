//! Property tests for the pure pipeline stages: extraction, dedup, selection.

use std::collections::HashSet;
use std::path::PathBuf;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use proxyrelay_collector::pipeline::aggregator::SourcePool;
use proxyrelay_collector::pipeline::extractor::{extract, pattern};
use proxyrelay_collector::pipeline::ranking::dedupe;
use proxyrelay_collector::pipeline::selector::Selector;
use proxyrelay_common::{Attachment, Category, Record, SourcedRecord};

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Message text glued together from scheme prefixes, separators and short
/// runs of record-ish characters.
fn message_text() -> impl Strategy<Value = String> {
    let fragment = prop_oneof![
        Just("vless://".to_string()),
        Just("vmess://".to_string()),
        Just("ss://".to_string()),
        Just("trojan://".to_string()),
        Just("hy2://".to_string()),
        Just("tg://proxy?".to_string()),
        Just(",".to_string()),
        Just(" ".to_string()),
        Just("|".to_string()),
        Just("\n".to_string()),
        "[a-z0-9@:#.=&]{0,6}",
    ];
    prop::collection::vec(fragment, 0..16).prop_map(|parts| parts.concat())
}

fn sourced(category: Category, channel: &str, value: String) -> SourcedRecord {
    SourcedRecord {
        record: Record::new(category, value),
        channel: channel.to_string(),
        message_id: 1,
    }
}

/// Pools of random shape: (records, attachments, proxies, score) per channel.
fn pools() -> impl Strategy<Value = Vec<SourcePool>> {
    prop::collection::vec((0usize..4, 0usize..3, 0usize..5, 0u64..10), 0..6).prop_map(|shapes| {
        shapes
            .into_iter()
            .enumerate()
            .map(|(c, (records, attachments, proxies, score))| {
                let channel = format!("@c{c}");
                SourcePool {
                    records: (0..records)
                        .map(|i| sourced(Category::Vless, &channel, format!("vless://{c}-{i}@h:443")))
                        .collect(),
                    attachments: (0..attachments)
                        .map(|i| Attachment {
                            path: PathBuf::from(format!("/tmp/{c}_{i}.npvt")),
                            content_hash: format!("{c}-{i}"),
                            channel: channel.clone(),
                            message_id: i as i64,
                        })
                        .collect(),
                    // Overlapping values across channels exercise proxy dedup.
                    proxies: (0..proxies)
                        .map(|i| sourced(Category::Proxy, &channel, format!("tg://proxy?server=s{}", c % 2 + i)))
                        .collect(),
                    channel,
                    score,
                }
            })
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn extracted_records_are_whole_and_disjoint(text in message_text()) {
        for (category, values) in extract(&text) {
            for value in values {
                prop_assert!(text.contains(&value));

                let own = pattern(category).find(&value);
                prop_assert_eq!(own.map(|m| (m.start(), m.end())), Some((0, value.len())));

                for other in Category::ALL.iter().filter(|c| **c != category) {
                    prop_assert!(
                        pattern(*other).find(&value).is_none(),
                        "{value} also matches {other:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn extraction_accepts_any_text(text in "\\PC{0,200}") {
        let found = extract(&text);
        prop_assert!(found.values().all(|values| !values.is_empty()));
    }

    #[test]
    fn dedupe_is_idempotent_and_never_grows(values in prop::collection::vec("[a-c]{0,2}", 0..20)) {
        let once = dedupe(&values);
        let once_vec: Vec<String> = once.iter().cloned().collect();
        prop_assert_eq!(dedupe(&once_vec), once.clone());
        prop_assert!(once.len() <= values.len());
    }

    #[test]
    fn selection_fills_the_batch_whenever_anything_is_postable(
        pools in pools(),
        batch in 1usize..8,
        block in 1usize..10,
        seed in any::<u64>(),
    ) {
        let selection = Selector::new(&pools, batch, block).select(&mut StdRng::seed_from_u64(seed));

        let postable = pools.iter().any(|p| !p.records.is_empty() || !p.attachments.is_empty());
        prop_assert_eq!(selection.posts.len(), if postable { batch } else { 0 });

        for (i, post) in selection.posts.iter().enumerate() {
            prop_assert_eq!(post.index, i + 1);
            prop_assert_eq!(post.total, selection.posts.len());
            prop_assert!(post.record.is_some() || post.attachment.is_some());
            prop_assert_eq!(&post.proxies, &selection.proxies);
        }

        prop_assert!(selection.proxies.len() <= block);
        let distinct: HashSet<&str> = selection.proxies.iter().map(|p| p.record.value.as_str()).collect();
        prop_assert_eq!(distinct.len(), selection.proxies.len());
    }
}
