//! Publisher pacing and failure isolation, on a paused clock.

use std::time::Duration;

use proxyrelay_collector::pipeline::publisher::Publisher;
use proxyrelay_collector::pipeline::selector::Post;
use proxyrelay_collector::testing::MockTransport;
use proxyrelay_common::{Category, Record, SourcedRecord};

fn post(index: usize, total: usize) -> Post {
    Post {
        index,
        total,
        record: Some(SourcedRecord {
            record: Record::new(Category::Trojan, format!("trojan://pw{index}@t.example:443")),
            channel: "@src".to_string(),
            message_id: index as i64,
        }),
        attachment: None,
        proxies: Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn posts_are_spaced_by_the_configured_delay() {
    let transport = MockTransport::new();
    let publisher = Publisher::new(&transport, "@out", Duration::from_secs(3), 4);
    let posts: Vec<Post> = (1..=3).map(|i| post(i, 3)).collect();

    let results = publisher.publish(&posts).await;

    assert_eq!(results, vec![true, true, true]);
    let sent = transport.sent();
    assert_eq!(sent.len(), 3);
    for pair in sent.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_secs(3));
    }
    assert!(sent[0].text.starts_with("<b>1/3</b>"));
    assert!(sent[2].text.contains("trojan://pw3@t.example:443"));
}

#[tokio::test(start_paused = true)]
async fn failed_send_does_not_stop_the_batch_or_the_pacing() {
    let transport = MockTransport::new().failing_send(1);
    let publisher = Publisher::new(&transport, "@out", Duration::from_secs(3), 4);
    let posts: Vec<Post> = (1..=3).map(|i| post(i, 3)).collect();

    let results = publisher.publish(&posts).await;

    assert_eq!(results, vec![true, false, true]);
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].at - sent[0].at >= Duration::from_secs(6));
    assert!(sent[1].text.starts_with("<b>3/3</b>"));
}

#[tokio::test]
async fn empty_batch_sends_nothing() {
    let transport = MockTransport::new();
    let publisher = Publisher::new(&transport, "@out", Duration::from_secs(3), 4);
    assert!(publisher.publish(&[]).await.is_empty());
    assert!(transport.sent().is_empty());
}
