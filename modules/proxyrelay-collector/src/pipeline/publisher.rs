//! Caption formatting and paced delivery of a selected batch.

use std::time::Duration;

use tracing::{info, warn};

use proxyrelay_common::{ParseMode, SourcedRecord, TransportError};

use crate::pipeline::selector::Post;
use crate::traits::Transport;

/// Bot API limit for document captions.
pub const CAPTION_LIMIT: usize = 1024;
/// Bot API limit for message text.
pub const MESSAGE_LIMIT: usize = 4096;

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn proxy_rows(proxies: &[SourcedRecord], row_width: usize) -> Vec<String> {
    let links: Vec<String> = proxies
        .iter()
        .enumerate()
        .map(|(i, p)| format!("<a href=\"{}\">Proxy {}</a>", escape_html(&p.record.value), i + 1))
        .collect();
    links
        .chunks(row_width.max(1))
        .map(|row| row.join(" | "))
        .collect()
}

/// Which parts of a post a caption renders.
#[derive(Debug, Clone, Copy)]
struct Parts {
    record: bool,
    attachment: bool,
    proxies: bool,
}

impl Parts {
    const ALL: Parts = Parts {
        record: true,
        attachment: true,
        proxies: true,
    };
}

fn render(post: &Post, row_width: usize, parts: Parts) -> String {
    let mut lines = vec![format!("<b>{}/{}</b>", post.index, post.total)];

    if let Some(r) = post.record.as_ref().filter(|_| parts.record) {
        lines.push(format!("<b>{}</b>", r.record.category.label()));
        lines.push(format!("<code>{}</code>", escape_html(&r.record.value)));
    }
    if let Some(a) = post.attachment.as_ref().filter(|_| parts.attachment) {
        let name = a
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        lines.push(format!("<b>Config file</b> {}", escape_html(&name)));
    }

    if parts.proxies && !post.proxies.is_empty() {
        lines.push(String::new());
        lines.push("<b>Proxies</b>".to_string());
        lines.extend(proxy_rows(&post.proxies, row_width));
    }

    lines.push(String::new());
    lines.push("<b>Sources</b>".to_string());
    if let Some(source) = post.record_source().filter(|_| parts.record) {
        lines.push(format!("Config: {}", escape_html(source)));
    }
    if let Some(source) = post.attachment_source().filter(|_| parts.attachment) {
        lines.push(format!("File: {}", escape_html(source)));
    }
    if parts.proxies {
        let sources = post.proxy_sources();
        if !sources.is_empty() {
            lines.push(format!("Proxies: {}", escape_html(&sources.join(", "))));
        }
    }

    lines.join("\n")
}

/// HTML caption for one post. `with_proxies = false` leaves out the proxy
/// block, used when the full caption does not fit.
pub fn caption(post: &Post, row_width: usize, with_proxies: bool) -> String {
    render(
        post,
        row_width,
        Parts {
            proxies: with_proxies,
            ..Parts::ALL
        },
    )
}

pub struct Publisher<'a> {
    transport: &'a dyn Transport,
    destination: &'a str,
    delay: Duration,
    row_width: usize,
}

impl<'a> Publisher<'a> {
    pub fn new(transport: &'a dyn Transport, destination: &'a str, delay: Duration, row_width: usize) -> Self {
        Self {
            transport,
            destination,
            delay,
            row_width,
        }
    }

    /// Render `parts`, dropping the proxy block if the result exceeds `limit`.
    fn fitted(&self, post: &Post, parts: Parts, limit: usize) -> String {
        let text = render(post, self.row_width, parts);
        if text.chars().count() <= limit || !parts.proxies {
            return text;
        }
        warn!(post = post.index, "Caption too long, dropping proxy block");
        render(
            post,
            self.row_width,
            Parts {
                proxies: false,
                ..parts
            },
        )
    }

    /// Send one post. A file whose caption cannot hold the record even
    /// without proxies goes out as two sends: the record as a message, then
    /// the file with a short caption.
    async fn deliver(&self, post: &Post) -> Result<(), TransportError> {
        let Some(attachment) = &post.attachment else {
            let text = self.fitted(post, Parts::ALL, MESSAGE_LIMIT);
            return self
                .transport
                .send_message(self.destination, &text, ParseMode::Html)
                .await;
        };

        let full = self.fitted(post, Parts::ALL, CAPTION_LIMIT);
        if full.chars().count() <= CAPTION_LIMIT || post.record.is_none() {
            return self
                .transport
                .send_file(self.destination, &attachment.path, &full, ParseMode::Html)
                .await;
        }

        warn!(post = post.index, "Record too long for a file caption, sending it separately");
        let record_only = Parts {
            attachment: false,
            ..Parts::ALL
        };
        let text = self.fitted(post, record_only, MESSAGE_LIMIT);
        self.transport
            .send_message(self.destination, &text, ParseMode::Html)
            .await?;

        let file_only = Parts {
            record: false,
            attachment: true,
            proxies: false,
        };
        let caption = render(post, self.row_width, file_only);
        self.transport
            .send_file(self.destination, &attachment.path, &caption, ParseMode::Html)
            .await
    }

    /// Deliver every post in order. Returns one success flag per post; a
    /// failed send is logged and the batch continues.
    pub async fn publish(&self, posts: &[Post]) -> Vec<bool> {
        let mut results = Vec::with_capacity(posts.len());
        for (i, post) in posts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }

            match self.deliver(post).await {
                Ok(()) => {
                    info!(post = post.index, total = post.total, "Post sent");
                    results.push(true);
                }
                Err(e) => {
                    warn!(post = post.index, error = %e, "Post failed, continuing with batch");
                    results.push(false);
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use proxyrelay_common::{Attachment, Category, Record};

    fn sourced(category: Category, value: &str, channel: &str) -> SourcedRecord {
        SourcedRecord {
            record: Record::new(category, value),
            channel: channel.to_string(),
            message_id: 1,
        }
    }

    fn post(proxies: usize) -> Post {
        Post {
            index: 2,
            total: 5,
            record: Some(sourced(Category::Vless, "vless://id@host:443?a=1&b=<2>#x", "@configs")),
            attachment: Some(Attachment {
                path: PathBuf::from("/tmp/files/configs_9_pack.npvt"),
                content_hash: "abc".to_string(),
                channel: "@files".to_string(),
                message_id: 9,
            }),
            proxies: (0..proxies)
                .map(|i| sourced(Category::Proxy, &format!("tg://proxy?server=s{i}&port=443"), "@px"))
                .collect(),
        }
    }

    #[test]
    fn caption_has_header_label_escaped_record_and_sources() {
        let text = caption(&post(0), 4, true);
        assert!(text.starts_with("<b>2/5</b>"));
        assert!(text.contains("<b>VLESS</b>"));
        assert!(text.contains("<code>vless://id@host:443?a=1&amp;b=&lt;2&gt;#x</code>"));
        assert!(text.contains("configs_9_pack.npvt"));
        assert!(text.contains("Config: @configs"));
        assert!(text.contains("File: @files"));
        assert!(!text.contains("<b>Proxies</b>"));
    }

    #[test]
    fn proxies_render_in_rows_of_four() {
        let text = caption(&post(6), 4, true);
        let rows: Vec<&str> = text.lines().filter(|l| l.contains("Proxy ")).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].matches("<a href=").count(), 4);
        assert_eq!(rows[1].matches("<a href=").count(), 2);
        assert!(rows[0].contains("tg://proxy?server=s0&amp;port=443"));
        assert!(text.contains("Proxies: @px"));
    }

    #[test]
    fn caption_without_proxies_drops_block_and_source() {
        let text = caption(&post(8), 4, false);
        assert!(!text.contains("Proxy 1"));
        assert!(!text.contains("Proxies: @px"));
    }

    #[tokio::test]
    async fn oversized_record_with_file_is_split_into_two_sends() {
        let transport = crate::testing::MockTransport::new();
        let publisher = Publisher::new(&transport, "@out", Duration::ZERO, 4);
        let mut long = post(8);
        let value = format!("vmess://{}", "A".repeat(1500));
        long.record = Some(sourced(Category::Vmess, &value, "@configs"));

        let results = publisher.publish(&[long]).await;

        assert_eq!(results, vec![true]);
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].file.is_none());
        assert!(sent[0].text.contains(&value));
        assert!(sent[0].text.contains("Proxy 8"));
        let file = &sent[1];
        assert_eq!(file.file.as_deref(), Some(std::path::Path::new("/tmp/files/configs_9_pack.npvt")));
        assert!(file.text.chars().count() <= CAPTION_LIMIT);
        assert!(!file.text.contains("vmess://"));
        assert!(file.text.contains("File: @files"));
    }

    #[tokio::test]
    async fn caption_that_fits_is_sent_with_the_file() {
        let transport = crate::testing::MockTransport::new();
        let publisher = Publisher::new(&transport, "@out", Duration::ZERO, 4);

        assert_eq!(publisher.publish(&[post(8)]).await, vec![true]);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].file.is_some());
        assert!(sent[0].text.contains("vless://"));
    }
}
