// Parser for the public channel preview served at t.me/s/<channel>.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Node, Selector};

use crate::types::{PreviewDocument, PreviewMessage, PreviewPage};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static MESSAGE: LazyLock<Selector> = LazyLock::new(|| selector(".tgme_widget_message[data-post]"));
static MESSAGE_TEXT: LazyLock<Selector> = LazyLock::new(|| selector(".js-message_text"));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("time[datetime]"));
static DOCUMENT_TITLE: LazyLock<Selector> =
    LazyLock::new(|| selector(".tgme_widget_message_document_title"));
static DOCUMENT_LINK: LazyLock<Selector> =
    LazyLock::new(|| selector("a.tgme_widget_message_document_wrap[href]"));
static CHANNEL_TITLE: LazyLock<Selector> = LazyLock::new(|| selector(".tgme_channel_info_header_title"));

/// Parse a preview page. Unknown markup yields an empty page, never an error.
pub fn parse_preview(html: &str) -> PreviewPage {
    let document = Html::parse_document(html);

    let title = document
        .select(&CHANNEL_TITLE)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty());

    let messages = document.select(&MESSAGE).filter_map(parse_message).collect();

    PreviewPage { title, messages }
}

fn parse_message(block: ElementRef<'_>) -> Option<PreviewMessage> {
    let post = block.value().attr("data-post")?;
    let id: i64 = post.rsplit('/').next()?.trim().parse().ok()?;

    let text = block
        .select(&MESSAGE_TEXT)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let date = block
        .select(&TIME)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let document = block.select(&DOCUMENT_TITLE).next().and_then(|title| {
        let name = element_text(title);
        if name.is_empty() {
            return None;
        }
        // Only direct CDN links are downloadable without a session.
        let url = block
            .select(&DOCUMENT_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .filter(|href| href.starts_with("https://cdn"))
            .map(str::to_string);
        Some(PreviewDocument { name, url })
    });

    Some(PreviewMessage {
        id,
        date,
        text,
        document,
    })
}

/// Text of an element and its descendants, with `<br>` as a newline.
fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) if e.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Convert message markup to plain text: `<br>` becomes a newline, other tags
/// are dropped, entities are decoded.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    element_text(fragment.root_element())
}
