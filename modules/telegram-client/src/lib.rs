pub mod error;
pub mod preview;
pub mod types;

pub use error::{Result, TelegramError};
pub use preview::{html_to_text, parse_preview};
pub use types::{
    BotResponse, BotUser, PreviewDocument, PreviewMessage, PreviewPage, SendMessageInput,
    SentMessage,
};

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

const PREVIEW_BASE_URL: &str = "https://t.me";
const BOT_API_BASE_URL: &str = "https://api.telegram.org";

/// Plain HTTP client for Telegram. Reads public channels through the web
/// preview and writes through the Bot API.
pub struct TelegramClient {
    client: reqwest::Client,
    bot_token: String,
    preview_base: String,
    api_base: String,
}

impl TelegramClient {
    pub fn new(bot_token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; proxyrelay/0.1)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            bot_token,
            preview_base: PREVIEW_BASE_URL.to_string(),
            api_base: BOT_API_BASE_URL.to_string(),
        }
    }

    /// Point the client at different hosts (mirrors, local test servers).
    pub fn with_base_urls(mut self, preview_base: &str, api_base: &str) -> Self {
        self.preview_base = preview_base.trim_end_matches('/').to_string();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Normalize `@name`, `t.me/name` and `https://t.me/s/name` to `name`.
    pub fn channel_name(handle: &str) -> String {
        let trimmed = handle.trim();
        let without_scheme = trimmed
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let without_host = without_scheme
            .strip_prefix("t.me/")
            .or_else(|| without_scheme.strip_prefix("telegram.me/"))
            .unwrap_or(without_scheme);
        let without_preview = without_host.strip_prefix("s/").unwrap_or(without_host);
        without_preview
            .trim_start_matches('@')
            .split(['/', '?'])
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Fetch one page of a channel preview. `before` pages back in history.
    pub async fn fetch_preview(&self, channel: &str, before: Option<i64>) -> Result<PreviewPage> {
        let name = Self::channel_name(channel);
        if name.is_empty() {
            return Err(TelegramError::ChannelNotFound(channel.to_string()));
        }
        let mut url = format!("{}/s/{}", self.preview_base, name);
        if let Some(before) = before {
            url.push_str(&format!("?before={before}"));
        }

        tracing::debug!(channel = name.as_str(), ?before, "Fetching channel preview");
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(TelegramError::ChannelNotFound(name));
        }
        if status.as_u16() == 429 {
            return Err(TelegramError::RateLimited { retry_after: 30 });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TelegramError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let html = resp.text().await?;
        Ok(parse_preview(&html))
    }

    /// Check the bot credential.
    pub async fn get_me(&self) -> Result<BotUser> {
        let url = format!("{}/bot{}/getMe", self.api_base, self.bot_token);
        let resp = self.client.get(&url).send().await?;
        Self::bot_result(resp).await
    }

    /// Send a text message to a chat (`@channel` or numeric id).
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: &str,
    ) -> Result<SentMessage> {
        let input = SendMessageInput {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            parse_mode: parse_mode.to_string(),
            disable_web_page_preview: true,
        };
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let resp = self.client.post(&url).json(&input).send().await?;
        Self::bot_result(resp).await
    }

    /// Upload a local file as a document with a caption.
    pub async fn send_document(
        &self,
        chat_id: &str,
        path: &Path,
        caption: &str,
        parse_mode: &str,
    ) -> Result<SentMessage> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", parse_mode.to_string())
            .part("document", part);

        let url = format!("{}/bot{}/sendDocument", self.api_base, self.bot_token);
        let resp = self.client.post(&url).multipart(form).send().await?;
        Self::bot_result(resp).await
    }

    /// Download a file by URL into `dest`.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TelegramError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        let bytes = resp.bytes().await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        tracing::debug!(url, bytes = bytes.len(), dest = %dest.display(), "Downloaded file");
        Ok(())
    }

    async fn bot_result<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        let parsed: BotResponse<T> = serde_json::from_str(&body).map_err(|_| TelegramError::Api {
            status,
            message: body.clone(),
        })?;

        if parsed.ok {
            return parsed
                .result
                .ok_or_else(|| TelegramError::Parse("ok response without result".to_string()));
        }

        let description = parsed.description.unwrap_or_default();
        match parsed.error_code.unwrap_or(status) {
            401 => Err(TelegramError::Unauthorized(description)),
            429 => Err(TelegramError::RateLimited {
                retry_after: parsed
                    .parameters
                    .and_then(|p| p.retry_after)
                    .unwrap_or(30),
            }),
            code => Err(TelegramError::Api {
                status: code,
                message: description,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_normalizes_handles() {
        assert_eq!(TelegramClient::channel_name("@V2RayNG_VPN"), "V2RayNG_VPN");
        assert_eq!(TelegramClient::channel_name("https://t.me/s/freecfg"), "freecfg");
        assert_eq!(TelegramClient::channel_name("t.me/freecfg/123"), "freecfg");
        assert_eq!(TelegramClient::channel_name("  freecfg "), "freecfg");
        assert_eq!(TelegramClient::channel_name("@"), "");
    }

    #[test]
    fn bot_response_error_shape_deserializes() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests","parameters":{"retry_after":7}}"#;
        let parsed: BotResponse<SentMessage> = serde_json::from_str(body).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.error_code, Some(429));
        assert_eq!(parsed.parameters.and_then(|p| p.retry_after), Some(7));
    }
}
