// src/notify/telegram.rs
use reqwest::{multipart, Client, StatusCode};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use super::{Recipient, SendStatus, Transport};

/// Telegram Bot API transport (`sendPhoto` / `sendMessage`).
#[derive(Clone)]
pub struct TelegramTransport {
    api_base: String,
    client: Client,
    timeout: Duration,
}

impl TelegramTransport {
    pub fn new() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Point at another Bot API server (self-hosted or a local stub).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, token, method)
    }

    async fn finish(&self, res: reqwest::Result<reqwest::Response>) -> SendStatus {
        match res {
            Ok(rsp) => {
                let status = rsp.status();
                if status.is_success() {
                    return SendStatus::Delivered;
                }
                let body = rsp.text().await.unwrap_or_default();
                classify(status, &body)
            }
            Err(e) => SendStatus::Failed(format!("telegram request failed: {e}")),
        }
    }
}

impl Default for TelegramTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a non-success HTTP response to a send status.
pub fn classify(status: StatusCode, body: &str) -> SendStatus {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return SendStatus::RateLimited;
    }
    let body = body.trim();
    if body.is_empty() {
        SendStatus::Failed(format!("telegram HTTP {status}"))
    } else {
        SendStatus::Failed(format!("telegram HTTP {status}: {body}"))
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[async_trait::async_trait]
impl Transport for TelegramTransport {
    async fn send_image(&self, to: &Recipient, image: &Path, caption: &str) -> SendStatus {
        let bytes = match tokio::fs::read(image).await {
            Ok(b) => b,
            Err(e) => return SendStatus::Failed(format!("reading {}: {e}", image.display())),
        };
        let file_name = image
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.png")
            .to_string();

        let form = multipart::Form::new()
            .text("chat_id", to.chat_id.clone())
            .text("caption", caption.to_string())
            .part("photo", multipart::Part::bytes(bytes).file_name(file_name));

        let res = self
            .client
            .post(self.method_url(&to.token, "sendPhoto"))
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await;
        self.finish(res).await
    }

    async fn send_text(&self, to: &Recipient, text: &str) -> SendStatus {
        let payload = SendMessage {
            chat_id: &to.chat_id,
            text,
            disable_web_page_preview: true,
        };
        let res = self
            .client
            .post(self.method_url(&to.token, "sendMessage"))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await;
        self.finish(res).await
    }
}
