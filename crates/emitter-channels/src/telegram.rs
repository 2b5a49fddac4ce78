//! Telegram Bot channel: message and photo delivery via Bot API.
//!
//! Every response is classified into a [`SendOutcome`]:
//! - `ok: true` → delivered (photos return the largest size's `file_id`)
//! - 403, or 400 naming a missing/deactivated chat → unreachable
//! - 429 → throttled, with `parameters.retry_after` when present
//! - anything else (5xx, network, timeouts, other 400s) → transient

use async_trait::async_trait;
use emitter_core::config::TelegramChannelConfig;
use emitter_core::error::{EmitterError, Result};
use emitter_core::traits::Channel;
use emitter_core::types::{Artifact, ArtifactHandle, OutgoingContent, SendOutcome};
use serde::Deserialize;
use std::time::Duration;

/// Telegram Bot channel.
pub struct TelegramChannel {
    config: TelegramChannelConfig,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    /// Get bot info. Used at startup to verify the token.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| EmitterError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| EmitterError::Channel(format!("Invalid getMe response: {e}")))?;
        if !body.ok {
            return Err(EmitterError::Channel(format!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            )));
        }
        body.result
            .ok_or_else(|| EmitterError::Channel("No bot info".into()))
    }

    /// Send a text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> SendOutcome {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        let request = self.client.post(self.api_url("sendMessage")).json(&body);
        self.execute(request).await
    }

    /// Upload a photo.
    pub async fn send_photo(&self, chat_id: i64, artifact: &Artifact) -> SendOutcome {
        let part = match reqwest::multipart::Part::bytes(artifact.bytes.as_ref().clone())
            .file_name(artifact.file_name.clone())
            .mime_str(mime_for(&artifact.file_name))
        {
            Ok(part) => part,
            Err(e) => return SendOutcome::Transient(format!("Invalid photo part: {e}")),
        };
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);
        if let Some(caption) = &artifact.caption {
            form = form.text("caption", caption.clone());
        }
        let request = self.client.post(self.api_url("sendPhoto")).multipart(form);
        self.execute(request).await
    }

    /// Re-send a photo Telegram already stores.
    pub async fn send_cached_photo(
        &self,
        chat_id: i64,
        handle: &ArtifactHandle,
        caption: Option<&str>,
    ) -> SendOutcome {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "photo": handle.0,
        });
        if let Some(caption) = caption {
            body["caption"] = serde_json::Value::String(caption.to_string());
        }
        let request = self.client.post(self.api_url("sendPhoto")).json(&body);
        self.execute(request).await
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> SendOutcome {
        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => return SendOutcome::Transient(format!("Telegram request failed: {e}")),
        };
        let status = response.status().as_u16();
        match response.json::<TelegramApiResponse<serde_json::Value>>().await {
            Ok(body) => {
                if !body.ok {
                    tracing::debug!(
                        "Telegram API {}: {}",
                        body.error_code.unwrap_or(status),
                        body.description.as_deref().unwrap_or("")
                    );
                }
                classify_response(status, &body)
            }
            Err(e) => SendOutcome::Transient(format!("Invalid Telegram response ({status}): {e}")),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, recipient: &str, content: &OutgoingContent) -> SendOutcome {
        let chat_id: i64 = match recipient.parse() {
            Ok(id) => id,
            Err(_) => return SendOutcome::Unreachable(format!("Invalid chat_id '{recipient}'")),
        };
        match content {
            OutgoingContent::Text(text) => self.send_message(chat_id, text).await,
            OutgoingContent::Photo(artifact) => self.send_photo(chat_id, artifact).await,
            OutgoingContent::CachedPhoto { handle, caption } => {
                self.send_cached_photo(chat_id, handle, caption.as_deref()).await
            }
        }
    }
}

/// Map an HTTP status + Bot API body onto a send outcome.
pub fn classify_response(status: u16, body: &TelegramApiResponse<serde_json::Value>) -> SendOutcome {
    if body.ok {
        return SendOutcome::Delivered {
            handle: body.result.as_ref().and_then(largest_photo_id),
        };
    }

    let code = body.error_code.unwrap_or(status);
    let description = body.description.clone().unwrap_or_default();
    match code {
        429 => SendOutcome::Throttled {
            retry_after: body
                .parameters
                .as_ref()
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs),
        },
        403 => SendOutcome::Unreachable(description),
        400 if is_gone(&description) => SendOutcome::Unreachable(description),
        _ => SendOutcome::Transient(format!("Telegram API error {code}: {description}")),
    }
}

fn is_gone(description: &str) -> bool {
    let d = description.to_lowercase();
    ["chat not found", "user not found", "deactivated", "peer_id_invalid", "bot was blocked"]
        .iter()
        .any(|needle| d.contains(needle))
}

/// `sendPhoto` returns a Message whose `photo` lists every size; the last is the largest.
fn largest_photo_id(message: &serde_json::Value) -> Option<ArtifactHandle> {
    message["photo"]
        .as_array()?
        .last()?
        .get("file_id")?
        .as_str()
        .map(|id| ArtifactHandle(id.to_string()))
}

fn mime_for(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/png"
    }
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<u16>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}
