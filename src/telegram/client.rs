use crate::delivery::{DeliveryError, MediaView, MessagingClient};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const API_BASE: &str = "https://api.telegram.org";

/// Per-request cap on one media upload.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

// ============ TYPES ============

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram {method} failed: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

impl From<TelegramError> for DeliveryError {
    fn from(e: TelegramError) -> Self {
        match e {
            TelegramError::Http(e) => DeliveryError::Transport(e.to_string()),
            api @ TelegramError::Api { .. } => DeliveryError::Rejected(api.to_string()),
        }
    }
}

// ============ CLIENT ============

/// Bot API client. One instance is shared by the poller and all senders.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(format!("{}/bot{}", API_BASE, token))
    }

    /// `base_url` already includes the `/bot<token>` segment.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn call<T, B>(&self, method: &'static str, body: &B) -> Result<T, TelegramError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(self.endpoint(method))
            .json(body)
            .send()
            .await?;
        Self::unwrap_response(method, response).await
    }

    async fn unwrap_response<T: DeserializeOwned>(
        method: &'static str,
        response: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let status = response.status();
        let body: ApiResponse<T> = response.json().await?;

        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TelegramError::Api {
                method,
                description: body
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            }),
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, TelegramError> {
        self.call(
            "sendMessage",
            &serde_json::json!({ "chat_id": chat_id, "text": text }),
        )
        .await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let mut body = serde_json::json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = offset.into();
        }

        let response = self
            .client
            .post(self.endpoint("getUpdates"))
            .timeout(Duration::from_secs(timeout_secs + 10))
            .json(&body)
            .send()
            .await?;
        Self::unwrap_response("getUpdates", response).await
    }

    async fn send_media(
        &self,
        method: &'static str,
        field: &'static str,
        chat_id: i64,
        media: MediaView,
        caption: Option<&str>,
    ) -> Result<Message, TelegramError> {
        let filename = media.filename().to_string();
        let mime = media.mime();
        let len = media.len();
        let part = Part::stream_with_length(media.into_bytes(), len)
            .file_name(filename.clone())
            .mime_str(mime)?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field, part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        debug!(method, chat_id, filename = %filename, bytes = len, "uploading media");
        let response = self
            .client
            .post(self.endpoint(method))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        Self::unwrap_response(method, response).await
    }
}

#[async_trait]
impl MessagingClient for TelegramClient {
    async fn send_video(
        &self,
        chat_id: i64,
        media: MediaView,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError> {
        self.send_media("sendVideo", "video", chat_id, media, caption)
            .await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        media: MediaView,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError> {
        self.send_media("sendPhoto", "photo", chat_id, media, caption)
            .await?;
        Ok(())
    }

    async fn send_audio(
        &self,
        chat_id: i64,
        media: MediaView,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError> {
        self.send_media("sendAudio", "audio", chat_id, media, caption)
            .await?;
        Ok(())
    }
}
