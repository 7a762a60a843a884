use crate::downloader::{MediaKind, MediaPayload};
use crate::error::DownloadError;
use crate::extractor::Platform;
use crate::orchestrator::Download;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn, Instrument};

// ============ MEDIA VIEW ============

/// A read-only view over a payload with its own read position.
#[derive(Debug, Clone)]
pub struct MediaView {
    reader: Cursor<Bytes>,
    kind: MediaKind,
    filename: String,
}

impl MediaView {
    pub fn of(payload: &MediaPayload) -> Self {
        Self {
            reader: payload.view(),
            kind: payload.kind(),
            filename: payload.filename().to_string(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime(&self) -> &'static str {
        self.kind.mime(&self.filename)
    }

    pub fn len(&self) -> u64 {
        self.reader.get_ref().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.reader.get_ref().is_empty()
    }

    pub fn reader(&mut self) -> &mut Cursor<Bytes> {
        &mut self.reader
    }

    /// Remaining bytes from the current position.
    pub fn into_bytes(self) -> Bytes {
        let position = (self.reader.position() as usize).min(self.reader.get_ref().len());
        self.reader.into_inner().slice(position..)
    }
}

// ============ DESTINATIONS ============

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected by destination: {0}")]
    Rejected(String),

    #[error("Destination already filled")]
    Closed,
}

/// Somewhere a finished download can be sent.
#[async_trait]
pub trait Destination: Send + Sync {
    fn label(&self) -> String;

    async fn deliver(&self, media: MediaView, caption: Option<&str>) -> Result<(), DeliveryError>;
}

/// Chat transport able to send the three media kinds.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn send_video(
        &self,
        chat_id: i64,
        media: MediaView,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        media: MediaView,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError>;

    async fn send_audio(
        &self,
        chat_id: i64,
        media: MediaView,
        caption: Option<&str>,
    ) -> Result<(), DeliveryError>;
}

/// A chat or channel reached through a [`MessagingClient`].
pub struct ChatDestination {
    client: Arc<dyn MessagingClient>,
    chat_id: i64,
}

impl ChatDestination {
    pub fn new(client: Arc<dyn MessagingClient>, chat_id: i64) -> Self {
        Self { client, chat_id }
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }
}

#[async_trait]
impl Destination for ChatDestination {
    fn label(&self) -> String {
        format!("chat:{}", self.chat_id)
    }

    async fn deliver(&self, media: MediaView, caption: Option<&str>) -> Result<(), DeliveryError> {
        match media.kind() {
            MediaKind::Video => self.client.send_video(self.chat_id, media, caption).await,
            MediaKind::Image => self.client.send_photo(self.chat_id, media, caption).await,
            MediaKind::Audio => self.client.send_audio(self.chat_id, media, caption).await,
        }
    }
}

/// Holds the media for an HTTP handler to write into its response.
#[derive(Default)]
pub struct ResponseSlot {
    slot: Mutex<Option<MediaView>>,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Option<MediaView> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[async_trait]
impl Destination for ResponseSlot {
    fn label(&self) -> String {
        "http-response".to_string()
    }

    async fn deliver(&self, media: MediaView, _caption: Option<&str>) -> Result<(), DeliveryError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(DeliveryError::Closed);
        }
        *slot = Some(media);
        Ok(())
    }
}

// ============ FAN-OUT ============

/// Upper bound on one background mirror send.
pub const MIRROR_TIMEOUT: Duration = Duration::from_secs(120);

pub fn mirror_caption(source_url: &str, platform: Platform) -> String {
    format!("{}\n{}", source_url, platform.hashtag())
}

#[derive(Debug)]
pub struct DeliveryReport {
    pub primary: Result<(), DeliveryError>,
    mirror: Option<JoinHandle<bool>>,
}

impl DeliveryReport {
    pub fn primary_ok(&self) -> bool {
        self.primary.is_ok()
    }

    pub fn mirror_started(&self) -> bool {
        self.mirror.is_some()
    }

    /// Wait for the background mirror send. `None` when no mirror is configured.
    pub async fn mirror_outcome(&mut self) -> Option<bool> {
        let handle = self.mirror.take()?;
        Some(handle.await.unwrap_or(false))
    }

    /// Outcome seen by the requester. A still-running mirror send is left
    /// to finish on its own.
    pub fn into_result(self) -> Result<(), DownloadError> {
        self.primary
            .map_err(|e| DownloadError::DeliveryFailed(e.to_string()))
    }
}

/// Sends a download to the requester and, best-effort, to a mirror.
///
/// The primary send is awaited; the mirror send runs on its own task
/// under [`MIRROR_TIMEOUT`] and never holds up the caller.
#[derive(Clone)]
pub struct DeliveryFanOut {
    mirror: Option<Arc<dyn Destination>>,
    mirror_timeout: Duration,
}

impl Default for DeliveryFanOut {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DeliveryFanOut {
    pub fn new(mirror: Option<Arc<dyn Destination>>) -> Self {
        Self {
            mirror,
            mirror_timeout: MIRROR_TIMEOUT,
        }
    }

    pub fn with_mirror_timeout(mut self, timeout: Duration) -> Self {
        self.mirror_timeout = timeout;
        self
    }

    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    /// Each destination gets its own cursor over the shared buffer.
    pub async fn deliver(&self, primary: &dyn Destination, download: &Download) -> DeliveryReport {
        let primary_result = primary.deliver(MediaView::of(&download.payload), None).await;
        match &primary_result {
            Ok(()) => debug!(destination = %primary.label(), "primary delivery done"),
            Err(e) => error!(destination = %primary.label(), error = %e, "primary delivery failed"),
        }

        let mirror = self.mirror.clone().map(|mirror| {
            let view = MediaView::of(&download.payload);
            let caption = mirror_caption(&download.source_url, download.platform);
            let timeout = self.mirror_timeout;

            tokio::spawn(
                async move {
                    let label = mirror.label();
                    match tokio::time::timeout(timeout, mirror.deliver(view, Some(&caption))).await {
                        Ok(Ok(())) => {
                            debug!(destination = %label, "mirror delivery done");
                            true
                        }
                        Ok(Err(e)) => {
                            warn!(destination = %label, error = %e, "mirror delivery failed");
                            false
                        }
                        Err(_) => {
                            warn!(destination = %label, ?timeout, "mirror delivery timed out");
                            false
                        }
                    }
                }
                .in_current_span(),
            )
        });

        DeliveryReport {
            primary: primary_result,
            mirror,
        }
    }
}
