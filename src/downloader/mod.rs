mod generic;
mod pinterest;
mod registry;
mod simple;
mod stories;

pub use generic::*;
pub use pinterest::*;
pub use registry::*;
pub use simple::*;
pub use stories::*;

use crate::extractor::ClassifiedRequest;
use crate::ratelimit::Identity;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

// ============ MEDIA ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp4" | "webm" | "mkv" | "mov" => Some(MediaKind::Video),
            "jpg" | "jpeg" | "png" | "webp" | "gif" => Some(MediaKind::Image),
            "mp3" | "m4a" | "opus" | "ogg" | "aac" => Some(MediaKind::Audio),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Content type for a file of this kind.
    pub fn mime(&self, filename: &str) -> &'static str {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match (self, ext.as_deref()) {
            (MediaKind::Video, Some("webm")) => "video/webm",
            (MediaKind::Video, _) => "video/mp4",
            (MediaKind::Image, Some("png")) => "image/png",
            (MediaKind::Image, Some("webp")) => "image/webp",
            (MediaKind::Image, Some("gif")) => "image/gif",
            (MediaKind::Image, _) => "image/jpeg",
            (MediaKind::Audio, Some("m4a")) => "audio/mp4",
            (MediaKind::Audio, Some("ogg" | "opus")) => "audio/ogg",
            (MediaKind::Audio, _) => "audio/mpeg",
        }
    }
}

/// Fetched media held in memory.
///
/// The buffer is immutable; [`MediaPayload::view`] hands out independent
/// cursors that share it.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    bytes: Bytes,
    kind: MediaKind,
    filename: String,
}

impl MediaPayload {
    pub fn new(bytes: impl Into<Bytes>, kind: MediaKind, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            kind,
            filename: filename.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn view(&self) -> Cursor<Bytes> {
        Cursor::new(self.bytes.clone())
    }
}

// ============ FORMATS ============

pub const VIDEO_QUALITIES: &[u32] = &[144, 240, 360, 480, 720, 1080, 1440, 2160, 4320];
pub const AUDIO_BITRATES: &[u32] = &[64, 128, 192, 256, 320];

/// Output format requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormatChoice {
    #[default]
    Best,
    Video { max_height: u32 },
    Audio { bitrate_kbps: u32 },
}

impl FormatChoice {
    /// Parse a format id such as `video_720` or `audio_128`. Empty means best.
    pub fn parse(format_id: &str) -> Result<Self, String> {
        let format_id = format_id.trim();
        if format_id.is_empty() || format_id == "best" {
            return Ok(FormatChoice::Best);
        }

        if let Some(quality) = format_id.strip_prefix("video_") {
            let height: u32 = quality.parse().map_err(|_| format_id.to_string())?;
            if VIDEO_QUALITIES.contains(&height) {
                return Ok(FormatChoice::Video { max_height: height });
            }
        } else if let Some(bitrate) = format_id.strip_prefix("audio_") {
            let kbps: u32 = bitrate.parse().map_err(|_| format_id.to_string())?;
            if AUDIO_BITRATES.contains(&kbps) {
                return Ok(FormatChoice::Audio { bitrate_kbps: kbps });
            }
        }

        Err(format_id.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoFormat {
    pub format_id: String,
    pub resolution: String,
    pub ext: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioFormat {
    pub format_id: String,
    pub bitrate: String,
    pub ext: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormatMenu {
    pub video_formats: Vec<VideoFormat>,
    pub audio_formats: Vec<AudioFormat>,
}

/// Every format id [`FormatChoice::parse`] accepts.
pub fn format_menu() -> FormatMenu {
    FormatMenu {
        video_formats: VIDEO_QUALITIES
            .iter()
            .map(|q| VideoFormat {
                format_id: format!("video_{}", q),
                resolution: format!("{}p", q),
                ext: "mp4",
            })
            .collect(),
        audio_formats: AUDIO_BITRATES
            .iter()
            .map(|b| AudioFormat {
                format_id: format!("audio_{}", b),
                bitrate: format!("{}kbps", b),
                ext: "mp3",
            })
            .collect(),
    }
}

// ============ FETCHER ============

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Extractor failed: {0}")]
    Backend(String),

    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("No matching items: {0}")]
    NotFound(String),

    #[error("Staging error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] HttpError),
}

/// One platform backend.
///
/// Implementations must leave no files behind: any staging on disk is
/// private to the call and removed before it returns or is dropped.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        request: &ClassifiedRequest,
        format: &FormatChoice,
    ) -> Result<MediaPayload, FetchError>;
}

// ============ JOBS ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadJob {
    pub id: String,
    pub url: String,
    #[serde(skip)]
    pub identity: Identity,
    pub status: DownloadStatus,
}

impl DownloadJob {
    pub fn new(url: &str, identity: &Identity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            identity: identity.clone(),
            status: DownloadStatus::Pending,
        }
    }
}

/// Tracks in-flight requests so their owners can cancel them.
pub struct DownloadManager {
    jobs: Arc<RwLock<HashMap<String, DownloadJob>>>,
    cancellation_tokens: Arc<RwLock<HashMap<String, tokio::sync::watch::Sender<bool>>>>,
}

impl DownloadManager {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn add_job(&self, job: DownloadJob) -> tokio::sync::watch::Receiver<bool> {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let job_id = job.id.clone();

        self.jobs.write().await.insert(job_id.clone(), job);
        self.cancellation_tokens.write().await.insert(job_id, tx);

        rx
    }

    pub async fn update_job(&self, job_id: &str, status: DownloadStatus) {
        if let Some(job) = self.jobs.write().await.get_mut(job_id) {
            job.status = status;
        }
    }

    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let signalled = match self.cancellation_tokens.read().await.get(job_id) {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        };
        self.update_job(job_id, DownloadStatus::Cancelled).await;
        signalled
    }

    /// Cancel every pending or running job owned by `identity`.
    pub async fn cancel_for(&self, identity: &Identity) -> usize {
        let ids: Vec<String> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| &job.identity == identity)
            .filter(|job| {
                matches!(
                    job.status,
                    DownloadStatus::Pending | DownloadStatus::Downloading
                )
            })
            .map(|job| job.id.clone())
            .collect();

        let mut cancelled = 0;
        for id in ids {
            if self.cancel_job(&id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Signal every tracked job. Used on shutdown.
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        let mut cancelled = 0;
        for id in ids {
            if self.cancel_job(&id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn remove_job(&self, job_id: &str) {
        self.jobs.write().await.remove(job_id);
        self.cancellation_tokens.write().await.remove(job_id);
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}
