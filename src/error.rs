use crate::downloader::FetchError;
use crate::extractor::{ClassifyError, Platform};
use crate::ratelimit::Identity;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Language used for user-facing messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ar,
}

impl std::str::FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "ar" => Ok(Locale::Ar),
            other => Err(format!("unknown locale: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    MissingUrl,
    UnsupportedPlatform,
    ClassificationFailed,
    InvalidFormat,
    LinkExpansionFailed,
    BackendFetchFailed,
    NotFound,
    PayloadTooLarge,
    DeliveryFailed,
    Cancelled,
    TimedOut,
}

/// Terminal failure of one download request.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Rate limit exceeded for {identity}")]
    RateLimited { identity: Identity },

    #[error("No URL provided")]
    MissingUrl,

    #[error("Unsupported platform: {url}")]
    UnsupportedPlatform { url: String },

    #[error("Classification failed: {0}")]
    ClassificationFailed(ClassifyError),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Download link lookup failed: {detail}")]
    LinkExpansionFailed { detail: String },

    #[error("{platform} backend failed: {detail}")]
    BackendFetchFailed { platform: Platform, detail: String },

    #[error("No media found: {detail}")]
    NotFound { detail: String },

    #[error("Payload of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<ClassifyError> for DownloadError {
    fn from(e: ClassifyError) -> Self {
        match e {
            ClassifyError::Empty => DownloadError::MissingUrl,
            other => DownloadError::ClassificationFailed(other),
        }
    }
}

impl DownloadError {
    /// Wrap a backend failure with the platform it came from.
    pub fn from_fetch(platform: Platform, e: FetchError) -> Self {
        match e {
            FetchError::Lookup(detail) => DownloadError::LinkExpansionFailed { detail },
            FetchError::NotFound(detail) => DownloadError::NotFound { detail },
            other => DownloadError::BackendFetchFailed {
                platform,
                detail: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::RateLimited { .. } => ErrorKind::RateLimited,
            DownloadError::MissingUrl => ErrorKind::MissingUrl,
            DownloadError::UnsupportedPlatform { .. } => ErrorKind::UnsupportedPlatform,
            DownloadError::ClassificationFailed(_) => ErrorKind::ClassificationFailed,
            DownloadError::InvalidFormat(_) => ErrorKind::InvalidFormat,
            DownloadError::LinkExpansionFailed { .. } => ErrorKind::LinkExpansionFailed,
            DownloadError::BackendFetchFailed { .. } => ErrorKind::BackendFetchFailed,
            DownloadError::NotFound { .. } => ErrorKind::NotFound,
            DownloadError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            DownloadError::DeliveryFailed(_) => ErrorKind::DeliveryFailed,
            DownloadError::Cancelled => ErrorKind::Cancelled,
            DownloadError::TimedOut(_) => ErrorKind::TimedOut,
        }
    }

    /// HTTP status for the web surface: 400 for user-input failures, 500 otherwise.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::RateLimited
            | ErrorKind::MissingUrl
            | ErrorKind::UnsupportedPlatform
            | ErrorKind::ClassificationFailed
            | ErrorKind::InvalidFormat
            | ErrorKind::LinkExpansionFailed
            | ErrorKind::NotFound
            | ErrorKind::PayloadTooLarge => 400,
            ErrorKind::BackendFetchFailed
            | ErrorKind::DeliveryFailed
            | ErrorKind::Cancelled
            | ErrorKind::TimedOut => 500,
        }
    }

    /// Non-technical message safe to show the requester.
    pub fn user_message(&self, locale: Locale) -> String {
        if let DownloadError::PayloadTooLarge { max, .. } = self {
            let mib = max / (1024 * 1024);
            return match locale {
                Locale::En => format!("The file exceeds the {} MB limit.", mib),
                Locale::Ar => format!("حجم الملف يتجاوز حد {} ميجابايت.", mib),
            };
        }

        let text = match (self.kind(), locale) {
            (ErrorKind::RateLimited, Locale::En) => {
                "You have exceeded the download limit. Please wait a minute."
            }
            (ErrorKind::RateLimited, Locale::Ar) => "لقد تجاوزت حد التحميلات في الدقيقة. يرجى الانتظار.",
            (ErrorKind::MissingUrl, Locale::En) => "Please provide a link.",
            (ErrorKind::MissingUrl, Locale::Ar) => "يرجى تقديم رابط",
            (ErrorKind::UnsupportedPlatform, Locale::En) => "Unsupported platform.",
            (ErrorKind::UnsupportedPlatform, Locale::Ar) => "منصة غير مدعومة.",
            (ErrorKind::ClassificationFailed, Locale::En) => "Instagram link type not supported",
            (ErrorKind::ClassificationFailed, Locale::Ar) => "رابط Instagram غير مدعوم.",
            (ErrorKind::InvalidFormat, Locale::En) => "The requested format is not available.",
            (ErrorKind::InvalidFormat, Locale::Ar) => "الصيغة المطلوبة غير متاحة.",
            (ErrorKind::LinkExpansionFailed, Locale::En) => {
                "Could not get the download link from Pinterest."
            }
            (ErrorKind::LinkExpansionFailed, Locale::Ar) => {
                "فشل في الحصول على رابط التحميل من Pinterest."
            }
            (ErrorKind::BackendFetchFailed, Locale::En) => "An error occurred while downloading.",
            (ErrorKind::BackendFetchFailed, Locale::Ar) => "حدث خطأ أثناء التحميل.",
            (ErrorKind::NotFound, Locale::En) => "No media was found.",
            (ErrorKind::NotFound, Locale::Ar) => "لم يتم العثور على وسائط.",
            (ErrorKind::PayloadTooLarge, Locale::En) => "The file is too large.",
            (ErrorKind::PayloadTooLarge, Locale::Ar) => "حجم الملف كبير جدًا.",
            (ErrorKind::DeliveryFailed, Locale::En) => {
                "An error occurred while processing your request."
            }
            (ErrorKind::DeliveryFailed, Locale::Ar) => "حدث خطأ أثناء معالجة طلبك.",
            (ErrorKind::Cancelled, Locale::En) => "The download was cancelled.",
            (ErrorKind::Cancelled, Locale::Ar) => "تم إلغاء التحميل.",
            (ErrorKind::TimedOut, Locale::En) => "The download took too long. Please try again.",
            (ErrorKind::TimedOut, Locale::Ar) => "انتهت مهلة التحميل. يرجى المحاولة مرة أخرى.",
        };
        text.to_string()
    }
}
