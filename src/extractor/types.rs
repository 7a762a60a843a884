use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    YouTube,
    TikTok,
    Facebook,
    Pinterest,
    Unsupported,
}

impl Platform {
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Instagram => "Instagram",
            Platform::YouTube => "YouTube",
            Platform::TikTok => "TikTok",
            Platform::Facebook => "Facebook",
            Platform::Pinterest => "Pinterest",
            Platform::Unsupported => "Unsupported",
        }
    }

    /// Hashtag appended to mirrored captions.
    pub fn hashtag(&self) -> &'static str {
        match self {
            Platform::Instagram => "#instagram",
            Platform::YouTube => "#youtube",
            Platform::TikTok => "#tiktok",
            Platform::Facebook => "#facebook",
            Platform::Pinterest => "#pinterest",
            Platform::Unsupported => "#unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Platform-specific sub-type of a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Variant {
    Post,
    Story { user: String },
    Highlight { id: String },
    Video,
    Image,
    /// Pinterest links before the lookup step has run.
    Unresolved,
    Standard,
}

impl Variant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Post => VariantKind::Post,
            Variant::Story { .. } => VariantKind::Story,
            Variant::Highlight { .. } => VariantKind::Highlight,
            Variant::Video => VariantKind::Video,
            Variant::Image => VariantKind::Image,
            Variant::Unresolved => VariantKind::Unresolved,
            Variant::Standard => VariantKind::Standard,
        }
    }
}

/// Fieldless mirror of [`Variant`], used as a registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    Post,
    Story,
    Highlight,
    Video,
    Image,
    Unresolved,
    Standard,
}

/// Result of classifying a raw URL. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRequest {
    platform: Platform,
    variant: Variant,
    url: String,
}

impl ClassifiedRequest {
    pub fn new(platform: Platform, variant: Variant, url: impl Into<String>) -> Self {
        Self {
            platform,
            variant,
            url: url.into(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    /// Canonical URL, after any short-link expansion.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_supported(&self) -> bool {
        self.platform != Platform::Unsupported
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("Empty URL")]
    Empty,

    #[error("Instagram link type not supported: {0}")]
    UnsupportedInstagramPath(String),

    #[error("Missing {segment} in {url}")]
    MissingSegment { segment: &'static str, url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Failed to follow redirect: {0}")]
    Request(String),

    #[error("HTTP error: {0}")]
    Status(u16),
}
