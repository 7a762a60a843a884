use super::{FetchError, Fetcher, FormatChoice, MediaKind, MediaPayload, SimpleDownloader};
use crate::extractor::ClassifiedRequest;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

pub const DEFAULT_LOOKUP_URL: &str = "https://www.expertsphp.com/download.php";

/// Pinterest pins: lookup service first, then a plain GET of the link it returns.
pub struct PinterestBackend {
    lookup_url: String,
    http: SimpleDownloader,
}

impl PinterestBackend {
    pub fn new(lookup_url: impl Into<String>) -> Self {
        Self {
            lookup_url: lookup_url.into(),
            http: SimpleDownloader::new(),
        }
    }

    pub fn with_downloader(lookup_url: impl Into<String>, http: SimpleDownloader) -> Self {
        Self {
            lookup_url: lookup_url.into(),
            http,
        }
    }

    /// POST the pin URL to the lookup service and scrape the download link.
    pub async fn lookup(&self, pin_url: &str) -> Result<String, FetchError> {
        let response = self
            .http
            .client()
            .post(&self.lookup_url)
            .form(&[("url", pin_url)])
            .send()
            .await
            .map_err(|e| FetchError::Lookup(format!("Failed to reach lookup service: {}", e)))?;

        if !response.status().is_success() {
            return Err(FetchError::Lookup(format!(
                "Lookup service returned {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| FetchError::Lookup(format!("Failed to read lookup page: {}", e)))?;

        extract_download_link(&html).ok_or_else(|| {
            warn!(pin = pin_url, "no download link in lookup page");
            FetchError::Lookup(format!("No download link for {}", pin_url))
        })
    }
}

#[async_trait]
impl Fetcher for PinterestBackend {
    fn name(&self) -> &'static str {
        "pinterest"
    }

    async fn fetch(
        &self,
        request: &ClassifiedRequest,
        _format: &FormatChoice,
    ) -> Result<MediaPayload, FetchError> {
        let link = self.lookup(request.url()).await?;
        let kind = kind_for_link(&link);
        debug!(pin = request.url(), link = %link, ?kind, "resolved pinterest link");

        let bytes = self.http.fetch_bytes(&link, None).await?;
        let filename = match kind {
            MediaKind::Video => "vid.mp4".to_string(),
            _ => image_filename(&link),
        };

        Ok(MediaPayload::new(bytes, kind, filename))
    }
}

/// A link whose path ends in `.mp4` is a video; anything else is an image.
pub fn kind_for_link(link: &str) -> MediaKind {
    let path = url::Url::parse(link)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| link.to_string());

    if path.to_ascii_lowercase().ends_with(".mp4") {
        MediaKind::Video
    } else {
        MediaKind::Image
    }
}

static TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<table[^>]*\bclass\s*=\s*["'][^"']*\btable-condensed\b[^"']*["'][^>]*>(.*?)</table>"#,
    )
    .expect("Failed to compile table regex")
});
static TBODY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tbody[^>]*>(.*?)</tbody>").expect("Failed to compile tbody regex"));
static CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").expect("Failed to compile cell regex"));
static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).expect("Failed to compile anchor regex")
});

/// First anchor inside a cell of the `table-condensed` table body.
pub fn extract_download_link(html: &str) -> Option<String> {
    let table_body = TABLE_RE.captures(html)?.get(1)?.as_str();
    let rows = TBODY_RE.captures(table_body)?.get(1)?.as_str();

    CELL_RE
        .captures_iter(rows)
        .filter_map(|c| c.get(1))
        .find_map(|c| ANCHOR_RE.captures(c.as_str()))
        .and_then(|c| c.get(1))
        .map(|href| href.as_str().trim().replace("&amp;", "&"))
        .filter(|href| !href.is_empty())
}

fn image_filename(link: &str) -> String {
    url::Url::parse(link)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| MediaKind::from_extension(name.rsplit('.').next().unwrap_or("")).is_some())
        .unwrap_or_else(|| "image.jpg".to_string())
}
