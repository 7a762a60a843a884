mod resolver;
mod types;

pub use resolver::*;
pub use types::*;

use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

const SHORT_LINK_HOSTS: &[&str] = &["pin.it"];

/// Platforms in match priority order.
const PLATFORM_PATTERNS: &[(Platform, &[&str])] = &[
    (Platform::Instagram, &["instagram.com"]),
    (Platform::YouTube, &["youtube.com", "youtu.be"]),
    (Platform::TikTok, &["tiktok.com"]),
    (Platform::Facebook, &["facebook.com"]),
    (Platform::Pinterest, &["pinterest.com", "pin.it"]),
];

/// Maps raw user input to a [`ClassifiedRequest`].
#[derive(Clone)]
pub struct UrlClassifier {
    resolver: Arc<dyn RedirectResolver>,
}

impl UrlClassifier {
    pub fn new(resolver: Arc<dyn RedirectResolver>) -> Self {
        Self { resolver }
    }

    /// Classify a raw URL, expanding short links first.
    ///
    /// A short link that cannot be expanded is classified as written.
    pub async fn classify(&self, raw_url: &str) -> Result<ClassifiedRequest, ClassifyError> {
        let raw_url = raw_url.trim();
        if raw_url.is_empty() {
            return Err(ClassifyError::Empty);
        }

        let url = if is_short_link(raw_url) {
            match self.resolver.resolve(raw_url).await {
                Ok(expanded) => {
                    debug!(short = raw_url, expanded = %expanded, "expanded short link");
                    expanded
                }
                Err(e) => {
                    warn!(short = raw_url, error = %e, "short link expansion failed, using original");
                    raw_url.to_string()
                }
            }
        } else {
            raw_url.to_string()
        };

        classify_url(&url)
    }
}

/// True if the URL points at a known link shortener.
pub fn is_short_link(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .map(|host| SHORT_LINK_HOSTS.contains(&host))
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Classify an already-expanded URL. Pure and deterministic.
pub fn classify_url(url: &str) -> Result<ClassifiedRequest, ClassifyError> {
    let platform = PLATFORM_PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| url.contains(needle)))
        .map(|(platform, _)| *platform)
        .unwrap_or(Platform::Unsupported);

    let variant = match platform {
        Platform::Instagram => instagram_variant(url)?,
        Platform::Pinterest => Variant::Unresolved,
        _ => Variant::Standard,
    };

    Ok(ClassifiedRequest::new(platform, variant, url))
}

fn instagram_variant(url: &str) -> Result<Variant, ClassifyError> {
    // Highlight URLs live under /stories/highlights/<id>/, so check them first.
    if url.contains("/highlights/") {
        let id = segment_after(url, "/highlights/").ok_or_else(|| ClassifyError::MissingSegment {
            segment: "highlight id",
            url: url.to_string(),
        })?;
        return Ok(Variant::Highlight { id });
    }

    if url.contains("/stories/") {
        let user = segment_after(url, "/stories/").ok_or_else(|| ClassifyError::MissingSegment {
            segment: "username",
            url: url.to_string(),
        })?;
        return Ok(Variant::Story { user });
    }

    if url.contains("/reel/") || url.contains("/p/") {
        return Ok(Variant::Post);
    }

    Err(ClassifyError::UnsupportedInstagramPath(url.to_string()))
}

fn segment_after(url: &str, marker: &str) -> Option<String> {
    let (_, rest) = url.split_once(marker)?;
    let segment = rest.split(['/', '?', '#']).next().unwrap_or("");
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedResolver {
        answer: Result<String, ResolveError>,
        calls: AtomicUsize,
    }

    impl FixedResolver {
        fn ok(url: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(url.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                answer: Err(ResolveError::Request("connection refused".to_string())),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RedirectResolver for FixedResolver {
        async fn resolve(&self, _url: &str) -> Result<String, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[tokio::test]
    async fn short_link_is_expanded() {
        let resolver = FixedResolver::ok("https://pinterest.com/pin/999");
        let classifier = UrlClassifier::new(resolver.clone());

        let req = classifier.classify("https://pin.it/abc123").await.unwrap();
        assert_eq!(req.platform(), Platform::Pinterest);
        assert_eq!(req.variant(), &Variant::Unresolved);
        assert_eq!(req.url(), "https://pinterest.com/pin/999");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_expansion_falls_back_to_original() {
        let classifier = UrlClassifier::new(FixedResolver::failing());

        let req = classifier.classify("https://pin.it/abc123").await.unwrap();
        assert_eq!(req.platform(), Platform::Pinterest);
        assert_eq!(req.url(), "https://pin.it/abc123");
    }

    #[tokio::test]
    async fn regular_links_skip_the_resolver() {
        let resolver = FixedResolver::ok("https://example.com");
        let classifier = UrlClassifier::new(resolver.clone());

        let req = classifier
            .classify("  https://www.youtube.com/watch?v=dQw4w9WgXcQ  ")
            .await
            .unwrap();
        assert_eq!(req.platform(), Platform::YouTube);
        assert_eq!(req.url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn classification_is_deterministic() {
        let classifier = UrlClassifier::new(FixedResolver::ok("https://pinterest.com/pin/1"));
        for raw in [
            "https://pin.it/x",
            "https://www.instagram.com/stories/nasa/123/",
            "https://vm.tiktok.com/ZM123/",
        ] {
            let first = classifier.classify(raw).await;
            let second = classifier.classify(raw).await;
            assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let classifier = UrlClassifier::new(FixedResolver::failing());
        assert_eq!(classifier.classify("   ").await, Err(ClassifyError::Empty));
    }

    #[test]
    fn platform_priority_order() {
        let cases = [
            ("https://www.instagram.com/reel/Cabc/", Platform::Instagram),
            ("https://youtu.be/dQw4w9WgXcQ", Platform::YouTube),
            ("https://www.tiktok.com/@user/video/1", Platform::TikTok),
            ("https://www.facebook.com/watch?v=1", Platform::Facebook),
            ("https://www.pinterest.com/pin/1/", Platform::Pinterest),
            ("https://example.com/video.mp4", Platform::Unsupported),
            // Instagram wins over a YouTube link embedded in the query.
            (
                "https://instagram.com/p/abc/?ref=youtube.com",
                Platform::Instagram,
            ),
        ];
        for (url, expected) in cases {
            assert_eq!(classify_url(url).unwrap().platform(), expected, "{}", url);
        }
    }

    #[test]
    fn instagram_sub_variants() {
        assert_eq!(
            classify_url("https://instagram.com/stories/nasa/3141/").unwrap().variant(),
            &Variant::Story {
                user: "nasa".to_string()
            }
        );
        assert_eq!(
            classify_url("https://instagram.com/stories/highlights/17890/").unwrap().variant(),
            &Variant::Highlight {
                id: "17890".to_string()
            }
        );
        assert_eq!(
            classify_url("https://instagram.com/highlights/17890?igsh=x").unwrap().variant(),
            &Variant::Highlight {
                id: "17890".to_string()
            }
        );
        assert_eq!(
            classify_url("https://instagram.com/p/Cxyz/").unwrap().variant(),
            &Variant::Post
        );
        assert_eq!(
            classify_url("https://instagram.com/reel/Cxyz").unwrap().variant(),
            &Variant::Post
        );
    }

    #[test]
    fn unknown_instagram_path_fails() {
        assert_eq!(
            classify_url("https://instagram.com/unknown/xyz"),
            Err(ClassifyError::UnsupportedInstagramPath(
                "https://instagram.com/unknown/xyz".to_string()
            ))
        );
    }

    #[test]
    fn story_without_username_fails() {
        assert!(matches!(
            classify_url("https://instagram.com/stories/"),
            Err(ClassifyError::MissingSegment { .. })
        ));
    }

    #[test]
    fn non_instagram_platforms_are_standard() {
        let req = classify_url("https://www.facebook.com/watch?v=1").unwrap();
        assert_eq!(req.variant(), &Variant::Standard);

        let req = classify_url("https://example.com").unwrap();
        assert!(!req.is_supported());
    }

    #[test]
    fn short_link_detection_uses_host() {
        assert!(is_short_link("https://pin.it/abc123"));
        assert!(is_short_link("http://pin.it/abc123"));
        assert!(!is_short_link("https://example.com/pin.it/abc"));
        assert!(!is_short_link("not a url"));
    }
}
