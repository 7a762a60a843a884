use crate::downloader::{BackendRegistry, Fetcher, FormatChoice, MediaKind, MediaPayload};
use crate::error::DownloadError;
use crate::extractor::{ClassifiedRequest, Platform, UrlClassifier, Variant};
use crate::limits::SizeGate;
use crate::ratelimit::{Identity, RateLimiter};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

/// Stages a request passes through. Every early exit is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Admitted,
    Classified,
    Dispatched,
    SizeChecked,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Admitted => "admitted",
            Stage::Classified => "classified",
            Stage::Dispatched => "dispatched",
            Stage::SizeChecked => "size_checked",
        };
        f.write_str(name)
    }
}

/// Successfully fetched and size-checked media.
#[derive(Debug, Clone)]
pub struct Download {
    pub payload: MediaPayload,
    pub platform: Platform,
    pub variant: Variant,
    pub source_url: String,
}

pub type DownloadResult = Result<Download, DownloadError>;

/// A cancel signal that never fires.
pub fn never_cancelled() -> watch::Receiver<bool> {
    watch::channel(false).1
}

pub struct DownloadOrchestrator {
    limiter: Arc<RateLimiter>,
    classifier: UrlClassifier,
    registry: BackendRegistry,
    gate: SizeGate,
    fetch_timeout: Duration,
}

impl DownloadOrchestrator {
    pub fn new(
        limiter: Arc<RateLimiter>,
        classifier: UrlClassifier,
        registry: BackendRegistry,
        gate: SizeGate,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            limiter,
            classifier,
            registry,
            gate,
            fetch_timeout,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn size_gate(&self) -> SizeGate {
        self.gate
    }

    /// Run one request from raw URL to a size-checked payload.
    pub async fn handle(
        &self,
        raw_url: &str,
        identity: &Identity,
        format: &FormatChoice,
        cancel: watch::Receiver<bool>,
    ) -> DownloadResult {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!("download", %request_id, %identity, url = raw_url);

        async move {
            let result = self.run(raw_url, identity, format, cancel).await;
            match &result {
                Ok(download) => info!(
                    platform = %download.platform,
                    bytes = download.payload.len(),
                    "download ready"
                ),
                Err(e) => info!(kind = ?e.kind(), error = %e, "download failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        raw_url: &str,
        identity: &Identity,
        format: &FormatChoice,
        cancel: watch::Receiver<bool>,
    ) -> DownloadResult {
        debug!(stage = %Stage::Received);
        if !self.limiter.admit(identity, Instant::now()) {
            return Err(DownloadError::RateLimited {
                identity: identity.clone(),
            });
        }
        debug!(stage = %Stage::Admitted);

        let request = self.classifier.classify(raw_url).await?;
        if !request.is_supported() {
            return Err(DownloadError::UnsupportedPlatform {
                url: request.url().to_string(),
            });
        }
        let backend = self
            .registry
            .get(&request)
            .ok_or_else(|| DownloadError::UnsupportedPlatform {
                url: request.url().to_string(),
            })?;
        debug!(stage = %Stage::Classified, platform = %request.platform(), backend = backend.name());

        let payload = self.dispatch(backend, &request, format, cancel).await?;
        debug!(stage = %Stage::Dispatched, bytes = payload.len());

        if !self.gate.check(payload.len()) {
            let size = payload.len();
            drop(payload);
            return Err(DownloadError::PayloadTooLarge {
                size,
                max: self.gate.max_bytes(),
            });
        }
        debug!(stage = %Stage::SizeChecked);

        let variant = resolve_variant(request.variant(), payload.kind());
        Ok(Download {
            payload,
            platform: request.platform(),
            variant,
            source_url: raw_url.trim().to_string(),
        })
    }

    // Dropping the losing fetch future kills its child process and
    // removes its staging directory.
    async fn dispatch(
        &self,
        backend: Arc<dyn Fetcher>,
        request: &ClassifiedRequest,
        format: &FormatChoice,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<MediaPayload, DownloadError> {
        let fetch = tokio::time::timeout(self.fetch_timeout, backend.fetch(request, format));

        tokio::select! {
            outcome = fetch => match outcome {
                Ok(Ok(payload)) => Ok(payload),
                Ok(Err(e)) => {
                    warn!(backend = backend.name(), error = %e, "backend fetch failed");
                    Err(DownloadError::from_fetch(request.platform(), e))
                }
                Err(_) => Err(DownloadError::TimedOut(self.fetch_timeout)),
            },
            _ = cancelled(&mut cancel) => Err(DownloadError::Cancelled),
        }
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender can no longer cancel.
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Pinterest variants are only known once the backend has run.
fn resolve_variant(classified: &Variant, kind: MediaKind) -> Variant {
    match classified {
        Variant::Unresolved => match kind {
            MediaKind::Video => Variant::Video,
            _ => Variant::Image,
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{FetchError, PinterestBackend};
    use crate::error::{ErrorKind, Locale};
    use crate::extractor::{RedirectResolver, ResolveError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedResolver(&'static str);

    #[async_trait]
    impl RedirectResolver for FixedResolver {
        async fn resolve(&self, _url: &str) -> Result<String, ResolveError> {
            Ok(self.0.to_string())
        }
    }

    /// Returns a fixed payload and counts calls.
    struct Canned {
        payload: Option<MediaPayload>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Canned {
        fn ok(bytes: &'static [u8], kind: MediaKind) -> Arc<Self> {
            Arc::new(Self {
                payload: Some(MediaPayload::new(bytes, kind, "vid.mp4")),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                payload: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                payload: Some(MediaPayload::new(&b"late"[..], MediaKind::Video, "vid.mp4")),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn fetch(
            &self,
            _request: &ClassifiedRequest,
            _format: &FormatChoice,
        ) -> Result<MediaPayload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.payload
                .clone()
                .ok_or_else(|| FetchError::Backend("exit status 1".to_string()))
        }
    }

    fn orchestrator(
        generic: Arc<dyn Fetcher>,
        pinterest: Arc<dyn Fetcher>,
        gate: SizeGate,
    ) -> DownloadOrchestrator {
        DownloadOrchestrator::new(
            Arc::new(RateLimiter::default()),
            UrlClassifier::new(Arc::new(FixedResolver("https://pinterest.com/pin/999"))),
            BackendRegistry::standard(generic.clone(), generic, pinterest),
            gate,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn short_pinterest_link_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let media_url = format!("{}/originals/ab.jpg", server.url());
        let _lookup = server
            .mock("POST", "/download.php")
            .match_body(mockito::Matcher::UrlEncoded(
                "url".to_string(),
                "https://pinterest.com/pin/999".to_string(),
            ))
            .with_status(200)
            .with_body(format!(
                r#"<table class="table table-condensed"><tbody><tr><td><a href="{}">Download</a></td></tr></tbody></table>"#,
                media_url
            ))
            .create_async()
            .await;
        let _media = server
            .mock("GET", "/originals/ab.jpg")
            .with_status(200)
            .with_body("pin-bytes")
            .create_async()
            .await;

        let pinterest = Arc::new(PinterestBackend::new(format!("{}/download.php", server.url())));
        let orch = orchestrator(Canned::failing(), pinterest, SizeGate::default());

        let download = orch
            .handle("https://pin.it/abc123", &Identity::from(1_i64), &FormatChoice::Best, never_cancelled())
            .await
            .unwrap();

        assert_eq!(download.platform, Platform::Pinterest);
        assert_eq!(download.variant, Variant::Image);
        assert_eq!(&download.payload.bytes()[..], b"pin-bytes");
        assert_eq!(download.source_url, "https://pin.it/abc123");
    }

    #[tokio::test]
    async fn pinterest_video_variant_is_resolved() {
        let backend = Canned::ok(b"mp4", MediaKind::Video);
        let orch = orchestrator(Canned::failing(), backend, SizeGate::default());

        let download = orch
            .handle("https://pinterest.com/pin/5", &Identity::from(1_i64), &FormatChoice::Best, never_cancelled())
            .await
            .unwrap();
        assert_eq!(download.variant, Variant::Video);
    }

    #[tokio::test]
    async fn unknown_instagram_path_invokes_no_backend() {
        let generic = Canned::ok(b"x", MediaKind::Video);
        let orch = orchestrator(generic.clone(), Canned::failing(), SizeGate::default());

        let err = orch
            .handle("https://instagram.com/unknown/xyz", &Identity::from(1_i64), &FormatChoice::Best, never_cancelled())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ClassificationFailed);
        assert_eq!(err.user_message(Locale::En), "Instagram link type not supported");
        assert_eq!(generic.calls(), 0);
    }

    #[tokio::test]
    async fn unsupported_platform_short_circuits() {
        let generic = Canned::ok(b"x", MediaKind::Video);
        let orch = orchestrator(generic.clone(), Canned::failing(), SizeGate::default());

        let err = orch
            .handle("https://vimeo.com/1", &Identity::from(1_i64), &FormatChoice::Best, never_cancelled())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedPlatform);
        assert_eq!(generic.calls(), 0);
    }

    #[tokio::test]
    async fn rate_limited_requests_never_reach_backend() {
        let generic = Canned::ok(b"x", MediaKind::Video);
        let orch = orchestrator(generic.clone(), Canned::failing(), SizeGate::default());
        let id = Identity::from(9_i64);

        for _ in 0..5 {
            orch.handle("https://youtu.be/a", &id, &FormatChoice::Best, never_cancelled())
                .await
                .unwrap();
        }
        let err = orch
            .handle("https://youtu.be/a", &id, &FormatChoice::Best, never_cancelled())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(generic.calls(), 5);
    }

    #[tokio::test]
    async fn oversize_payload_is_rejected() {
        let generic = Canned::ok(b"0123456789", MediaKind::Video);
        let orch = orchestrator(generic, Canned::failing(), SizeGate::new(9));

        let err = orch
            .handle("https://youtu.be/a", &Identity::from(1_i64), &FormatChoice::Best, never_cancelled())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::PayloadTooLarge { size: 10, max: 9 }));
    }

    #[tokio::test]
    async fn payload_at_limit_passes() {
        let generic = Canned::ok(b"0123456789", MediaKind::Video);
        let orch = orchestrator(generic, Canned::failing(), SizeGate::new(10));

        let download = orch
            .handle("https://youtu.be/a", &Identity::from(1_i64), &FormatChoice::Best, never_cancelled())
            .await
            .unwrap();
        assert_eq!(download.variant, Variant::Standard);
        assert_eq!(download.platform, Platform::YouTube);
    }

    #[tokio::test]
    async fn backend_failure_carries_platform() {
        let orch = orchestrator(Canned::failing(), Canned::failing(), SizeGate::default());

        let err = orch
            .handle("https://www.tiktok.com/@a/video/1", &Identity::from(1_i64), &FormatChoice::Best, never_cancelled())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::BackendFetchFailed { platform: Platform::TikTok, .. }
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_waiting_on_backend() {
        let slow = Canned::slow(Duration::from_secs(30));
        let orch = orchestrator(slow.clone(), Canned::failing(), SizeGate::default());
        let (tx, rx) = watch::channel(false);
        let id = Identity::from(1_i64);

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        };
        let (result, _) = tokio::join!(
            orch.handle("https://youtu.be/a", &id, &FormatChoice::Best, rx),
            cancel
        );

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(slow.calls(), 1);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let slow = Canned::slow(Duration::from_secs(30));
        let orch = DownloadOrchestrator::new(
            Arc::new(RateLimiter::default()),
            UrlClassifier::new(Arc::new(FixedResolver("https://pinterest.com/pin/1"))),
            BackendRegistry::standard(slow.clone(), slow.clone(), slow),
            SizeGate::default(),
            Duration::from_millis(20),
        );

        let err = orch
            .handle("https://youtu.be/a", &Identity::from(1_i64), &FormatChoice::Best, never_cancelled())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn variant_resolution() {
        assert_eq!(resolve_variant(&Variant::Unresolved, MediaKind::Video), Variant::Video);
        assert_eq!(resolve_variant(&Variant::Unresolved, MediaKind::Image), Variant::Image);
        assert_eq!(resolve_variant(&Variant::Post, MediaKind::Image), Variant::Post);
    }
}
