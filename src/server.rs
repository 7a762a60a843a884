use crate::delivery::{DeliveryFanOut, ResponseSlot};
use crate::downloader::{format_menu, FormatChoice};
use crate::error::{DownloadError, Locale};
use crate::extractor::{classify_url, Platform};
use crate::orchestrator::{never_cancelled, DownloadOrchestrator};
use crate::ratelimit::Identity;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<DownloadOrchestrator>,
    fanout: DeliveryFanOut,
    locale: Locale,
}

impl AppState {
    /// `fanout` should carry a mirror only when web downloads are mirrored.
    pub fn new(orchestrator: Arc<DownloadOrchestrator>, fanout: DeliveryFanOut, locale: Locale) -> Self {
        Self {
            orchestrator,
            fanout,
            locale,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadBody {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub format_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FormatsBody {
    #[serde(default)]
    pub url: String,
}

/// JSON error body with the status its kind maps to.
pub struct ApiError {
    error: DownloadError,
    locale: Locale,
}

impl ApiError {
    fn new(error: DownloadError, locale: Locale) -> Self {
        Self { error, locale }
    }

    /// A body that is not the expected JSON is treated as a missing link.
    fn bad_body(rejection: JsonRejection, locale: Locale) -> Self {
        warn!(error = %rejection.body_text(), "rejected request body");
        Self::new(DownloadError::MissingUrl, locale)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "error": self.error.user_message(self.locale) }));
        (status, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/check", get(check))
        .route("/download", post(download))
        .route("/formats", post(formats))
        .with_state(state)
}

async fn check() -> Json<serde_json::Value> {
    Json(json!({ "status": "available", "message": "Server is running" }))
}

async fn download(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Result<Json<DownloadBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let locale = state.locale;
    let Json(body) = body.map_err(|e| ApiError::bad_body(e, locale))?;
    let url = body.url.trim();
    if url.is_empty() {
        return Err(ApiError::new(DownloadError::MissingUrl, locale));
    }
    let format = FormatChoice::parse(body.format_id.as_deref().unwrap_or(""))
        .map_err(|id| ApiError::new(DownloadError::InvalidFormat(id), locale))?;

    // A client that disconnects drops this future, and the fetch with it.
    let identity = Identity::from(peer.ip());
    let download = state
        .orchestrator
        .handle(url, &identity, &format, never_cancelled())
        .await
        .map_err(|e| ApiError::new(e, locale))?;

    let slot = ResponseSlot::new();
    state
        .fanout
        .deliver(&slot, &download)
        .await
        .into_result()
        .map_err(|e| ApiError::new(e, locale))?;

    let view = slot.take().ok_or_else(|| {
        ApiError::new(
            DownloadError::DeliveryFailed("response slot empty".to_string()),
            locale,
        )
    })?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", view.filename()))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let mime = view.mime();
    info!(%identity, filename = view.filename(), bytes = view.len(), "serving download");

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(mime)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(view.into_bytes()),
    )
        .into_response())
}

async fn formats(
    State(state): State<AppState>,
    body: Result<Json<FormatsBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let locale = state.locale;
    let Json(body) = body.map_err(|e| ApiError::bad_body(e, locale))?;
    let request = classify_url(&body.url).map_err(|e| ApiError::new(e.into(), locale))?;

    if request.platform() != Platform::YouTube {
        return Err(ApiError::new(
            DownloadError::UnsupportedPlatform {
                url: request.url().to_string(),
            },
            locale,
        ));
    }
    Ok(Json(format_menu()).into_response())
}

/// Serve until `shutdown` flips to true.
pub async fn serve(
    state: AppState,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    match listener.local_addr() {
        Ok(addr) => info!(addr = %addr, "HTTP server listening"),
        Err(e) => warn!(error = %e, "HTTP server listening on unknown address"),
    }

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    })
    .await
}
