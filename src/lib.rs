pub mod config;
pub mod delivery;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod keepalive;
pub mod limits;
pub mod orchestrator;
pub mod ratelimit;
pub mod server;
pub mod telegram;

use anyhow::Context;
use config::Config;
use delivery::{ChatDestination, DeliveryFanOut, Destination, MessagingClient};
use downloader::{
    BackendRegistry, GalleryDlSource, GenericExtractor, PinterestBackend, StoryHighlightExtractor,
};
use extractor::{HttpRedirectResolver, UrlClassifier};
use limits::SizeGate;
use orchestrator::DownloadOrchestrator;
use ratelimit::RateLimiter;
use std::sync::Arc;
use telegram::{Bot, TelegramClient};
use tokio::sync::watch;
use tracing::{info, warn};

// ============ TRACING ============

/// Install the global subscriber. `RUST_LOG` overrides the `info` default;
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

// ============ WIRING ============

/// Build the orchestrator from config.
pub fn build_orchestrator(config: &Config) -> Result<DownloadOrchestrator, config::ConfigError> {
    let credentials = config.load_credentials()?;
    let cookies = config.cookies();

    let generic = Arc::new(GenericExtractor::new(&config.ytdlp_path, cookies.clone()));
    let stories = Arc::new(StoryHighlightExtractor::new(
        Arc::new(GalleryDlSource::new(&config.gallery_dl_path, cookies)),
        credentials,
    ));
    let pinterest = Arc::new(PinterestBackend::new(&config.pinterest_lookup_url));

    Ok(DownloadOrchestrator::new(
        Arc::new(RateLimiter::new(
            config.max_requests_per_window,
            config.rate_window(),
        )),
        UrlClassifier::new(Arc::new(HttpRedirectResolver::new())),
        BackendRegistry::standard(generic, stories, pinterest),
        SizeGate::new(config.max_file_size_bytes),
        config.fetch_timeout(),
    ))
}

/// Run the HTTP server, and the bot and keepalive when configured, until Ctrl+C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(build_orchestrator(&config).context("failed to build backends")?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let telegram = config
        .bot_token
        .as_deref()
        .map(|token| Arc::new(TelegramClient::new(token)));

    let mirror: Option<Arc<dyn Destination>> = match (&telegram, config.channel_id) {
        (Some(client), Some(channel_id)) => Some(Arc::new(ChatDestination::new(
            client.clone() as Arc<dyn MessagingClient>,
            channel_id,
        ))),
        (None, Some(_)) => {
            warn!("CHANNEL_ID is set without BOT_TOKEN, mirroring disabled");
            None
        }
        _ => None,
    };
    let fanout = DeliveryFanOut::new(mirror);

    let mut tasks = Vec::new();

    if let Some(client) = telegram {
        let bot = Arc::new(Bot::new(
            client,
            orchestrator.clone(),
            fanout.clone(),
            config.locale,
        ));
        tasks.push(tokio::spawn(bot.run(shutdown_rx.clone())));
    } else {
        info!("BOT_TOKEN not set, chat front end disabled");
    }

    if let Some(pair_site) = config.pair_site.clone() {
        tasks.push(tokio::spawn(keepalive::run(
            pair_site,
            keepalive::PING_INTERVAL,
            shutdown_rx.clone(),
        )));
    }

    let web_fanout = if config.mirror_web_downloads {
        fanout
    } else {
        DeliveryFanOut::default()
    };
    let state = server::AppState::new(orchestrator, web_fanout, config.locale);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    let http = tokio::spawn(server::serve(state, listener, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    http.await
        .context("HTTP server task panicked")?
        .context("HTTP server failed")?;
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
    Ok(())
}
