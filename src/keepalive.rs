use reqwest::Client;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const PING_INTERVAL: Duration = Duration::from_secs(60);
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// GET `url` once and return the status code.
pub async fn ping_once(client: &Client, url: &str) -> Result<u16, reqwest::Error> {
    let response = client.get(url).timeout(PING_TIMEOUT).send().await?;
    Ok(response.status().as_u16())
}

/// Ping the paired site every `interval` until `shutdown` flips to true.
pub async fn run(url: String, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let client = Client::new();
    let mut ticker = tokio::time::interval(interval);
    info!(url = %url, "keepalive started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }

        match ping_once(&client, &url).await {
            Ok(status) if (200..300).contains(&status) => debug!(url = %url, status, "pair site up"),
            Ok(status) => warn!(url = %url, status, "pair site returned error status"),
            Err(e) => warn!(url = %url, error = %e, "pair site unreachable"),
        }
    }
    info!("keepalive stopped");
}
