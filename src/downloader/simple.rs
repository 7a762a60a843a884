use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to fetch {url}: {reason}")]
    Request { url: String, reason: String },

    #[error("HTTP error for {url}: {status}")]
    Status { url: String, status: u16 },

    #[error("Write error: {0}")]
    Io(#[from] std::io::Error),
}

/// Plain HTTP GETs, either buffered in memory or streamed to a file.
#[derive(Clone)]
pub struct SimpleDownloader {
    client: Client,
}

impl SimpleDownloader {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent(BROWSER_USER_AGENT)
                .connect_timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET `url` and return the whole body.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        headers: Option<HashMap<String, String>>,
    ) -> Result<Bytes, HttpError> {
        let response = self.send(url, headers).await?;

        response.bytes().await.map_err(|e| HttpError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// GET `url` and stream the body into `output_path`.
    pub async fn download(
        &self,
        url: &str,
        output_path: &Path,
        headers: Option<HashMap<String, String>>,
    ) -> Result<u64, HttpError> {
        // Ensure parent directory exists
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.send(url, headers).await?;
        let mut downloaded: u64 = 0;

        let mut file = File::create(output_path).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| HttpError::Request {
                url: url.to_string(),
                reason: format!("Stream error: {}", e),
            })?;
            downloaded += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        debug!(url, bytes = downloaded, path = %output_path.display(), "download finished");

        Ok(downloaded)
    }

    async fn send(
        &self,
        url: &str,
        headers: Option<HashMap<String, String>>,
    ) -> Result<reqwest::Response, HttpError> {
        let mut request = self.client.get(url);

        if let Some(hdrs) = headers {
            for (key, value) in hdrs {
                request = request.header(&key, &value);
            }
        }

        let response = request.send().await.map_err(|e| HttpError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }
}

impl Default for SimpleDownloader {
    fn default() -> Self {
        Self::new()
    }
}
