use super::ResolveError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Follows redirects to find where a short link points.
#[async_trait]
pub trait RedirectResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<String, ResolveError>;
}

pub struct HttpRedirectResolver {
    client: Client,
}

impl HttpRedirectResolver {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36")
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpRedirectResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RedirectResolver for HttpRedirectResolver {
    async fn resolve(&self, url: &str) -> Result<String, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::Request(e.to_string()))?;

        // The default client policy follows up to 10 hops.
        if !response.status().is_success() {
            return Err(ResolveError::Status(response.status().as_u16()));
        }

        Ok(response.url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn follows_redirect_to_final_url() {
        let mut server = mockito::Server::new_async().await;
        let target = format!("{}/pin/999", server.url());

        let _short = server
            .mock("GET", "/abc123")
            .with_status(302)
            .with_header("location", &target)
            .create_async()
            .await;
        let _pin = server
            .mock("GET", "/pin/999")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let resolver = HttpRedirectResolver::new();
        let resolved = resolver
            .resolve(&format!("{}/abc123", server.url()))
            .await
            .unwrap();
        assert_eq!(resolved, target);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _gone = server
            .mock("GET", "/dead")
            .with_status(404)
            .create_async()
            .await;

        let resolver = HttpRedirectResolver::new();
        let err = resolver
            .resolve(&format!("{}/dead", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::Status(404));
    }
}
