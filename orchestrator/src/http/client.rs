//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

use crate::errors::OrchestratorError;
use crate::utils::Backoff;

/// Retry policy for idempotent control-plane calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Backoff::default(),
        }
    }
}

/// JSON-over-HTTP client with bearer authentication and retries
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self, OrchestratorError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| OrchestratorError::ConfigError(format!("invalid URL {}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(OrchestratorError::ConfigError(format!(
                "unsupported URL scheme in {}",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_once<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, OrchestratorError> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header(header::ACCEPT, "application/json");

        if let Some(token) = &self.token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!("HTTP {} {} failed: {} - {}", method, url, status, body);
        Err(OrchestratorError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }

    /// Send a request, retrying transient failures with exponential backoff.
    /// A 404 is returned as `Ok(None)`.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Option<reqwest::Response>, OrchestratorError> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            debug!("{} {}", method, url);
            match self.send_once(method.clone(), &url, body).await {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) => return Ok(Some(response)),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.backoff.delay(attempt);
                    warn!("{} {} failed ({}), retrying in {:?}", method, url, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// GET a resource that may not exist
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, OrchestratorError> {
        match self.send::<()>(Method::GET, path, None).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }

    /// GET a resource that must exist
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, OrchestratorError> {
        self.get_optional(path)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(self.url(path)))
    }

    /// PUT (create or replace) a resource
    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, OrchestratorError> {
        match self.send(Method::PUT, path, Some(body)).await? {
            Some(response) => Ok(response.json().await?),
            None => Err(OrchestratorError::NotFound(self.url(path))),
        }
    }

    /// DELETE a resource; deleting a missing resource succeeds
    pub async fn delete(&self, path: &str) -> Result<(), OrchestratorError> {
        self.send::<()>(Method::DELETE, path, None).await?;
        Ok(())
    }
}
