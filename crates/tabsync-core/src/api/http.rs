//! HTTP transport for the platform's REST API.
//!
//! Attaches the bearer token found in the shared store, retries rate-limited
//! calls with exponential backoff, and hands back the response envelope.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use super::error::ApiError;
use super::transport::{ApiRequest, Envelope, Method, Transport};
use crate::store::{SharedStore, TOKEN_KEY};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// reqwest-backed [`Transport`].
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    store: Arc<dyn SharedStore>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, store: Arc<dyn SharedStore>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            store,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Token read fresh on every call so a login in another context is picked up.
    fn bearer_token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                debug!(error = %e, "Token unavailable, sending anonymous request");
                None
            }
        }
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        let url = self.url(&request.endpoint);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url).query(&request.params),
            Method::Post => self.client.post(&url).json(&request.params),
        };
        builder = builder.header(header::ACCEPT, "application/json");
        if let Some(token) = self.bearer_token() {
            builder = builder.bearer_auth(token);
        }
        Ok(builder.send().await?)
    }

    /// Turn a non-rate-limited response into an envelope or an error.
    /// Error statuses whose body is itself an envelope keep the server's message.
    async fn read_envelope(response: reqwest::Response) -> Result<Envelope, ApiError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse envelope: {}", e)));
        }

        match serde_json::from_str::<Envelope>(&body) {
            Ok(envelope) if envelope.message.is_some() => Ok(Envelope {
                success: false,
                ..envelope
            }),
            _ => Err(ApiError::from_status(status, &body)),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: &ApiRequest) -> Result<Envelope, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.send_once(request).await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Self::read_envelope(response).await;
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(
                endpoint = %request.endpoint,
                retry = retries,
                backoff_ms = backoff_ms,
                "Rate limited, backing off"
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2; // Exponential backoff
        }
    }
}
