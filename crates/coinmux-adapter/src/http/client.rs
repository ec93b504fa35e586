/*
[INPUT]:  HTTP configuration (base URL, timeouts, token source)
[OUTPUT]: Configured reqwest client ready for snapshot calls
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing client behavior
*/

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::auth::TokenSource;
use crate::http::{CoinmuxError, Result};
use crate::ws::message::truncate_for_log;

const BODY_PREVIEW_BYTES: usize = 256;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for the aggregator's snapshot endpoints
#[derive(Debug, Clone)]
pub struct CoinmuxClient {
    http_client: Client,
    base_url: Url,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl CoinmuxClient {
    /// Create a new client with default configuration
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(ClientConfig::default(), base_url)
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig, base_url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
            tokens: None,
        })
    }

    /// Attach the token source used for authenticated endpoints
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build request builder for an endpoint path
    pub(crate) fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(endpoint)?;
        Ok(self.http_client.request(method, url))
    }

    /// Build request builder carrying the session token as bearer auth
    pub(crate) fn authed_request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let tokens = self.tokens.as_ref().ok_or_else(|| CoinmuxError::Authentication {
            message: "no session token source configured".to_string(),
        })?;
        let token = tokens.session_token().ok_or(CoinmuxError::TokenExpired)?;
        Ok(self.request(method, endpoint)?.bearer_auth(token))
    }

    /// Send a request and decode the JSON body.
    ///
    /// A body with a non-null `error` field is an API error even on 2xx.
    pub(crate) async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(1);
            return Err(CoinmuxError::RateLimit { retry_after });
        }

        let body = response.text().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "snapshot response");

        let value: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&body) {
                Ok(value) => value,
                Err(_) if !status.is_success() => {
                    return Err(CoinmuxError::api_error(status, body));
                }
                Err(err) => {
                    return Err(CoinmuxError::InvalidResponse(format!(
                        "{err}: {}",
                        truncate_for_log(&body, BODY_PREVIEW_BYTES)
                    )));
                }
            }
        };

        if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
            let message = match error {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            return Err(CoinmuxError::api_error(status, message));
        }

        if !status.is_success() {
            return Err(CoinmuxError::api_error(status, value.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}
