//! Common utilities for the IaaS API client
//!
//! Provides the authenticated HTTP transport shared by every resource call.

pub mod query;

use crate::error::IaasError;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// HTTP client wrapper with authentication and transport-level retry
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    access_token: String,
    access_token_secret: String,
    accept_language: Option<String>,
    retry_max: u32,
    retry_interval: Duration,
    trace_mode: bool,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .field("accept_language", &self.accept_language)
            .field("retry_max", &self.retry_max)
            .field("retry_interval", &self.retry_interval)
            .field("trace_mode", &self.trace_mode)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, access_token: String, access_token_secret: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            access_token_secret,
            accept_language: None,
            retry_max: 0,
            retry_interval: Duration::from_secs(5),
            trace_mode: false,
        }
    }

    /// Send `Accept-Language` with every request
    pub fn with_accept_language(mut self, lang: Option<String>) -> Self {
        self.accept_language = lang.filter(|l| !l.is_empty());
        self
    }

    /// Retry throttled (423/503) responses, refused connections and timed-out GETs
    pub fn with_retry(mut self, retry_max: u32, retry_interval: Duration) -> Self {
        self.retry_max = retry_max;
        self.retry_interval = retry_interval;
        self
    }

    /// Log request and response bodies at trace level
    pub fn with_trace_mode(mut self, trace_mode: bool) -> Self {
        self.trace_mode = trace_mode;
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::LOCKED || status == StatusCode::SERVICE_UNAVAILABLE
    }

    /// A refused connection never reached the server. A timeout may have,
    /// so only idempotent reads are sent again after one.
    fn is_retryable_error(method: &Method, e: &reqwest::Error) -> bool {
        e.is_connect() || (e.is_timeout() && *method == Method::GET)
    }

    /// Send a request and decode the JSON answer.
    ///
    /// An empty body decodes as `Value::Null`.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, IaasError> {
        let url = self.build_url(path);
        let mut attempt = 0;

        loop {
            debug!("{} {}", method, url);
            if self.trace_mode {
                if let Some(body) = body {
                    trace!("request body: {}", body);
                }
            }

            let mut request = self
                .client
                .request(method.clone(), &url)
                .basic_auth(&self.access_token, Some(&self.access_token_secret))
                .header("Accept", "application/json");
            if let Some(lang) = &self.accept_language {
                request = request.header("Accept-Language", lang);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if Self::is_retryable_error(&method, &e) && attempt < self.retry_max => {
                    attempt += 1;
                    warn!("{} {} failed ({}), retry {}/{}", method, path, e, attempt, self.retry_max);
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
                Err(e) => return Err(IaasError::Http(e)),
            };

            let status = response.status();
            if Self::is_retryable_status(status) && attempt < self.retry_max {
                attempt += 1;
                warn!("{} {} returned {}, retry {}/{}", method, path, status, attempt, self.retry_max);
                tokio::time::sleep(self.retry_interval).await;
                continue;
            }

            let text = response.text().await?;
            if self.trace_mode {
                trace!("response {} {}: {}", status, path, text);
            }

            if status == StatusCode::NOT_FOUND {
                return Err(IaasError::NotFound(format!("{} {} - {}", method, path, text)));
            }
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(IaasError::Authentication(format!(
                    "{} {} failed: {} - {}",
                    method, path, status, text
                )));
            }
            if !status.is_success() {
                return Err(IaasError::Api(format!(
                    "{} {} failed: {} - {}",
                    method, path, status, text
                )));
            }

            if text.trim().is_empty() {
                return Ok(serde_json::Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| {
                IaasError::InvalidResponse(format!(
                    "error decoding response body: {} - Response (first 500 chars): {}",
                    e,
                    text.chars().take(500).collect::<String>()
                ))
            });
        }
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<serde_json::Value, IaasError> {
        self.send(Method::GET, path, None).await
    }

    /// Make a POST request
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, IaasError> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Make a PUT request, optionally without a body
    pub async fn put(&self, path: &str, body: Option<&serde_json::Value>) -> Result<serde_json::Value, IaasError> {
        self.send(Method::PUT, path, body).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<serde_json::Value, IaasError> {
        self.send(Method::DELETE, path, None).await
    }
}

/// Decode one field of a response envelope, e.g. `{"Switch": {...}}`.
pub fn decode_field<T: DeserializeOwned>(
    mut envelope: serde_json::Value,
    key: &str,
) -> Result<T, IaasError> {
    let value = envelope
        .get_mut(key)
        .map(serde_json::Value::take)
        .ok_or_else(|| IaasError::InvalidResponse(format!("response has no {:?} field", key)))?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod mod_test;
