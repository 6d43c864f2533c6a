//! HTTP transport for the ECS REST API
//!
//! Owns the only `reqwest::Client` of a gateway instance. Every request carries a
//! Basic authorization header and, when configured, a client identity for mutual TLS.
//! Rate-limited responses carrying `Retry-After` are retried after the advertised
//! delay; the wait is interruptible through the caller's cancellation token.

use crate::config::ConnectionConfig;
use crate::utils::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Identity, Method, StatusCode};
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Basic authentication credential
#[derive(Clone)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Value of the `Authorization` header
    pub fn basic_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// One call against the ECS API
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub method: Method,
    /// Resource path relative to the base URL, e.g. `certificates/42`
    pub resource: String,
    /// Query parameters, only sent with read verbs
    pub query: Vec<(String, String)>,
    /// JSON payload, only sent with mutating verbs
    pub body: Option<serde_json::Value>,
}

impl RemoteRequest {
    pub fn get(resource: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            resource: resource.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(resource: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            resource: resource.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn patch(resource: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::PATCH,
            resource: resource.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Whether the verb carries a body instead of a query string
    pub fn is_mutating(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }
}

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the CA
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request, transparently waiting out rate limits
    async fn send(
        &self,
        request: &RemoteRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<RawResponse>;
}

/// `reqwest` based transport
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    credential: Credential,
}

impl HttpTransport {
    /// Create a transport from the connection configuration
    ///
    /// Client certificate files are read once here.
    pub fn new(config: &ConnectionConfig) -> GatewayResult<Self> {
        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if let Some(client_cert) = &config.client_certificate {
            // Additional trust anchors go in before the identity
            if let Some(ca_path) = &client_cert.ca_path {
                let ca_pem = std::fs::read(ca_path).map_err(|e| {
                    GatewayError::Config(format!("Failed to read CA bundle {:?}: {}", ca_path, e))
                })?;
                let ca_cert = reqwest::Certificate::from_pem(&ca_pem).map_err(|e| {
                    GatewayError::Config(format!("Failed to parse CA certificate: {}", e))
                })?;
                client_builder = client_builder.add_root_certificate(ca_cert);
            }

            if let (Some(cert_path), Some(key_path)) = (&client_cert.cert_path, &client_cert.key_path)
            {
                let cert_pem = std::fs::read(cert_path).map_err(|e| {
                    GatewayError::Config(format!(
                        "Failed to read client certificate {:?}: {}",
                        cert_path, e
                    ))
                })?;
                let key_pem = std::fs::read(key_path).map_err(|e| {
                    GatewayError::Config(format!("Failed to read client key {:?}: {}", key_path, e))
                })?;

                // rustls wants certificate and key in one PEM bundle
                let mut pem_bundle = cert_pem;
                pem_bundle.push(b'\n');
                pem_bundle.extend_from_slice(&key_pem);

                let identity = Identity::from_pem(&pem_bundle).map_err(|e| {
                    GatewayError::Config(format!("Failed to create client identity: {}", e))
                })?;
                client_builder = client_builder.identity(identity);
                debug!("ECS: client certificate loaded from {:?}", cert_path);
            }
        }

        if !config.ssl_verify {
            warn!("ECS: TLS certificate verification is disabled");
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            credential: Credential::new(&config.username, &config.password),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of a request; query parameters are dropped for mutating verbs
    pub fn build_url(&self, request: &RemoteRequest) -> String {
        let mut url = format!(
            "{}/{}",
            self.base_url,
            request.resource.trim_start_matches('/')
        );
        if !request.is_mutating() && !request.query.is_empty() {
            let query = request
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }
        url
    }

    fn log_send_failure(url: &str, e: &reqwest::Error) {
        error!("ECS ERROR: HTTP request failed to {}: {}", url, e);
        error!(
            "ECS ERROR: Error flags - is_connect: {}, is_timeout: {}, is_request: {}",
            e.is_connect(),
            e.is_timeout(),
            e.is_request()
        );

        if let Some(source) = e.source() {
            error!("ECS ERROR: Underlying cause: {}", source);
            let mut current: &dyn StdError = source;
            while let Some(next) = current.source() {
                error!("ECS ERROR: Caused by: {}", next);
                current = next;
            }

            let cause = source.to_string();
            if cause.contains("UnknownIssuer") {
                error!("ECS SSL ERROR: Server certificate not trusted!");
                error!("  - Verify connection.client_certificate.ca_path if a private CA is used");
            } else if cause.to_lowercase().contains("certificate") {
                error!("ECS SSL ERROR: Certificate validation failed");
                error!("  - Check the client certificate and key are PEM encoded and not expired");
            }
        }
    }
}

/// Seconds advertised by an integer `Retry-After` header
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &RemoteRequest,
        cancel: &CancellationToken,
    ) -> GatewayResult<RawResponse> {
        let url = self.build_url(request);

        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            debug!("ECS: Sending {} request to {}", request.method, url);
            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .header(AUTHORIZATION, self.credential.basic_header())
                .header(ACCEPT, "application/json");
            if request.is_mutating() {
                if let Some(body) = &request.body {
                    builder = builder.json(body);
                }
            }

            let started = Instant::now();
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                result = builder.send() => result.map_err(|e| {
                    Self::log_send_failure(&url, &e);
                    GatewayError::from(e)
                })?,
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
            {
                match parse_retry_after(response.headers()) {
                    Some(retry_after) => {
                        let wait = Duration::from_secs(retry_after.saturating_add(1));
                        warn!(
                            "ECS: {} from {}, retrying in {}s",
                            status,
                            url,
                            wait.as_secs()
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                            _ = tokio::time::sleep(wait) => {}
                        }
                        continue;
                    }
                    None if status == StatusCode::TOO_MANY_REQUESTS => {
                        let body = response.text().await.unwrap_or_default();
                        warn!("ECS: rate limited by {} without Retry-After", url);
                        return Err(GatewayError::RateLimited(format!(
                            "{} returned {} without a usable Retry-After header: {}",
                            url, status, body
                        )));
                    }
                    None => {}
                }
            }

            let body = response.text().await.map_err(|e| {
                error!("ECS ERROR: Failed to read response body from {}: {}", url, e);
                GatewayError::from(e)
            })?;
            debug!(
                "ECS: {} {} -> {} ({} bytes, {} ms)",
                request.method,
                url,
                status.as_u16(),
                body.len(),
                started.elapsed().as_millis()
            );

            return Ok(RawResponse {
                status: status.as_u16(),
                body,
            });
        }
    }
}
