//! Tracking-platform adapter
//!
//! [`PlatformClient`] is the seam between the import pipeline and the
//! external platform. Every call returns a typed outcome so the chunk
//! processor can decide between retrying, recording a failure and halting
//! the job without inspecting transport details.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::types::{ItemKind, WorkItem};
use crate::config::PlatformConfig;

/// How the pipeline reacts to a [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff up to the attempt limit
    Recoverable,
    /// Item-scoped; recorded without retrying
    Validation,
    /// Invalidates the whole job
    Fatal,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Platform call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Platform rate limited the request")]
    RateLimited,

    #[error("Platform server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Platform rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Platform schema mismatch: {0}")]
    Schema(String),
}

impl ClientError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::Timeout(_)
            | ClientError::RateLimited
            | ClientError::Server(_)
            | ClientError::Network(_) => ErrorClass::Recoverable,
            ClientError::Validation(_) => ErrorClass::Validation,
            ClientError::Unauthorized(_) | ClientError::Schema(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Short error kind reported to the health monitor
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Timeout(_) => "timeout",
            ClientError::RateLimited => "rate_limited",
            ClientError::Server(_) => "server_error",
            ClientError::Network(_) => "network",
            ClientError::Validation(_) => "validation",
            ClientError::Unauthorized(_) => "unauthorized",
            ClientError::Schema(_) => "schema",
        }
    }

    /// Whether the platform should be counted as reachable for this outcome
    pub fn counts_as_platform_success(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }

    /// Map a non-success HTTP status to a typed outcome
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {}", truncate(body, 200))
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Unauthorized(detail),
            StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited,
            StatusCode::NOT_FOUND
            | StatusCode::UNPROCESSABLE_ENTITY
            | StatusCode::BAD_REQUEST
            | StatusCode::GONE => ClientError::Validation(detail),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ClientError::Server(detail),
            s if s.is_server_error() => ClientError::Server(detail),
            _ => ClientError::Schema(format!("unexpected response {detail}")),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Operations the import pipeline needs from the tracking platform
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Identifiers of every record of `kind`, in platform order
    async fn list(&self, kind: ItemKind) -> Result<Vec<String>, ClientError>;

    /// Full record for one work item
    async fn fetch(&self, item: &WorkItem) -> Result<Value, ClientError>;
}

/// Shape checks applied to a fetched record before it is written locally
pub fn validate_record(item: &WorkItem, record: &Value) -> Result<(), String> {
    let obj = record
        .as_object()
        .ok_or_else(|| format!("{item}: record is not a JSON object"))?;

    match item.kind {
        ItemKind::User => {
            let username = obj
                .get("username")
                .and_then(Value::as_str)
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| format!("{item}: missing username"))?;
            if username != item.identifier {
                return Err(format!(
                    "{item}: username '{username}' does not match requested identifier"
                ));
            }
            if let Some(email) = obj.get("email") {
                match email.as_str() {
                    Some(e) if e.contains('@') => {},
                    Some(e) if e.is_empty() => {},
                    _ => return Err(format!("{item}: invalid email {email}")),
                }
            }
        },
        ItemKind::Vehicle => {
            obj.get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| format!("{item}: missing vehicle name"))?;
            if let Some(id) = obj.get("id") {
                let id = match id {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    other => return Err(format!("{item}: invalid vehicle id {other}")),
                };
                if id != item.identifier {
                    return Err(format!("{item}: vehicle id '{id}' does not match requested identifier"));
                }
            }
        },
    }

    Ok(())
}

/// `reqwest`-backed adapter for the platform REST API
///
/// Endpoints, relative to the configured base URL:
/// - `GET api/users`, `GET api/vehicles`: arrays of objects or bare ids
/// - `GET api/users/{username}`, `GET api/vehicles/{id}`: one record
pub struct HttpPlatformClient {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
    request_timeout: Duration,
}

impl HttpPlatformClient {
    pub fn new(config: &PlatformConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ClientError::Schema(format!("invalid platform base URL '{}': {e}", config.base_url)))?;

        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
            request_timeout,
        })
    }

    fn collection(kind: ItemKind) -> &'static str {
        match kind {
            ItemKind::User => "users",
            ItemKind::Vehicle => "vehicles",
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Schema(format!("base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, ClientError> {
        debug!(url = %url, "Platform request");

        let mut request = self.client.get(url);
        if let Some(ref token) = self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.request_timeout))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ClientError::Schema(format!("response is not valid JSON: {e}")))
    }
}

fn map_transport_error(e: reqwest::Error, timeout: Duration) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout(timeout)
    } else if e.is_decode() {
        ClientError::Schema(e.to_string())
    } else {
        ClientError::Network(e.to_string())
    }
}

fn identifier_of(kind: ItemKind, entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => {
            let field = match kind {
                ItemKind::User => "username",
                ItemKind::Vehicle => "id",
            };
            match obj.get(field)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        },
        _ => None,
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn list(&self, kind: ItemKind) -> Result<Vec<String>, ClientError> {
        let url = self.endpoint(&[Self::collection(kind)])?;
        let body = self.get_json(url).await?;

        let entries = body
            .as_array()
            .ok_or_else(|| ClientError::Schema(format!("{} listing is not an array", kind.as_str())))?;

        entries
            .iter()
            .map(|entry| {
                identifier_of(kind, entry).ok_or_else(|| {
                    ClientError::Schema(format!("{} listing entry has no identifier: {entry}", kind.as_str()))
                })
            })
            .collect()
    }

    async fn fetch(&self, item: &WorkItem) -> Result<Value, ClientError> {
        let url = self.endpoint(&[Self::collection(item.kind), item.identifier.as_str()])?;
        self.get_json(url).await
    }
}
