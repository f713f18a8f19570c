//! HTTP client for the backend payment API.
//!
//! One [`HttpPaymentBackend`] per checkout context: the walk-in and pre-order
//! flows hit different endpoint sets but share the same request/response
//! handling.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{EndpointSet, PaymentConfig, StatusMethod};
use crate::error::{PaymentError, Result};
use crate::payment::backend::{
    normalize_confirm_response, normalize_create_response, normalize_status_response,
    ConfirmRequest, CreateSessionRequest, PaymentBackend,
};
use crate::payment::session::{CommitResult, PaymentSession, RemoteStatus, SessionId};

const API_KEY_HEADER: &str = "X-POS-API-Key";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` segment
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Minimal percent-encoding for ids placed in a path or query string.
fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Substitute `{id}` in `path`. Returns `None` when the path has no
/// placeholder and the id has to travel some other way.
fn fill_id(path: &str, session_id: &SessionId) -> Option<String> {
    path.contains("{id}")
        .then(|| path.replace("{id}", &encode_component(session_id.as_str())))
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn friendly_error(url: &str, err: &reqwest::Error) -> PaymentError {
    let message = if err.is_connect() {
        format!("Cannot reach payment backend at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid payment backend URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    PaymentError::Network(message)
}

fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized for payments".to_string(),
        404 => "Payment endpoint not found".to_string(),
        429 => "Payment backend is rate limiting requests".to_string(),
        s if s >= 500 => format!("Payment backend server error (HTTP {s})"),
        s => format!("Unexpected response from payment backend (HTTP {s})"),
    }
}

/// Which call is being made; decides how 404/410 is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Create,
    Status,
    Confirm,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// reqwest-backed [`PaymentBackend`].
pub struct HttpPaymentBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    endpoints: EndpointSet,
}

impl HttpPaymentBackend {
    pub fn new(config: &PaymentConfig, endpoints: EndpointSet) -> Result<Self> {
        config.validate().map_err(PaymentError::Validation)?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PaymentError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(&config.base_url),
            api_key: config.api_key.clone(),
            endpoints,
        })
    }

    /// Walk-in POS endpoints from `config`.
    pub fn walk_in(config: &PaymentConfig) -> Result<Self> {
        Self::new(config, config.walk_in.clone())
    }

    /// Pre-order endpoints from `config`.
    pub fn pre_order(config: &PaymentConfig) -> Result<Self> {
        Self::new(config, config.pre_order.clone())
    }

    async fn send(
        &self,
        kind: CallKind,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let full_url = format!("{}{path}", self.base_url);
        let mut req = self
            .client
            .request(method.clone(), &full_url)
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }
        if let Some(b) = &body {
            req = req.json(b);
        }

        let start = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        debug!(
            %method,
            path,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "payment backend call"
        );

        if !status.is_success() {
            if kind != CallKind::Create
                && matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE)
            {
                return Err(PaymentError::SessionGone);
            }
            // A JSON error body may still carry a status (e.g. 409 + expired).
            if let Ok(json) = serde_json::from_str::<Value>(&body_text) {
                if kind == CallKind::Status && json.get("status").is_some() {
                    return Ok(json);
                }
                let message = crate::value_str(&json, &["error", "message"])
                    .unwrap_or_else(|| status_message(status));
                return Err(PaymentError::Http {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(PaymentError::Http {
                status: status.as_u16(),
                message: status_message(status),
            });
        }

        if body_text.trim().is_empty() {
            return Err(PaymentError::InvalidResponse("empty body".into()));
        }
        serde_json::from_str(&body_text)
            .map_err(|e| PaymentError::InvalidResponse(format!("invalid JSON: {e}")))
    }
}

#[async_trait]
impl PaymentBackend for HttpPaymentBackend {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<PaymentSession> {
        let body = self
            .send(
                CallKind::Create,
                Method::POST,
                &self.endpoints.create,
                Some(request.to_json()),
            )
            .await?;
        let session = normalize_create_response(&body, request)?;
        info!(
            session_id = %session.session_id(),
            amount = %session.amount(),
            "QR payment session created"
        );
        Ok(session)
    }

    async fn session_status(&self, session_id: &SessionId) -> Result<RemoteStatus> {
        let body = match self.endpoints.status_method {
            StatusMethod::Get => {
                let path = fill_id(&self.endpoints.status, session_id).unwrap_or_else(|| {
                    format!(
                        "{}?session_id={}",
                        self.endpoints.status,
                        encode_component(session_id.as_str())
                    )
                });
                self.send(CallKind::Status, Method::GET, &path, None).await?
            }
            StatusMethod::Post => {
                let path = fill_id(&self.endpoints.status, session_id)
                    .unwrap_or_else(|| self.endpoints.status.clone());
                let body = serde_json::json!({ "session_id": session_id.as_str() });
                self.send(CallKind::Status, Method::POST, &path, Some(body))
                    .await?
            }
        };
        normalize_status_response(&body)
    }

    async fn confirm_session(
        &self,
        session_id: &SessionId,
        request: &ConfirmRequest,
    ) -> Result<CommitResult> {
        let path = fill_id(&self.endpoints.confirm, session_id)
            .unwrap_or_else(|| self.endpoints.confirm.clone());
        let body = self
            .send(
                CallKind::Confirm,
                Method::POST,
                &path,
                Some(request.to_json(session_id)),
            )
            .await?;
        let result = normalize_confirm_response(&body, session_id);
        if let Err(e) = &result {
            warn!(session_id = %session_id, error = %e, "QR payment confirmation rejected");
        }
        result
    }

    fn description(&self) -> String {
        format!("{}{}", self.base_url, self.endpoints.create)
    }
}
