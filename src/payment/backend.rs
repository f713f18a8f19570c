//! Backend payment API seam.
//!
//! The controller only talks to a [`PaymentBackend`]. Response bodies from the
//! real service come in several shapes (`session.id` vs `payment_id`,
//! `qr_code` vs `qr_data`, `order_id` vs `pre_order_id`); the `normalize_*`
//! functions turn them into the canonical session types as soon as they are
//! received so nothing downstream has to branch on field presence.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{PaymentError, Result};
use crate::payment::session::{
    Amount, CommitResult, PaymentSession, QrArtifact, RemoteStatus, SessionId,
};
use crate::{value_bool, value_str};

/// Context passed along with a new session request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetadata {
    pub description: Option<String>,
    /// Pre-order id or local order id the session pays for.
    pub order_ref: Option<String>,
    /// Free-form payment type understood by the backend, e.g. `walk_in`.
    pub payment_type: Option<String>,
    /// Context-specific fields merged into the request body.
    pub extra: Map<String, Value>,
    /// Sent with the confirm call only: what the server commits as the sale.
    pub order_payload: Option<Value>,
}

impl SessionMetadata {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_order_ref(mut self, order_ref: impl Into<String>) -> Self {
        self.order_ref = Some(order_ref.into());
        self
    }

    pub fn with_payment_type(mut self, payment_type: impl Into<String>) -> Self {
        self.payment_type = Some(payment_type.into());
        self
    }

    pub fn with_order_payload(mut self, payload: Value) -> Self {
        self.order_payload = Some(payload);
        self
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Body of a create-session call.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionRequest {
    pub amount: Amount,
    pub metadata: SessionMetadata,
}

impl CreateSessionRequest {
    pub fn to_json(&self) -> Value {
        let mut body = self.metadata.extra.clone();
        body.insert("amount".into(), serde_json::json!(self.amount.as_decimal()));
        body.insert("currency".into(), Value::String(self.amount.currency().into()));
        if let Some(description) = &self.metadata.description {
            body.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(order_ref) = &self.metadata.order_ref {
            body.insert("order_ref".into(), Value::String(order_ref.clone()));
        }
        if let Some(payment_type) = &self.metadata.payment_type {
            body.insert("payment_type".into(), Value::String(payment_type.clone()));
        }
        Value::Object(body)
    }
}

/// Body of a confirm call: whatever the server needs to finalize the sale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfirmRequest {
    pub order_ref: Option<String>,
    /// Cart snapshot (items, customer, totals) for walk-in sales.
    pub order_payload: Option<Value>,
}

impl ConfirmRequest {
    pub fn from_metadata(metadata: &SessionMetadata) -> Self {
        Self {
            order_ref: metadata.order_ref.clone(),
            order_payload: metadata.order_payload.clone(),
        }
    }

    pub fn to_json(&self, session_id: &SessionId) -> Value {
        let mut body = Map::new();
        body.insert("session_id".into(), Value::String(session_id.to_string()));
        if let Some(order_ref) = &self.order_ref {
            body.insert("order_ref".into(), Value::String(order_ref.clone()));
        }
        if let Some(payload) = &self.order_payload {
            body.insert("order".into(), payload.clone());
        }
        Value::Object(body)
    }
}

/// Backend payment API as seen by the session controller.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// Create a session and return it in `Pending` state.
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<PaymentSession>;

    /// One status check for `session_id`.
    async fn session_status(&self, session_id: &SessionId) -> Result<RemoteStatus>;

    /// Ask the server to finalize the sale paid by `session_id`.
    async fn confirm_session(
        &self,
        session_id: &SessionId,
        request: &ConfirmRequest,
    ) -> Result<CommitResult>;

    /// Human-readable description of the backend for logs.
    fn description(&self) -> String;
}

// ---------------------------------------------------------------------------
// Response normalisation
// ---------------------------------------------------------------------------

fn rejected(body: &Value, fallback: &str) -> PaymentError {
    PaymentError::Rejected(value_str(body, &["error", "error_message"]).unwrap_or_else(|| fallback.into()))
}

/// `success: false` is a rejection; a missing flag counts as success.
fn ensure_success(body: &Value, fallback: &str) -> Result<()> {
    if value_bool(body, &["success"]) == Some(false) {
        return Err(rejected(body, fallback));
    }
    Ok(())
}

/// String field, or an object/array serialised to JSON (some backends send
/// `qr_data` as a structured payload).
fn payload_text(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match v.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(obj @ Value::Object(_)) => return Some(obj.to_string()),
            _ => {}
        }
    }
    None
}

/// Normalise a create-session response into a pending [`PaymentSession`].
///
/// Informational `message` fields are deliberately not read.
pub fn normalize_create_response(
    body: &Value,
    request: &CreateSessionRequest,
) -> Result<PaymentSession> {
    ensure_success(body, "Payment session could not be created")?;

    let nested = body.get("session").filter(|s| s.is_object());
    let scopes: Vec<&Value> = nested.into_iter().chain(std::iter::once(body)).collect();

    let raw_id = scopes
        .iter()
        .find_map(|v| value_str(v, &["id", "session_id", "sessionId", "payment_id", "paymentId"]))
        .ok_or_else(|| PaymentError::InvalidResponse("missing session id".into()))?;
    let session_id = SessionId::new(raw_id)?;

    let image_raw = scopes
        .iter()
        .find_map(|v| value_str(v, &["qr_code", "qrCode", "qr_image", "qr_code_base64"]));
    let payload = scopes.iter().find_map(|v| {
        payload_text(
            v,
            &["qr_data", "qrData", "qr_payload", "payment_url", "upi_link"],
        )
    });

    let image = image_raw.as_deref().and_then(QrArtifact::image_from_encoded);
    // A `qr_code` that is not image data is the raw payload under another name.
    let payload = payload.or_else(|| image_raw.filter(|_| image.is_none()));

    let (artifact, fallback) = match (image, payload) {
        (Some(image), payload) => (image, payload),
        (None, Some(text)) => (
            QrArtifact::payload(text.clone())
                .ok_or_else(|| PaymentError::InvalidResponse("empty QR payload".into()))?,
            None,
        ),
        (None, None) => {
            return Err(PaymentError::InvalidResponse(
                "response carries no QR code".into(),
            ))
        }
    };

    let order_ref = scopes
        .iter()
        .find_map(|v| value_str(v, &["pre_order_id", "preOrderId", "order_id", "orderId"]))
        .or_else(|| request.metadata.order_ref.clone());

    Ok(PaymentSession::new(session_id, request.amount.clone(), artifact)
        .with_fallback_text(fallback)
        .with_order_ref(order_ref)
        .with_description(request.metadata.description.clone()))
}

/// Normalise a status response. A `status` field wins even when `success` is
/// false, so a rejected-but-expired session still reads as expired.
pub fn normalize_status_response(body: &Value) -> Result<RemoteStatus> {
    let nested = body.get("session").filter(|s| s.is_object());
    let status = nested
        .and_then(|s| value_str(s, &["status", "payment_status"]))
        .or_else(|| value_str(body, &["status", "payment_status"]));
    match status {
        Some(raw) => Ok(RemoteStatus::parse(&raw)),
        None => {
            ensure_success(body, "Payment status check failed")?;
            Err(PaymentError::InvalidResponse("missing status".into()))
        }
    }
}

/// Normalise a confirm response into a [`CommitResult`].
pub fn normalize_confirm_response(body: &Value, session_id: &SessionId) -> Result<CommitResult> {
    ensure_success(body, "Payment confirmation failed")?;
    let order_ref = value_str(body, &["order_id", "orderId", "pre_order_id", "preOrderId"])
        .or_else(|| {
            body.get("order")
                .and_then(|o| value_str(o, &["id", "order_id"]))
        })
        .or_else(|| value_str(body, &["id"]));
    Ok(CommitResult {
        session_id: session_id.clone(),
        order_ref,
        already_finalized: false,
    })
}
