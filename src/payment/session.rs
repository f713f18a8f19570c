//! QR payment session data model.
//!
//! A [`PaymentSession`] is one attempt to collect one amount. Its QR artifact
//! never changes after creation; the only mutable field is `status`, which
//! moves forward from `Pending` to a terminal state and then stays put.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PaymentError, Result};

/// Currency used when neither config nor caller supplies one.
pub const DEFAULT_CURRENCY: &str = "USD";

// ---------------------------------------------------------------------------
// Identifiers and amounts
// ---------------------------------------------------------------------------

/// Opaque session identifier issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(PaymentError::InvalidResponse(
                "payment session id is empty".into(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Positive, currency-qualified amount held in minor units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amount {
    cents: i64,
    currency: String,
}

impl Amount {
    /// Build from a decimal value such as `25.00`. Rounds to cents and rejects
    /// anything that is not strictly positive once rounded.
    pub fn from_decimal(value: f64, currency: &str) -> Result<Self> {
        if !value.is_finite() {
            return Err(PaymentError::Validation("Amount must be a number".into()));
        }
        let cents = (value * 100.0).round();
        if cents < 1.0 {
            return Err(PaymentError::Validation(
                "Amount must be greater than zero".into(),
            ));
        }
        if cents > i64::MAX as f64 {
            return Err(PaymentError::Validation("Amount is too large".into()));
        }
        Self::from_cents(cents as i64, currency)
    }

    pub fn from_cents(cents: i64, currency: &str) -> Result<Self> {
        if cents <= 0 {
            return Err(PaymentError::Validation(
                "Amount must be greater than zero".into(),
            ));
        }
        let currency = currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::Validation(format!(
                "Invalid currency code: {currency}"
            )));
        }
        Ok(Self { cents, currency })
    }

    /// Parse user input like `"25"`, `"25.5"` or `"$25.00"`.
    pub fn parse(raw: &str, currency: &str) -> Result<Self> {
        let cleaned: String = raw
            .trim()
            .trim_start_matches('$')
            .chars()
            .filter(|c| *c != ',')
            .collect();
        let value: f64 = cleaned
            .parse()
            .map_err(|_| PaymentError::Validation(format!("Invalid amount: {raw}")))?;
        Self::from_decimal(value, currency)
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Decimal value for JSON request bodies.
    pub fn as_decimal(&self) -> f64 {
        self.cents as f64 / 100.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.cents / 100,
            self.cents % 100,
            self.currency
        )
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Completed,
    Expired,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }

    /// Only `Pending` may move, and only to a terminal state.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        self == SessionStatus::Pending && next.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Status as reported by the backend status endpoint, before the controller
/// decides what it means for the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Completed,
    Expired,
    /// Any string the client does not recognise.
    Unknown(String),
}

impl RemoteStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "waiting" | "created" | "processing" => RemoteStatus::Pending,
            "completed" | "complete" | "paid" | "succeeded" | "success" => {
                RemoteStatus::Completed
            }
            "expired" | "timeout" | "timed_out" | "cancelled" | "canceled" => {
                RemoteStatus::Expired
            }
            other => RemoteStatus::Unknown(other.to_string()),
        }
    }
}

/// Result of a single poll tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    StillPending,
    Completed,
    Expired,
    /// Missed tick: the session is untouched and the loop keeps going.
    TransientError(String),
}

impl PollOutcome {
    /// Only `Completed` and `Expired` stop the loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollOutcome::Completed | PollOutcome::Expired)
    }
}

// ---------------------------------------------------------------------------
// QR artifact
// ---------------------------------------------------------------------------

/// Rendered or raw form of the payment QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QrArtifact {
    /// Base64 raster image (no `data:` prefix).
    Image { base64: String, mime: String },
    /// Raw QR payload text for manual fallback display.
    Payload { text: String },
}

impl QrArtifact {
    /// Accepts either bare base64 or a `data:image/png;base64,...` URI.
    /// Returns `None` when the value is not decodable image data.
    pub fn image_from_encoded(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let (mime, data) = match trimmed.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest.split_once(',')?;
                let mime = header.strip_suffix(";base64")?;
                (mime.to_string(), data)
            }
            None => ("image/png".to_string(), trimmed),
        };
        let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64_STANDARD.decode(&compact).ok()?;
        if bytes.is_empty() {
            return None;
        }
        Some(QrArtifact::Image {
            base64: compact,
            mime,
        })
    }

    pub fn payload(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            None
        } else {
            Some(QrArtifact::Payload { text })
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, QrArtifact::Image { .. })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One attempt to collect payment via QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    session_id: SessionId,
    amount: Amount,
    qr_artifact: QrArtifact,
    /// Raw payload kept alongside an image so the UI can offer both.
    qr_fallback_text: Option<String>,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    associated_order_ref: Option<String>,
    description: Option<String>,
}

impl PaymentSession {
    pub fn new(session_id: SessionId, amount: Amount, qr_artifact: QrArtifact) -> Self {
        Self {
            session_id,
            amount,
            qr_artifact,
            qr_fallback_text: None,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            associated_order_ref: None,
            description: None,
        }
    }

    pub fn with_fallback_text(mut self, text: Option<String>) -> Self {
        self.qr_fallback_text = text.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_order_ref(mut self, order_ref: Option<String>) -> Self {
        self.associated_order_ref = order_ref;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    pub fn qr_artifact(&self) -> &QrArtifact {
        &self.qr_artifact
    }

    pub fn qr_fallback_text(&self) -> Option<&str> {
        self.qr_fallback_text.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn associated_order_ref(&self) -> Option<&str> {
        self.associated_order_ref.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Link the session to an order once one exists. The first link wins.
    pub fn link_order(&mut self, order_ref: &str) {
        if self.associated_order_ref.is_none() && !order_ref.trim().is_empty() {
            self.associated_order_ref = Some(order_ref.trim().to_string());
        }
    }

    /// Move to `next`. Fails without changing anything when the move would
    /// leave a terminal state or go back to `Pending`.
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::Validation(format!(
                "Illegal session transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// Outcome of committing a sale for a paid session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub session_id: SessionId,
    pub order_ref: Option<String>,
    /// True when another path had already finalized this session and this
    /// call did nothing.
    pub already_finalized: bool,
}
