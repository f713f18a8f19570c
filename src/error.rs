//! Error taxonomy for the QR payment path.
//!
//! Storage and settings helpers keep returning `Result<_, String>` (the same
//! convention as `db.rs`); they are folded into [`PaymentError::Storage`] at
//! the checkout boundary.

use thiserror::Error;

/// Errors surfaced by the payment controller and its backend client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// Input rejected before any network call (empty cart, amount <= 0, ...).
    #[error("{0}")]
    Validation(String),

    /// Transport failure: connection refused, timeout, DNS, TLS.
    #[error("{0}")]
    Network(String),

    /// Non-success HTTP status that is not a known session state.
    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },

    /// The backend answered `success: false`.
    #[error("{0}")]
    Rejected(String),

    /// The backend no longer knows the session (404/410 on status or confirm).
    #[error("Payment session no longer exists")]
    SessionGone,

    /// The session reached the expired state; nothing more can be done with it.
    #[error("Payment session expired, please retry")]
    SessionExpired,

    /// Confirmation requested with no session in flight.
    #[error("No active payment session")]
    NoActiveSession,

    /// A newer `start_session` or a cancel replaced this session while it was
    /// being created.
    #[error("Payment session was replaced before it started")]
    Superseded,

    /// The paid session is being committed and cannot be replaced or dropped.
    #[error("Payment is being completed, please wait")]
    CommitInProgress,

    /// Re-validation found the session still pending.
    #[error("Payment not yet received")]
    NotYetReceived,

    /// The backend response could not be normalised.
    #[error("Invalid response from payment backend: {0}")]
    InvalidResponse(String),

    /// Local storage (cart persistence, settings) failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Text shown to the cashier in a notification.
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Network(_) => {
                format!("{self}. Check the connection and try again.")
            }
            PaymentError::Http { status, .. } if *status >= 500 => {
                "Payment service is temporarily unavailable".to_string()
            }
            PaymentError::NotYetReceived => {
                "Payment not yet received. Ask the customer to finish scanning, then confirm again."
                    .to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether a poll tick that hit this error should simply retry next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            PaymentError::Network(_) | PaymentError::InvalidResponse(_) => true,
            PaymentError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for PaymentError {
    fn from(err: rusqlite::Error) -> Self {
        PaymentError::Storage(err.to_string())
    }
}

/// Result alias for the payment path.
pub type Result<T> = std::result::Result<T, PaymentError>;
