//! The Small POS - QR payment checkout
//!
//! Drives QR-code payments for the two checkout contexts of the POS: walk-in
//! counter sales built from a cart, and pre-orders paid at pickup. Each
//! context owns a [`payment::QrSessionController`] that creates a payment
//! session on the backend, keeps the QR on screen, polls for the result and
//! commits the sale exactly once.
//!
//! Front ends receive [`notify::CheckoutEvent`]s through an
//! [`notify::EventSink`]; nothing here renders UI.

pub mod api;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod notify;
pub mod payment;

pub use checkout::{Checkouts, PreOrderCheckout, WalkInCheckout};
pub use config::PaymentConfig;
pub use error::{PaymentError, Result};
pub use notify::{ChannelSink, CheckoutEvent, EventSink, LogSink};

/// First non-empty string among `keys`.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// First boolean among `keys`; `"true"`/`"false"` strings count too.
pub(crate) fn value_bool(v: &serde_json::Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        match v.get(*key) {
            Some(serde_json::Value::Bool(b)) => return Some(*b),
            Some(serde_json::Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => return Some(true),
                "false" => return Some(false),
                _ => {}
            },
            _ => {}
        }
    }
    None
}
