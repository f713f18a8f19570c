//! Checkout events pushed to whatever renders the checkout screen.
//!
//! Payloads are camelCase JSON with a `type` tag so a webview or a terminal
//! front end can consume them without knowing Rust types.

use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

/// What the customer-facing QR panel should show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrDisplay {
    pub session_id: String,
    /// Formatted amount, e.g. `25.00 USD`.
    pub amount: String,
    /// `data:` URI when the backend returned an image.
    pub image_src: Option<String>,
    /// Raw payload to print under (or instead of) the image.
    pub fallback_text: Option<String>,
}

/// Event emitted by a checkout context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CheckoutEvent {
    #[serde(rename_all = "camelCase")]
    SessionRendered { context: String, display: QrDisplay },
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        context: String,
        session_id: String,
        status: String,
    },
    #[serde(rename_all = "camelCase")]
    PaymentCompleted {
        context: String,
        session_id: String,
        order_ref: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SessionExpired { context: String, session_id: String },
    #[serde(rename_all = "camelCase")]
    SessionCancelled { context: String, session_id: String },
    #[serde(rename_all = "camelCase")]
    CartChanged {
        context: String,
        item_count: usize,
        total_cents: i64,
    },
    Error { context: String, message: String },
    Notice { context: String, message: String },
}

impl CheckoutEvent {
    pub fn context(&self) -> &str {
        match self {
            CheckoutEvent::SessionRendered { context, .. }
            | CheckoutEvent::StatusChanged { context, .. }
            | CheckoutEvent::PaymentCompleted { context, .. }
            | CheckoutEvent::SessionExpired { context, .. }
            | CheckoutEvent::SessionCancelled { context, .. }
            | CheckoutEvent::CartChanged { context, .. }
            | CheckoutEvent::Error { context, .. }
            | CheckoutEvent::Notice { context, .. } => context,
        }
    }
}

/// Receiver of checkout events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &CheckoutEvent);
}

/// Forwards events over an unbounded Tokio channel.
pub struct ChannelSink {
    tx: UnboundedSender<CheckoutEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<CheckoutEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &CheckoutEvent) {
        // A closed receiver means the screen went away; nothing to tell.
        let _ = self.tx.send(event.clone());
    }
}

/// Writes events to the log. Useful headless and as a default.
#[derive(Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &CheckoutEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        match event {
            CheckoutEvent::Error { .. } => warn!(event = %payload, "checkout event"),
            _ => info!(event = %payload, "checkout event"),
        }
    }
}
