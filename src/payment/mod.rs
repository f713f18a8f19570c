//! QR payment sessions: data model, backend seam and lifecycle controller.

pub mod backend;
pub mod controller;
#[cfg(test)]
pub(crate) mod fake;
pub mod session;

pub use backend::{ConfirmRequest, CreateSessionRequest, PaymentBackend, SessionMetadata};
pub use controller::{ControllerSettings, QrSessionController, SessionObserver};
pub use session::{
    Amount, CommitResult, PaymentSession, PollOutcome, QrArtifact, RemoteStatus, SessionId,
    SessionStatus,
};
