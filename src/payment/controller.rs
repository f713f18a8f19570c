//! QR payment session controller.
//!
//! One controller per checkout context. It owns at most one session at a
//! time, runs the status polling loop for it as a cancellable Tokio task and
//! guarantees the sale is committed once, whichever of the poll loop or the
//! cashier's manual confirmation sees the payment first.
//!
//! Locking: `state` is a std mutex that is never held across an `.await`.
//! Every backend call happens after the guard is dropped; results are
//! applied only if the slot's generation still matches, so a session that
//! was cancelled or replaced mid-call is never revived.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PaymentConfig;
use crate::error::{PaymentError, Result};
use crate::notify::{CheckoutEvent, EventSink, QrDisplay};
use crate::payment::backend::{
    ConfirmRequest, CreateSessionRequest, PaymentBackend, SessionMetadata,
};
use crate::payment::session::{
    Amount, CommitResult, PaymentSession, PollOutcome, QrArtifact, RemoteStatus, SessionId,
    SessionStatus, DEFAULT_CURRENCY,
};

/// Shortest gap allowed between two poll ticks.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

const POLL_TROUBLE_MESSAGE: &str =
    "Having trouble checking the payment status. Still trying, keep the QR code on screen.";

/// Hooks run after a session reaches an end state. Called outside any lock,
/// at most once per session and outcome.
pub trait SessionObserver: Send + Sync {
    fn on_completed(&self, _session: &PaymentSession, _commit: &CommitResult) {}
    fn on_expired(&self, _session: &PaymentSession) {}
    fn on_cancelled(&self, _session: &PaymentSession) {}
}

/// Tunables taken from [`PaymentConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    pub max_consecutive_poll_errors: u32,
    pub currency: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(3_000),
            max_consecutive_poll_errors: 10,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &PaymentConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_consecutive_poll_errors: config.max_consecutive_poll_errors,
            currency: config.currency.clone(),
        }
    }
}

struct SessionSlot {
    session: PaymentSession,
    generation: u64,
    /// Set by whichever path starts committing the sale first.
    finalizing: Arc<AtomicBool>,
    poll_token: Option<CancellationToken>,
    confirm: ConfirmRequest,
    commit: Option<CommitResult>,
}

impl SessionSlot {
    fn already_finalized(&self) -> CommitResult {
        let order_ref = self
            .commit
            .as_ref()
            .and_then(|c| c.order_ref.clone())
            .or_else(|| self.session.associated_order_ref().map(str::to_string));
        CommitResult {
            session_id: self.session.session_id().clone(),
            order_ref,
            already_finalized: true,
        }
    }
}

#[derive(Default)]
struct ControllerState {
    slot: Option<SessionSlot>,
    /// Bumped by every start and cancel; stale async results compare against it.
    generation: u64,
}

struct Inner {
    context: String,
    backend: Arc<dyn PaymentBackend>,
    events: Arc<dyn EventSink>,
    observer: Option<Arc<dyn SessionObserver>>,
    settings: ControllerSettings,
    state: Mutex<ControllerState>,
}

/// Lifecycle owner for the QR payment session of one checkout context.
#[derive(Clone)]
pub struct QrSessionController {
    inner: Arc<Inner>,
}

impl QrSessionController {
    pub fn new(
        context: impl Into<String>,
        backend: Arc<dyn PaymentBackend>,
        events: Arc<dyn EventSink>,
        settings: ControllerSettings,
        observer: Option<Arc<dyn SessionObserver>>,
    ) -> Self {
        let context = context.into();
        debug!(context = %context, backend = %backend.description(), "QR session controller created");
        Self {
            inner: Arc::new(Inner {
                context,
                backend,
                events,
                observer,
                settings,
                state: Mutex::new(ControllerState::default()),
            }),
        }
    }

    pub fn context(&self) -> &str {
        &self.inner.context
    }

    /// Create a new session for `amount` and start polling it.
    ///
    /// Any previous session of this context is abandoned (its loop stopped)
    /// before the backend is called. On failure nothing is retained and the
    /// error is also pushed to the event sink.
    pub async fn start_session(
        &self,
        amount: f64,
        metadata: SessionMetadata,
    ) -> Result<PaymentSession> {
        let inner = &self.inner;
        let amount = match Amount::from_decimal(amount, &inner.settings.currency) {
            Ok(amount) => amount,
            Err(e) => {
                inner.report(&e);
                return Err(e);
            }
        };

        let generation = match inner.abandon_current() {
            Ok(generation) => generation,
            Err(e) => {
                inner.report(&e);
                return Err(e);
            }
        };
        let request = CreateSessionRequest { amount, metadata };
        info!(
            context = %inner.context,
            amount = %request.amount,
            "starting QR payment session"
        );

        let session = match inner.backend.create_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(context = %inner.context, error = %e, "QR payment session creation failed");
                if inner.current_generation() == generation {
                    inner.report(&e);
                }
                return Err(e);
            }
        };

        {
            let mut state = inner.state();
            if state.generation != generation {
                info!(
                    context = %inner.context,
                    session_id = %session.session_id(),
                    "QR payment session superseded while being created, discarding"
                );
                return Err(PaymentError::Superseded);
            }
            state.slot = Some(SessionSlot {
                session: session.clone(),
                generation,
                finalizing: Arc::new(AtomicBool::new(false)),
                poll_token: None,
                confirm: ConfirmRequest::from_metadata(&request.metadata),
                commit: None,
            });
        }

        self.render_session(&session);
        match self.start_polling(session.session_id(), inner.settings.poll_interval) {
            Ok(()) => Ok(session),
            Err(PaymentError::NoActiveSession) => Err(PaymentError::Superseded),
            Err(e) => Err(e),
        }
    }

    /// Build the QR panel contents and push them to the event sink.
    pub fn render_session(&self, session: &PaymentSession) -> QrDisplay {
        let (image_src, fallback_text) = match session.qr_artifact() {
            QrArtifact::Image { base64, mime } => (
                Some(format!("data:{mime};base64,{base64}")),
                session.qr_fallback_text().map(str::to_string),
            ),
            QrArtifact::Payload { text } => (None, Some(text.clone())),
        };
        let display = QrDisplay {
            session_id: session.session_id().to_string(),
            amount: session.amount().to_string(),
            image_src,
            fallback_text,
        };
        self.inner.emit(CheckoutEvent::SessionRendered {
            context: self.inner.context.clone(),
            display: display.clone(),
        });
        display
    }

    /// One status check. Never changes local state.
    pub async fn poll_once(&self, session_id: &SessionId) -> PollOutcome {
        self.inner.poll_once(session_id).await
    }

    /// Start the polling loop for the current session. A no-op when a loop is
    /// already running for it or the session already ended.
    pub fn start_polling(&self, session_id: &SessionId, interval: Duration) -> Result<()> {
        let token = CancellationToken::new();
        let generation = {
            let mut state = self.inner.state();
            let slot = state
                .slot
                .as_mut()
                .filter(|s| s.session.session_id() == session_id)
                .ok_or(PaymentError::NoActiveSession)?;
            if slot.session.status().is_terminal() {
                debug!(session_id = %session_id, "session already ended, not polling");
                return Ok(());
            }
            if slot.poll_token.as_ref().is_some_and(|t| !t.is_cancelled()) {
                debug!(session_id = %session_id, "polling already running");
                return Ok(());
            }
            slot.poll_token = Some(token.clone());
            slot.generation
        };

        let inner = Arc::clone(&self.inner);
        let session_id = session_id.clone();
        let interval = interval.max(MIN_POLL_INTERVAL);
        tokio::spawn(async move {
            inner.poll_loop(session_id, generation, token, interval).await;
        });
        Ok(())
    }

    /// Stop the polling loop, keeping the session. Safe to call repeatedly.
    pub fn stop_polling(&self) {
        let mut state = self.inner.state();
        if let Some(token) = state.slot.as_mut().and_then(|s| s.poll_token.take()) {
            token.cancel();
            debug!(context = %self.inner.context, "QR payment polling stopped");
        }
    }

    /// The cashier says the customer paid. The backend is asked first; the
    /// sale is committed only if it reports the session completed.
    pub async fn confirm_manually(&self) -> Result<CommitResult> {
        let result = self.inner.confirm_manually().await;
        if let Err(e) = &result {
            self.inner.report(e);
        }
        result
    }

    /// Drop the current session without contacting the backend. Refused
    /// with [`PaymentError::CommitInProgress`] while a paid session commits.
    pub fn cancel_session(&self) -> Result<()> {
        self.inner.abandon_current().map(|_| ())
    }

    pub fn current_session(&self) -> Option<PaymentSession> {
        self.inner.state().slot.as_ref().map(|s| s.session.clone())
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.inner
            .state()
            .slot
            .as_ref()
            .map(|s| s.session.status())
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .state()
            .slot
            .as_ref()
            .and_then(|s| s.poll_token.as_ref())
            .is_some_and(|t| !t.is_cancelled())
    }

    /// True while a session exists and has not ended.
    pub fn has_pending_session(&self) -> bool {
        self.status() == Some(SessionStatus::Pending)
    }

    /// True while the paid session's commit is in flight.
    pub fn is_finalizing(&self) -> bool {
        self.inner
            .state()
            .slot
            .as_ref()
            .is_some_and(|s| s.commit.is_none() && s.finalizing.load(Ordering::SeqCst))
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_generation(&self) -> u64 {
        self.state().generation
    }

    fn emit(&self, event: CheckoutEvent) {
        self.events.emit(&event);
    }

    fn report(&self, error: &PaymentError) {
        self.emit(CheckoutEvent::Error {
            context: self.context.clone(),
            message: error.user_message(),
        });
    }

    fn emit_status(&self, session: &PaymentSession) {
        self.emit(CheckoutEvent::StatusChanged {
            context: self.context.clone(),
            session_id: session.session_id().to_string(),
            status: session.status().as_str().to_string(),
        });
    }

    /// Stop and forget the current session. Returns the new generation.
    /// A session whose commit is in flight is kept.
    fn abandon_current(&self) -> Result<u64> {
        let (generation, old) = {
            let mut state = self.state();
            if let Some(slot) = state.slot.as_ref() {
                if slot.commit.is_none() && slot.finalizing.load(Ordering::SeqCst) {
                    info!(
                        context = %self.context,
                        session_id = %slot.session.session_id(),
                        "paid session is committing, not abandoning it"
                    );
                    return Err(PaymentError::CommitInProgress);
                }
            }
            state.generation += 1;
            let old = state.slot.take();
            if let Some(token) = old.as_ref().and_then(|s| s.poll_token.as_ref()) {
                token.cancel();
            }
            (state.generation, old)
        };

        if let Some(old) = old {
            if old.session.status() == SessionStatus::Pending {
                info!(
                    context = %self.context,
                    session_id = %old.session.session_id(),
                    "QR payment session abandoned"
                );
                self.emit(CheckoutEvent::SessionCancelled {
                    context: self.context.clone(),
                    session_id: old.session.session_id().to_string(),
                });
                if let Some(observer) = &self.observer {
                    observer.on_cancelled(&old.session);
                }
            }
        }
        Ok(generation)
    }

    async fn poll_once(&self, session_id: &SessionId) -> PollOutcome {
        match self.backend.session_status(session_id).await {
            Ok(RemoteStatus::Pending) => PollOutcome::StillPending,
            Ok(RemoteStatus::Completed) => PollOutcome::Completed,
            Ok(RemoteStatus::Expired) => PollOutcome::Expired,
            Ok(RemoteStatus::Unknown(raw)) => {
                PollOutcome::TransientError(format!("unrecognised status '{raw}'"))
            }
            Err(PaymentError::SessionGone) => PollOutcome::Expired,
            Err(e) => PollOutcome::TransientError(e.to_string()),
        }
    }

    async fn poll_loop(
        self: Arc<Self>,
        session_id: SessionId,
        generation: u64,
        token: CancellationToken,
        interval: Duration,
    ) {
        info!(
            context = %self.context,
            session_id = %session_id,
            interval_ms = interval.as_millis() as u64,
            "QR payment polling started"
        );
        let mut consecutive_errors: u32 = 0;
        let mut warned = false;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.poll_once(&session_id) => outcome,
            };

            match outcome {
                PollOutcome::StillPending => {
                    consecutive_errors = 0;
                    warned = false;
                    debug!(session_id = %session_id, "payment still pending");
                }
                PollOutcome::TransientError(reason) => {
                    consecutive_errors += 1;
                    debug!(
                        session_id = %session_id,
                        consecutive_errors,
                        reason = %reason,
                        "poll tick failed, retrying next tick"
                    );
                    if consecutive_errors >= self.settings.max_consecutive_poll_errors && !warned {
                        warned = true;
                        warn!(
                            session_id = %session_id,
                            consecutive_errors,
                            "payment status checks keep failing"
                        );
                        self.emit(CheckoutEvent::Error {
                            context: self.context.clone(),
                            message: POLL_TROUBLE_MESSAGE.to_string(),
                        });
                    }
                }
                PollOutcome::Completed => match self.finalize(generation).await {
                    // Another path holds the commit; keep ticking in case it fails.
                    Ok(commit) if commit.already_finalized && !self.is_committed(generation) => {
                        debug!(session_id = %session_id, "commit in flight elsewhere, polling continues");
                    }
                    Ok(_) => break,
                    Err(e) if e.is_transient() => {
                        consecutive_errors += 1;
                        warn!(
                            session_id = %session_id,
                            error = %e,
                            "committing paid session failed, retrying next tick"
                        );
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "committing paid session failed");
                        self.report(&e);
                        self.stop_polling_for(generation);
                        break;
                    }
                },
                PollOutcome::Expired => {
                    self.mark_expired(generation);
                    break;
                }
            }
        }
        token.cancel();
        debug!(session_id = %session_id, "QR payment polling loop exited");
    }

    /// Whether the session of `generation` has a stored commit. A replaced
    /// session counts as done for its loop.
    fn is_committed(&self, generation: u64) -> bool {
        self.state()
            .slot
            .as_ref()
            .filter(|s| s.generation == generation)
            .map_or(true, |s| s.commit.is_some())
    }

    fn stop_polling_for(&self, generation: u64) {
        let mut state = self.state();
        if let Some(slot) = state.slot.as_mut().filter(|s| s.generation == generation) {
            if let Some(token) = slot.poll_token.take() {
                token.cancel();
            }
        }
    }

    /// Commit the sale for the session of `generation`, once.
    async fn finalize(&self, generation: u64) -> Result<CommitResult> {
        let (session, confirm, finalizing) = {
            let state = self.state();
            let slot = state
                .slot
                .as_ref()
                .filter(|s| s.generation == generation)
                .ok_or(PaymentError::NoActiveSession)?;
            if slot.commit.is_some() || slot.session.status() == SessionStatus::Completed {
                return Ok(slot.already_finalized());
            }
            if slot.session.status().is_terminal() {
                return Err(PaymentError::SessionExpired);
            }
            if slot.finalizing.swap(true, Ordering::SeqCst) {
                debug!(session_id = %slot.session.session_id(), "session already being finalized");
                return Ok(slot.already_finalized());
            }
            (
                slot.session.clone(),
                slot.confirm.clone(),
                Arc::clone(&slot.finalizing),
            )
        };

        info!(
            context = %self.context,
            session_id = %session.session_id(),
            amount = %session.amount(),
            "payment received, committing sale"
        );

        let commit = match self
            .backend
            .confirm_session(session.session_id(), &confirm)
            .await
        {
            Ok(commit) => commit,
            Err(e) => {
                finalizing.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let completed = {
            let mut state = self.state();
            match state.slot.as_mut().filter(|s| s.generation == generation) {
                Some(slot) => {
                    if let Some(order_ref) = &commit.order_ref {
                        slot.session.link_order(order_ref);
                    }
                    if let Err(e) = slot.session.transition(SessionStatus::Completed) {
                        warn!(error = %e, "completed session was not pending");
                    }
                    slot.commit = Some(commit.clone());
                    if let Some(token) = slot.poll_token.take() {
                        token.cancel();
                    }
                    slot.session.clone()
                }
                // Cancelled while the commit was in flight; the sale still went through.
                None => {
                    let mut session = session;
                    if let Some(order_ref) = &commit.order_ref {
                        session.link_order(order_ref);
                    }
                    let _ = session.transition(SessionStatus::Completed);
                    session
                }
            }
        };

        info!(
            context = %self.context,
            session_id = %completed.session_id(),
            order_ref = ?commit.order_ref,
            "QR payment completed"
        );
        self.emit_status(&completed);
        self.emit(CheckoutEvent::PaymentCompleted {
            context: self.context.clone(),
            session_id: completed.session_id().to_string(),
            order_ref: commit.order_ref.clone(),
        });
        if let Some(observer) = &self.observer {
            observer.on_completed(&completed, &commit);
        }
        Ok(commit)
    }

    fn mark_expired(&self, generation: u64) {
        let expired = {
            let mut state = self.state();
            let Some(slot) = state.slot.as_mut().filter(|s| s.generation == generation) else {
                return;
            };
            if slot.finalizing.load(Ordering::SeqCst)
                || slot.session.transition(SessionStatus::Expired).is_err()
            {
                return;
            }
            if let Some(token) = slot.poll_token.take() {
                token.cancel();
            }
            slot.session.clone()
        };

        info!(
            context = %self.context,
            session_id = %expired.session_id(),
            "QR payment session expired"
        );
        self.emit_status(&expired);
        self.emit(CheckoutEvent::SessionExpired {
            context: self.context.clone(),
            session_id: expired.session_id().to_string(),
        });
        if let Some(observer) = &self.observer {
            observer.on_expired(&expired);
        }
    }

    async fn confirm_manually(&self) -> Result<CommitResult> {
        let (session_id, generation) = {
            let state = self.state();
            let slot = state.slot.as_ref().ok_or(PaymentError::NoActiveSession)?;
            match slot.session.status() {
                SessionStatus::Completed => return Ok(slot.already_finalized()),
                SessionStatus::Expired | SessionStatus::Failed => {
                    return Err(PaymentError::SessionExpired)
                }
                SessionStatus::Pending => {}
            }
            if slot.finalizing.load(Ordering::SeqCst) {
                return Ok(slot.already_finalized());
            }
            (slot.session.session_id().clone(), slot.generation)
        };

        info!(context = %self.context, session_id = %session_id, "manual payment confirmation requested");
        match self.backend.session_status(&session_id).await {
            Ok(RemoteStatus::Completed) => self.finalize(generation).await,
            Ok(RemoteStatus::Pending) => Err(PaymentError::NotYetReceived),
            Ok(RemoteStatus::Expired) | Err(PaymentError::SessionGone) => {
                self.mark_expired(generation);
                Err(PaymentError::SessionExpired)
            }
            Ok(RemoteStatus::Unknown(raw)) => Err(PaymentError::InvalidResponse(format!(
                "unrecognised status '{raw}'"
            ))),
            Err(e) => Err(e),
        }
    }
}
