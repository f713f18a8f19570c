//! Checkout contexts: walk-in (cart based) and pre-order (amount based).
//!
//! Each context owns its own [`QrSessionController`]; the two never share a
//! session, a polling loop or a finalize guard.

use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::api::HttpPaymentBackend;
use crate::cart::{Cart, CustomerInfo, LineDiscount};
use crate::config::PaymentConfig;
use crate::db::{self, DbState, JournalEntry};
use crate::error::{PaymentError, Result};
use crate::notify::{CheckoutEvent, EventSink};
use crate::payment::{
    CommitResult, ControllerSettings, PaymentBackend, PaymentSession, QrSessionController,
    SessionMetadata, SessionObserver,
};

pub const WALK_IN_CONTEXT: &str = "walk_in";
pub const PRE_ORDER_CONTEXT: &str = "pre_order";

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

fn journal(
    db: &DbState,
    context: &str,
    session: &PaymentSession,
    outcome: &str,
    order_ref: Option<String>,
) {
    let entry = JournalEntry {
        session_id: session.session_id().to_string(),
        checkout_context: context.to_string(),
        amount_cents: session.amount().cents(),
        currency: session.amount().currency().to_string(),
        outcome: outcome.to_string(),
        order_ref,
        created_at: Utc::now().to_rfc3339(),
    };
    let result = db
        .conn
        .lock()
        .map_err(|e| e.to_string())
        .and_then(|conn| db::record_session_outcome(&conn, &entry));
    if let Err(e) = result {
        warn!(context, session_id = %entry.session_id, outcome, error = %e, "failed to journal QR session");
    }
}

fn read_journal(db: &DbState, context: &str) -> Result<Vec<JournalEntry>> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| PaymentError::Storage(e.to_string()))?;
    db::journal_for_context(&conn, context).map_err(PaymentError::Storage)
}

fn lock_cart(cart: &Mutex<Cart>) -> MutexGuard<'_, Cart> {
    cart.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cart_changed(cart: &Cart) -> CheckoutEvent {
    CheckoutEvent::CartChanged {
        context: WALK_IN_CONTEXT.to_string(),
        item_count: cart.item_count() as usize,
        total_cents: cart.total_cents(),
    }
}

struct WalkInObserver {
    db: Arc<DbState>,
    cart: Arc<Mutex<Cart>>,
    events: Arc<dyn EventSink>,
}

impl SessionObserver for WalkInObserver {
    fn on_completed(&self, session: &PaymentSession, commit: &CommitResult) {
        journal(
            &self.db,
            WALK_IN_CONTEXT,
            session,
            "completed",
            commit.order_ref.clone(),
        );
        let cleared = {
            let mut cart = lock_cart(&self.cart);
            cart.clear();
            if let Err(e) = cart.save(&self.db, WALK_IN_CONTEXT) {
                warn!(error = %e, "failed to persist cleared cart");
            }
            cart.clone()
        };
        self.events.emit(&cart_changed(&cleared));
    }

    fn on_expired(&self, session: &PaymentSession) {
        journal(&self.db, WALK_IN_CONTEXT, session, "expired", None);
    }

    fn on_cancelled(&self, session: &PaymentSession) {
        journal(&self.db, WALK_IN_CONTEXT, session, "cancelled", None);
    }
}

struct PreOrderObserver {
    db: Arc<DbState>,
}

impl SessionObserver for PreOrderObserver {
    fn on_completed(&self, session: &PaymentSession, commit: &CommitResult) {
        let order_ref = commit
            .order_ref
            .clone()
            .or_else(|| session.associated_order_ref().map(str::to_string));
        journal(&self.db, PRE_ORDER_CONTEXT, session, "completed", order_ref);
    }

    fn on_expired(&self, session: &PaymentSession) {
        journal(&self.db, PRE_ORDER_CONTEXT, session, "expired", None);
    }

    fn on_cancelled(&self, session: &PaymentSession) {
        journal(&self.db, PRE_ORDER_CONTEXT, session, "cancelled", None);
    }
}

// ---------------------------------------------------------------------------
// Walk-in
// ---------------------------------------------------------------------------

/// Counter sale: the cart is the source of the amount and the order body.
pub struct WalkInCheckout {
    cart: Arc<Mutex<Cart>>,
    controller: QrSessionController,
    db: Arc<DbState>,
    events: Arc<dyn EventSink>,
}

impl WalkInCheckout {
    /// Restores the persisted cart for the walk-in context.
    pub fn new(
        db: Arc<DbState>,
        backend: Arc<dyn PaymentBackend>,
        events: Arc<dyn EventSink>,
        settings: ControllerSettings,
    ) -> Result<Self> {
        let cart = Arc::new(Mutex::new(Cart::load(
            &db,
            WALK_IN_CONTEXT,
            &settings.currency,
        )?));
        let observer = Arc::new(WalkInObserver {
            db: Arc::clone(&db),
            cart: Arc::clone(&cart),
            events: Arc::clone(&events),
        });
        let controller = QrSessionController::new(
            WALK_IN_CONTEXT,
            backend,
            Arc::clone(&events),
            settings,
            Some(observer),
        );
        Ok(Self {
            cart,
            controller,
            db,
            events,
        })
    }

    /// Snapshot of the cart.
    pub fn cart(&self) -> Cart {
        lock_cart(&self.cart).clone()
    }

    pub fn controller(&self) -> &QrSessionController {
        &self.controller
    }

    /// Start a QR payment for the cart total.
    pub async fn begin_qr_payment(&self) -> Result<PaymentSession> {
        let snapshot = self.cart();
        self.start_for(&snapshot).await
    }

    async fn start_for(&self, cart: &Cart) -> Result<PaymentSession> {
        let amount = match cart.payable_amount() {
            Ok(amount) => amount,
            Err(e) => {
                self.events.emit(&CheckoutEvent::Error {
                    context: WALK_IN_CONTEXT.to_string(),
                    message: e.user_message(),
                });
                return Err(e);
            }
        };
        let metadata = SessionMetadata::default()
            .with_description(format!("Walk-in sale ({} items)", cart.item_count()))
            .with_payment_type(WALK_IN_CONTEXT)
            .with_order_payload(cart.to_order_payload());
        self.controller
            .start_session(amount.as_decimal(), metadata)
            .await
    }

    /// Apply a cart change, persist it, and regenerate the QR when a
    /// session is waiting for payment.
    /// Refused while a paid session is being committed: the commit clears
    /// the cart it was charged for.
    async fn mutate<T>(&self, change: impl FnOnce(&mut Cart) -> Result<T>) -> Result<T> {
        if self.controller.is_finalizing() {
            let e = PaymentError::CommitInProgress;
            warn!("cart change refused, payment is being committed");
            self.events.emit(&CheckoutEvent::Error {
                context: WALK_IN_CONTEXT.to_string(),
                message: e.user_message(),
            });
            return Err(e);
        }
        let (value, snapshot) = {
            let mut cart = lock_cart(&self.cart);
            let value = change(&mut *cart)?;
            cart.save(&self.db, WALK_IN_CONTEXT)?;
            (value, cart.clone())
        };
        self.events.emit(&cart_changed(&snapshot));

        if self.controller.has_pending_session() {
            if let Err(e) = self.controller.cancel_session() {
                warn!(error = %e, "cart changed as the payment started committing, QR kept");
                return Ok(value);
            }
            if snapshot.is_empty() || snapshot.total_cents() == 0 {
                info!("cart emptied while awaiting payment, session cancelled");
                self.events.emit(&CheckoutEvent::Notice {
                    context: WALK_IN_CONTEXT.to_string(),
                    message: "Cart is empty, QR payment cancelled".to_string(),
                });
            } else {
                info!(
                    total_cents = snapshot.total_cents(),
                    "cart changed while awaiting payment, regenerating QR"
                );
                if let Err(e) = self.start_for(&snapshot).await {
                    warn!(error = %e, "could not regenerate QR payment after cart change");
                }
            }
        }
        Ok(value)
    }

    pub async fn add_item(
        &self,
        product_id: &str,
        name: &str,
        unit_price: f64,
        quantity: u32,
    ) -> Result<String> {
        self.mutate(|cart| cart.add_item(product_id, name, unit_price, quantity))
            .await
    }

    pub async fn set_quantity(&self, item_id: &str, quantity: u32) -> Result<()> {
        self.mutate(|cart| cart.set_quantity(item_id, quantity)).await
    }

    pub async fn remove_item(&self, item_id: &str) -> Result<()> {
        self.mutate(|cart| cart.remove_item(item_id)).await
    }

    pub async fn set_item_discount(
        &self,
        item_id: &str,
        discount: Option<LineDiscount>,
    ) -> Result<()> {
        self.mutate(|cart| cart.set_item_discount(item_id, discount))
            .await
    }

    pub async fn set_cart_discount(&self, discount: Option<LineDiscount>) -> Result<()> {
        self.mutate(|cart| {
            cart.set_cart_discount(discount);
            Ok(())
        })
        .await
    }

    /// Customer details travel with the order body, so they count as a cart change.
    pub async fn set_customer(&self, customer: Option<CustomerInfo>) -> Result<()> {
        self.mutate(|cart| {
            cart.set_customer(customer);
            Ok(())
        })
        .await
    }

    pub async fn confirm_manually(&self) -> Result<CommitResult> {
        self.controller.confirm_manually().await
    }

    /// Drop the QR session and keep the cart.
    pub fn cancel_payment(&self) -> Result<()> {
        self.controller.cancel_session()
    }

    /// Abandon everything and start over with an empty cart.
    pub fn new_sale(&self) -> Result<()> {
        self.controller.cancel_session()?;
        let cleared = {
            let mut cart = lock_cart(&self.cart);
            cart.clear();
            cart.save(&self.db, WALK_IN_CONTEXT)?;
            cart.clone()
        };
        self.events.emit(&cart_changed(&cleared));
        Ok(())
    }

    pub fn journal(&self) -> Result<Vec<JournalEntry>> {
        read_journal(&self.db, WALK_IN_CONTEXT)
    }
}

// ---------------------------------------------------------------------------
// Pre-order
// ---------------------------------------------------------------------------

/// Payment for an order placed ahead of time; the amount comes from the order.
pub struct PreOrderCheckout {
    controller: QrSessionController,
    db: Arc<DbState>,
    events: Arc<dyn EventSink>,
}

impl PreOrderCheckout {
    pub fn new(
        db: Arc<DbState>,
        backend: Arc<dyn PaymentBackend>,
        events: Arc<dyn EventSink>,
        settings: ControllerSettings,
    ) -> Self {
        let observer = Arc::new(PreOrderObserver {
            db: Arc::clone(&db),
        });
        let controller = QrSessionController::new(
            PRE_ORDER_CONTEXT,
            backend,
            Arc::clone(&events),
            settings,
            Some(observer),
        );
        Self {
            controller,
            db,
            events,
        }
    }

    pub fn controller(&self) -> &QrSessionController {
        &self.controller
    }

    pub async fn begin_payment(
        &self,
        pre_order_id: &str,
        amount: f64,
        description: Option<&str>,
    ) -> Result<PaymentSession> {
        let pre_order_id = pre_order_id.trim();
        if pre_order_id.is_empty() {
            let e = PaymentError::Validation("Pre-order id is required".into());
            self.events.emit(&CheckoutEvent::Error {
                context: PRE_ORDER_CONTEXT.to_string(),
                message: e.user_message(),
            });
            return Err(e);
        }
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Pre-order {pre_order_id}"));
        let metadata = SessionMetadata::default()
            .with_order_ref(pre_order_id)
            .with_description(description)
            .with_payment_type(PRE_ORDER_CONTEXT)
            .with_field("pre_order_id", json!(pre_order_id));
        self.controller.start_session(amount, metadata).await
    }

    pub async fn confirm_manually(&self) -> Result<CommitResult> {
        self.controller.confirm_manually().await
    }

    /// Payment screen closed.
    pub fn close(&self) -> Result<()> {
        self.controller.cancel_session()
    }

    pub fn journal(&self) -> Result<Vec<JournalEntry>> {
        read_journal(&self.db, PRE_ORDER_CONTEXT)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Both checkout contexts wired to the HTTP backend.
pub struct Checkouts {
    pub walk_in: WalkInCheckout,
    pub pre_order: PreOrderCheckout,
}

impl Checkouts {
    pub fn from_config(
        db: Arc<DbState>,
        config: &PaymentConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let settings = ControllerSettings::from_config(config);
        let walk_in_backend = Arc::new(HttpPaymentBackend::walk_in(config)?);
        let pre_order_backend = Arc::new(HttpPaymentBackend::pre_order(config)?);
        info!(
            base_url = %config.base_url,
            poll_interval_ms = config.poll_interval_ms,
            "QR checkout contexts ready"
        );
        Ok(Self {
            walk_in: WalkInCheckout::new(
                Arc::clone(&db),
                walk_in_backend,
                Arc::clone(&events),
                settings.clone(),
            )?,
            pre_order: PreOrderCheckout::new(db, pre_order_backend, events, settings),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelSink;
    use crate::payment::fake::FakeBackend;
    use crate::payment::{RemoteStatus, SessionStatus};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::sleep;

    fn walk_in(backend: FakeBackend) -> (WalkInCheckout, Arc<FakeBackend>, Arc<DbState>, UnboundedReceiver<CheckoutEvent>) {
        let db = Arc::new(db::open_in_memory().unwrap());
        let backend = Arc::new(backend);
        let (sink, rx) = ChannelSink::new();
        let checkout = WalkInCheckout::new(
            Arc::clone(&db),
            backend.clone(),
            Arc::new(sink),
            ControllerSettings::default(),
        )
        .unwrap();
        (checkout, backend, db, rx)
    }

    fn pre_order(backend: FakeBackend) -> (PreOrderCheckout, Arc<FakeBackend>) {
        let db = Arc::new(db::open_in_memory().unwrap());
        let backend = Arc::new(backend);
        let (sink, _rx) = ChannelSink::new();
        let checkout = PreOrderCheckout::new(
            db,
            backend.clone(),
            Arc::new(sink),
            ControllerSettings::default(),
        );
        (checkout, backend)
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cart_is_rejected_before_network() {
        let (checkout, backend, _db, mut rx) = walk_in(FakeBackend::default());
        let err = checkout.begin_qr_payment().await.unwrap_err();
        assert_eq!(err, PaymentError::Validation("Cart is empty".into()));
        assert_eq!(backend.creates(), 0);
        assert!(matches!(rx.try_recv(), Ok(CheckoutEvent::Error { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cart_change_regenerates_session() {
        let (checkout, backend, db, _rx) = walk_in(FakeBackend::default());
        checkout.add_item("A", "Item A", 10.0, 1).await.unwrap();
        let first = checkout.begin_qr_payment().await.unwrap();
        assert_eq!(first.session_id().as_str(), "S1");

        sleep(Duration::from_millis(1_000)).await;
        checkout.add_item("B", "Item B", 5.0, 1).await.unwrap();

        let current = checkout.controller().current_session().unwrap();
        assert_eq!(current.session_id().as_str(), "S2");
        assert_eq!(current.amount().cents(), 1500);
        assert_eq!(*backend.created_amounts.lock().unwrap(), vec![1000, 1500]);

        sleep(Duration::from_millis(6_100)).await;
        let polled = backend.status_ids.lock().unwrap().clone();
        assert!(!polled.is_empty());
        assert!(polled.iter().all(|id| id == "S2"), "old session is never polled: {polled:?}");

        let journal = db::journal_for_context(&db.conn.lock().unwrap(), WALK_IN_CONTEXT).unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].session_id, "S1");
        assert_eq!(journal[0].outcome, "cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_clears_cart_and_journals() {
        let (checkout, backend, db, _rx) =
            walk_in(FakeBackend::with_statuses(vec![Ok(RemoteStatus::Completed)]));
        checkout.add_item("A", "Latte", 4.5, 2).await.unwrap();
        checkout.begin_qr_payment().await.unwrap();

        sleep(Duration::from_millis(3_100)).await;
        assert_eq!(backend.confirms(), 1);
        assert!(checkout.cart().is_empty());
        assert!(Cart::load(&db, WALK_IN_CONTEXT, "USD").unwrap().is_empty());

        let confirmed = backend.confirmed.lock().unwrap().clone();
        let order = confirmed[0].1.order_payload.clone().unwrap();
        assert_eq!(order["items"][0]["name"], "Latte");
        assert_eq!(order["total_amount"], 9.0);

        let journal = checkout.journal().unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].outcome, "completed");
        assert_eq!(journal[0].amount_cents, 900);
        assert_eq!(journal[0].order_ref.as_deref(), Some("order-S1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cart_change_refused_while_payment_commits() {
        let backend = FakeBackend {
            confirm_delay: Duration::from_secs(2),
            ..FakeBackend::with_statuses(vec![Ok(RemoteStatus::Completed)])
        };
        let (checkout, backend, db, mut rx) = walk_in(backend);
        checkout.add_item("A", "Item A", 10.0, 1).await.unwrap();
        checkout.begin_qr_payment().await.unwrap();

        sleep(Duration::from_millis(3_100)).await;
        while rx.try_recv().is_ok() {}
        let err = checkout.add_item("B", "Item B", 5.0, 1).await.unwrap_err();
        assert_eq!(err, PaymentError::CommitInProgress);
        assert!(matches!(rx.try_recv(), Ok(CheckoutEvent::Error { .. })));
        assert_eq!(checkout.cart().item_count(), 1);
        assert_eq!(Cart::load(&db, WALK_IN_CONTEXT, "USD").unwrap().item_count(), 1);
        assert!(checkout.new_sale().is_err());

        sleep(Duration::from_secs(3)).await;
        assert_eq!(backend.creates(), 1);
        assert_eq!(backend.confirms(), 1);
        assert!(checkout.cart().is_empty());
        assert_eq!(checkout.controller().status(), Some(SessionStatus::Completed));
        let journal: Vec<(String, String)> = checkout
            .journal()
            .unwrap()
            .into_iter()
            .map(|e| (e.session_id, e.outcome))
            .collect();
        assert_eq!(journal, vec![("S1".to_string(), "completed".to_string())]);

        // The next sale can start once the commit landed.
        checkout.add_item("B", "Item B", 5.0, 1).await.unwrap();
        assert_eq!(checkout.cart().item_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_without_session_only_persists() {
        let (checkout, backend, db, mut rx) = walk_in(FakeBackend::default());
        checkout.add_item("A", "Tea", 3.0, 2).await.unwrap();
        assert_eq!(backend.creates(), 0);
        assert!(matches!(
            rx.try_recv(),
            Ok(CheckoutEvent::CartChanged { item_count: 2, total_cents: 600, .. })
        ));
        assert_eq!(Cart::load(&db, WALK_IN_CONTEXT, "USD").unwrap().total_cents(), 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cart_restored_on_restart() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let (sink, _rx) = ChannelSink::new();
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        let first = WalkInCheckout::new(
            Arc::clone(&db),
            Arc::new(FakeBackend::default()),
            Arc::clone(&sink),
            ControllerSettings::default(),
        )
        .unwrap();
        first.add_item("A", "Tea", 3.0, 1).await.unwrap();
        drop(first);

        let second = WalkInCheckout::new(
            db,
            Arc::new(FakeBackend::default()),
            sink,
            ControllerSettings::default(),
        )
        .unwrap();
        assert_eq!(second.cart().items().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emptying_cart_cancels_without_new_session() {
        let (checkout, backend, _db, _rx) = walk_in(FakeBackend::default());
        let id = checkout.add_item("A", "Tea", 3.0, 1).await.unwrap();
        checkout.begin_qr_payment().await.unwrap();
        checkout.remove_item(&id).await.unwrap();

        assert!(checkout.controller().current_session().is_none());
        sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.creates(), 1);
        assert_eq!(backend.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_sale_cancels_and_clears() {
        let (checkout, backend, _db, _rx) = walk_in(FakeBackend::default());
        checkout.add_item("A", "Tea", 3.0, 1).await.unwrap();
        checkout.begin_qr_payment().await.unwrap();
        checkout.new_sale().unwrap();

        assert!(checkout.cart().is_empty());
        assert!(checkout.controller().status().is_none());
        sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.polls(), 0);
        assert_eq!(checkout.journal().unwrap()[0].outcome, "cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_order_payment_carries_order_ref() {
        let (checkout, backend) =
            pre_order(FakeBackend::with_statuses(vec![Ok(RemoteStatus::Completed)]));
        let session = checkout
            .begin_payment("pre-7", 12.0, Some("Pickup 12:30"))
            .await
            .unwrap();
        assert_eq!(session.associated_order_ref(), Some("pre-7"));
        assert_eq!(session.description(), Some("Pickup 12:30"));

        sleep(Duration::from_millis(3_100)).await;
        let confirmed = backend.confirmed.lock().unwrap().clone();
        assert_eq!(confirmed[0].1.order_ref.as_deref(), Some("pre-7"));
        assert_eq!(
            checkout.controller().status(),
            Some(SessionStatus::Completed)
        );
        assert_eq!(checkout.journal().unwrap()[0].outcome, "completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_order_requires_id_and_close_stops_polling() {
        let (checkout, backend) = pre_order(FakeBackend::default());
        assert!(matches!(
            checkout.begin_payment("  ", 5.0, None).await,
            Err(PaymentError::Validation(_))
        ));

        checkout.begin_payment("pre-8", 5.0, None).await.unwrap();
        checkout.close().unwrap();
        checkout.close().unwrap();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.creates(), 1);
        assert_eq!(backend.polls(), 0);
    }

    #[tokio::test]
    async fn test_from_config_requires_base_url() {
        let db = Arc::new(db::open_in_memory().unwrap());
        let events: Arc<dyn EventSink> = Arc::new(crate::notify::LogSink);
        assert!(matches!(
            Checkouts::from_config(Arc::clone(&db), &PaymentConfig::default(), Arc::clone(&events)),
            Err(PaymentError::Validation(_))
        ));

        let config = PaymentConfig {
            base_url: "pay.example.com".into(),
            ..PaymentConfig::default()
        };
        let checkouts = Checkouts::from_config(db, &config, events).unwrap();
        assert!(checkouts.walk_in.cart().is_empty());
        assert!(checkouts.pre_order.controller().current_session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_contexts_are_independent() {
        let (walk, walk_backend, _db, _rx) = walk_in(FakeBackend::default());
        let (pre, pre_backend) = pre_order(FakeBackend::default());

        walk.add_item("A", "Tea", 3.0, 1).await.unwrap();
        walk.begin_qr_payment().await.unwrap();
        pre.begin_payment("pre-9", 20.0, None).await.unwrap();

        walk.cancel_payment().unwrap();
        sleep(Duration::from_millis(3_100)).await;
        assert_eq!(walk_backend.polls(), 0);
        assert_eq!(pre_backend.polls(), 1);
        assert!(pre.controller().has_pending_session());
        assert!(!walk.cart().is_empty(), "cancelling the payment keeps the cart");
    }
}
