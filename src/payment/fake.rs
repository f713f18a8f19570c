//! Scripted in-memory backend for controller and checkout tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{PaymentError, Result};
use crate::payment::backend::{
    normalize_confirm_response, normalize_create_response, ConfirmRequest, CreateSessionRequest,
    PaymentBackend,
};
use crate::payment::session::{CommitResult, PaymentSession, RemoteStatus, SessionId};

/// Each queue is consumed front to back; an empty queue falls back to a
/// default (a fresh session, `pending`, a successful commit).
#[derive(Default)]
pub struct FakeBackend {
    pub create_bodies: Mutex<VecDeque<Result<Value>>>,
    pub statuses: Mutex<VecDeque<Result<RemoteStatus>>>,
    pub confirm_bodies: Mutex<VecDeque<Result<Value>>>,
    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
    pub created_amounts: Mutex<Vec<i64>>,
    pub status_ids: Mutex<Vec<String>>,
    pub confirmed: Mutex<Vec<(String, ConfirmRequest)>>,
    pub create_delay: Duration,
    pub status_delay: Duration,
    pub confirm_delay: Duration,
}

impl FakeBackend {
    pub fn with_statuses(statuses: Vec<Result<RemoteStatus>>) -> Self {
        let fake = Self::default();
        *fake.statuses.lock().unwrap() = statuses.into();
        fake
    }

    pub fn push_create(&self, body: Result<Value>) {
        self.create_bodies.lock().unwrap().push_back(body);
    }

    pub fn push_status(&self, status: Result<RemoteStatus>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn push_confirm(&self, body: Result<Value>) {
        self.confirm_bodies.lock().unwrap().push_back(body);
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn confirms(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    pub fn confirmed_ids(&self) -> Vec<String> {
        self.confirmed
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

pub fn network_error() -> PaymentError {
    PaymentError::Network("Cannot reach payment backend at http://fake".into())
}

#[async_trait]
impl PaymentBackend for FakeBackend {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<PaymentSession> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.created_amounts
            .lock()
            .unwrap()
            .push(request.amount.cents());
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        let scripted = self.create_bodies.lock().unwrap().pop_front();
        let body = match scripted {
            Some(body) => body?,
            None => json!({
                "success": true,
                "session": { "id": format!("S{n}"), "qr_data": format!("pay:S{n}") }
            }),
        };
        normalize_create_response(&body, request)
    }

    async fn session_status(&self, session_id: &SessionId) -> Result<RemoteStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_ids
            .lock()
            .unwrap()
            .push(session_id.to_string());
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        let scripted = self.statuses.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(RemoteStatus::Pending))
    }

    async fn confirm_session(
        &self,
        session_id: &SessionId,
        request: &ConfirmRequest,
    ) -> Result<CommitResult> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        if !self.confirm_delay.is_zero() {
            tokio::time::sleep(self.confirm_delay).await;
        }
        let scripted = self.confirm_bodies.lock().unwrap().pop_front();
        let body = match scripted {
            Some(body) => body?,
            None => json!({ "success": true, "order_id": format!("order-{session_id}") }),
        };
        let result = normalize_confirm_response(&body, session_id)?;
        self.confirmed
            .lock()
            .unwrap()
            .push((session_id.to_string(), request.clone()));
        Ok(result)
    }

    fn description(&self) -> String {
        "fake".into()
    }
}
