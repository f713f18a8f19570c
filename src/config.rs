//! Payment client configuration.
//!
//! Stored as one JSON document in `local_settings` (category `payments`,
//! key `config`). `POS_QR_BASE_URL` and `POS_QR_API_KEY` override the stored
//! values so a terminal can be pointed at a staging backend without touching
//! the database.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::api::normalize_base_url;
use crate::db::{self, DbState};
use crate::payment::session::DEFAULT_CURRENCY;

const SETTINGS_CATEGORY: &str = "payments";
const SETTINGS_KEY: &str = "config";

pub const ENV_BASE_URL: &str = "POS_QR_BASE_URL";
pub const ENV_API_KEY: &str = "POS_QR_API_KEY";

const MIN_POLL_INTERVAL_MS: u64 = 1_000;
const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// HTTP method used by a status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusMethod {
    #[default]
    Get,
    Post,
}

/// Backend paths for one checkout context.
///
/// `status` and `confirm` may contain an `{id}` placeholder. Without it the
/// session id is sent as a `session_id` query parameter (GET) or body field
/// (POST).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSet {
    pub create: String,
    pub status: String,
    pub confirm: String,
    #[serde(default)]
    pub status_method: StatusMethod,
}

impl EndpointSet {
    pub fn walk_in() -> Self {
        Self {
            create: "/api/pos/qr-payments/create".into(),
            status: "/api/pos/qr-payments/{id}/status".into(),
            confirm: "/api/pos/qr-payments/{id}/confirm".into(),
            status_method: StatusMethod::Get,
        }
    }

    pub fn pre_order() -> Self {
        Self {
            create: "/api/pre-orders/qr-payments/create".into(),
            status: "/api/pre-orders/qr-payments/status".into(),
            confirm: "/api/pre-orders/qr-payments/confirm".into(),
            status_method: StatusMethod::Post,
        }
    }
}

/// Everything the QR payment client needs to talk to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaymentConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub currency: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Consecutive failed ticks before the cashier is warned once.
    pub max_consecutive_poll_errors: u32,
    pub walk_in: EndpointSet,
    pub pre_order: EndpointSet,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            currency: DEFAULT_CURRENCY.to_string(),
            poll_interval_ms: 3_000,
            request_timeout_secs: 30,
            max_consecutive_poll_errors: 10,
            walk_in: EndpointSet::walk_in(),
            pre_order: EndpointSet::pre_order(),
        }
    }
}

impl PaymentConfig {
    /// Load the stored config, apply environment overrides and normalise.
    /// A missing or unreadable stored document falls back to defaults.
    pub fn load(db: &DbState) -> Result<Self, String> {
        let raw = {
            let conn = db.conn.lock().map_err(|e| e.to_string())?;
            db::get_setting(&conn, SETTINGS_CATEGORY, SETTINGS_KEY)
        };

        let mut config = match raw {
            Some(raw) => serde_json::from_str::<PaymentConfig>(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "stored payment config is invalid, using defaults");
                PaymentConfig::default()
            }),
            None => PaymentConfig::default(),
        };

        config.apply_env_overrides();
        config.normalize();
        info!(
            base_url = %config.base_url,
            poll_interval_ms = config.poll_interval_ms,
            "payment config loaded"
        );
        Ok(config)
    }

    /// Persist this config (without environment overrides applied on top).
    pub fn save(&self, db: &DbState) -> Result<(), String> {
        let json = serde_json::to_string(self).map_err(|e| format!("serialize config: {e}"))?;
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        db::set_setting(&conn, SETTINGS_CATEGORY, SETTINGS_KEY, &json)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            if !key.trim().is_empty() {
                self.api_key = Some(key);
            }
        }
    }

    /// Clamp and tidy values so the rest of the crate can trust them.
    pub fn normalize(&mut self) {
        if !self.base_url.trim().is_empty() {
            self.base_url = normalize_base_url(&self.base_url);
        }
        self.api_key = self
            .api_key
            .take()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let currency = self.currency.trim().to_ascii_uppercase();
        self.currency = if currency.len() == 3 {
            currency
        } else {
            DEFAULT_CURRENCY.to_string()
        };
        self.poll_interval_ms = self
            .poll_interval_ms
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = 30;
        }
        if self.max_consecutive_poll_errors == 0 {
            self.max_consecutive_poll_errors = 1;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("Payment backend URL is not configured".into());
        }
        for (name, set) in [("walk_in", &self.walk_in), ("pre_order", &self.pre_order)] {
            for path in [&set.create, &set.status, &set.confirm] {
                if !path.starts_with('/') {
                    return Err(format!("{name} endpoint must start with '/': {path}"));
                }
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
