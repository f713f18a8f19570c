//! Cart / order builder for the walk-in checkout.
//!
//! Money is kept in integer cents. The cart is persisted as JSON in
//! `local_settings` (category `cart`, one key per checkout context) so a
//! restart restores the sale in progress.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::db::{self, DbState};
use crate::error::{PaymentError, Result};
use crate::payment::session::{Amount, DEFAULT_CURRENCY};

const CART_CATEGORY: &str = "cart";

pub(crate) fn normalize_phone(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn to_cents(value: f64, what: &str) -> Result<i64> {
    if !value.is_finite() || value < 0.0 {
        return Err(PaymentError::Validation(format!("Invalid {what}: {value}")));
    }
    Ok((value * 100.0).round() as i64)
}

/// Discount applied to one line or to the whole cart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LineDiscount {
    /// Percentage off, 0 to 100.
    Percent(f64),
    /// Fixed amount off, in cents.
    Fixed(i64),
}

impl LineDiscount {
    pub fn percent(pct: f64) -> Result<Self> {
        if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
            return Err(PaymentError::Validation(format!(
                "Discount must be between 0 and 100%, got {pct}"
            )));
        }
        Ok(LineDiscount::Percent(pct))
    }

    pub fn fixed(amount: f64) -> Result<Self> {
        Ok(LineDiscount::Fixed(to_cents(amount, "discount")?))
    }

    /// Amount taken off `base_cents`, never more than the base.
    pub fn apply_to(&self, base_cents: i64) -> i64 {
        let off = match *self {
            LineDiscount::Percent(pct) => (base_cents as f64 * pct / 100.0).round() as i64,
            LineDiscount::Fixed(cents) => cents,
        };
        off.clamp(0, base_cents.max(0))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub name: Option<String>,
    /// Digits only.
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl CustomerInfo {
    pub fn new(name: Option<&str>, phone: Option<&str>, email: Option<&str>) -> Self {
        let clean = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            name: clean(name),
            phone: phone.map(normalize_phone).filter(|p| !p.is_empty()),
            email: clean(email),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.email.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
    #[serde(default)]
    pub discount: Option<LineDiscount>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CartItem {
    pub fn gross_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }

    pub fn discount_cents(&self) -> i64 {
        self.discount
            .map(|d| d.apply_to(self.gross_cents()))
            .unwrap_or(0)
    }

    pub fn total_cents(&self) -> i64 {
        self.gross_cents() - self.discount_cents()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    items: Vec<CartItem>,
    #[serde(default)]
    customer: Option<CustomerInfo>,
    #[serde(default)]
    cart_discount: Option<LineDiscount>,
    #[serde(default = "default_currency")]
    currency: String,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl Default for Cart {
    fn default() -> Self {
        Self::new(DEFAULT_CURRENCY)
    }
}

impl Cart {
    pub fn new(currency: &str) -> Self {
        Self {
            items: Vec::new(),
            customer: None,
            cart_discount: None,
            currency: currency.trim().to_ascii_uppercase(),
        }
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn customer(&self) -> Option<&CustomerInfo> {
        self.customer.as_ref()
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Add `quantity` of a product. A product already in the cart (without a
    /// line discount) has its quantity increased instead of a new line.
    /// Returns the id of the affected line.
    pub fn add_item(
        &mut self,
        product_id: &str,
        name: &str,
        unit_price: f64,
        quantity: u32,
    ) -> Result<String> {
        let product_id = product_id.trim();
        if product_id.is_empty() {
            return Err(PaymentError::Validation("Product id is required".into()));
        }
        if quantity == 0 {
            return Err(PaymentError::Validation("Quantity must be at least 1".into()));
        }
        let unit_price_cents = to_cents(unit_price, "price")?;

        if let Some(line) = self.items.iter_mut().find(|i| {
            i.product_id == product_id
                && i.unit_price_cents == unit_price_cents
                && i.discount.is_none()
        }) {
            line.quantity = line.quantity.saturating_add(quantity);
            return Ok(line.id.clone());
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.items.push(CartItem {
            id: id.clone(),
            product_id: product_id.to_string(),
            name: name.trim().to_string(),
            unit_price_cents,
            quantity,
            discount: None,
            notes: None,
        });
        Ok(id)
    }

    /// Set a line's quantity; 0 removes the line.
    pub fn set_quantity(&mut self, item_id: &str, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return self.remove_item(item_id);
        }
        let line = self.line_mut(item_id)?;
        line.quantity = quantity;
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: &str) -> Result<()> {
        let before = self.items.len();
        self.items.retain(|i| i.id != item_id);
        if self.items.len() == before {
            return Err(PaymentError::Validation(format!(
                "Cart item not found: {item_id}"
            )));
        }
        Ok(())
    }

    pub fn set_item_discount(&mut self, item_id: &str, discount: Option<LineDiscount>) -> Result<()> {
        self.line_mut(item_id)?.discount = discount;
        Ok(())
    }

    pub fn set_item_notes(&mut self, item_id: &str, notes: Option<&str>) -> Result<()> {
        self.line_mut(item_id)?.notes = notes
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        Ok(())
    }

    pub fn set_customer(&mut self, customer: Option<CustomerInfo>) {
        self.customer = customer.filter(|c| !c.is_empty());
    }

    pub fn set_cart_discount(&mut self, discount: Option<LineDiscount>) {
        self.cart_discount = discount;
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.customer = None;
        self.cart_discount = None;
    }

    fn line_mut(&mut self, item_id: &str) -> Result<&mut CartItem> {
        self.items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| PaymentError::Validation(format!("Cart item not found: {item_id}")))
    }

    /// Sum of line totals (line discounts applied).
    pub fn subtotal_cents(&self) -> i64 {
        self.items.iter().map(CartItem::total_cents).sum()
    }

    /// Line discounts plus the cart-level discount.
    pub fn discount_total_cents(&self) -> i64 {
        let lines: i64 = self.items.iter().map(CartItem::discount_cents).sum();
        lines + self.cart_discount_cents()
    }

    fn cart_discount_cents(&self) -> i64 {
        self.cart_discount
            .map(|d| d.apply_to(self.subtotal_cents()))
            .unwrap_or(0)
    }

    pub fn total_cents(&self) -> i64 {
        (self.subtotal_cents() - self.cart_discount_cents()).max(0)
    }

    pub fn subtotal(&self) -> f64 {
        self.subtotal_cents() as f64 / 100.0
    }

    pub fn discount_total(&self) -> f64 {
        self.discount_total_cents() as f64 / 100.0
    }

    pub fn total(&self) -> f64 {
        self.total_cents() as f64 / 100.0
    }

    /// Total as a payable amount; fails for an empty or zero-value cart.
    pub fn payable_amount(&self) -> Result<Amount> {
        if self.is_empty() {
            return Err(PaymentError::Validation("Cart is empty".into()));
        }
        Amount::from_cents(self.total_cents(), &self.currency)
    }

    /// Order body sent with the confirm call.
    pub fn to_order_payload(&self) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|i| {
                json!({
                    "product_id": i.product_id,
                    "name": i.name,
                    "quantity": i.quantity,
                    "unit_price": i.unit_price_cents as f64 / 100.0,
                    "discount_amount": i.discount_cents() as f64 / 100.0,
                    "total_price": i.total_cents() as f64 / 100.0,
                    "notes": i.notes,
                })
            })
            .collect();
        let customer = self.customer.as_ref().map(|c| {
            json!({
                "name": c.name,
                "phone": c.phone,
                "email": c.email,
            })
        });
        json!({
            "items": items,
            "customer": customer,
            "subtotal": self.subtotal(),
            "discount_amount": self.discount_total(),
            "total_amount": self.total(),
            "currency": self.currency,
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Restore the cart stored for `context`. Missing data gives an empty
    /// cart; unreadable data is logged and also gives an empty cart.
    pub fn load(db: &DbState, context: &str, currency: &str) -> Result<Self> {
        let raw = {
            let conn = db.conn.lock().map_err(|e| PaymentError::Storage(e.to_string()))?;
            db::get_setting(&conn, CART_CATEGORY, context)
        };
        let Some(raw) = raw else {
            return Ok(Self::new(currency));
        };
        match serde_json::from_str::<Cart>(&raw) {
            Ok(cart) => Ok(cart),
            Err(e) => {
                warn!(context, error = %e, "stored cart is unreadable, starting empty");
                Ok(Self::new(currency))
            }
        }
    }

    pub fn save(&self, db: &DbState, context: &str) -> Result<()> {
        let raw = serde_json::to_string(self).map_err(|e| PaymentError::Storage(e.to_string()))?;
        let conn = db.conn.lock().map_err(|e| PaymentError::Storage(e.to_string()))?;
        db::set_setting(&conn, CART_CATEGORY, context, &raw).map_err(PaymentError::Storage)
    }
}
