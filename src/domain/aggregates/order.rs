//! Order Aggregate
//!
//! An order is written once by checkout and afterwards only moves through
//! its two status fields. Line items capture the product name and price at
//! the time of purchase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::aggregates::product::Product;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<LineItem>,
    pub total_amount: Money,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub transaction_ref: Option<String>,
    pub payment_initiated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem { pub product_id: Uuid, pub name: String, pub quantity: i32, pub price: Money }

impl LineItem {
    pub fn line_total(&self) -> Result<Money, OrderError> { self.price.multiply(self.quantity).map_err(|_| OrderError::InvalidOrderData) }
}

/// One requested line of a checkout, with the price the client saw.
#[derive(Clone, Debug, Deserialize)]
pub struct OrderLineRequest {
    #[serde(alias = "productId")]
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Completed, Failed }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Processing, Shipped, Delivered, Cancelled }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Completed => "completed", Self::Failed => "failed" }
    }
}

impl FromStr for PaymentStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Processing => "processing", Self::Shipped => "shipped",
            Self::Delivered => "delivered", Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Terminal outcome reported by the payment provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome { Completed, Failed }

/// Status change to apply with a compare-and-set on `from` and on the
/// payment attempt (`reference`) the outcome was observed for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub order_status: Option<OrderStatus>,
    pub reference: Option<String>,
}

/// Validates requested lines against the live catalog and captures prices.
///
/// Quantities for the same product are summed before the stock check.
pub fn price_order_lines(
    lines: &[OrderLineRequest],
    declared_total: Option<i64>,
    catalog: &HashMap<Uuid, Product>,
) -> Result<(Vec<LineItem>, Money), OrderError> {
    let declared_total = declared_total.filter(|t| *t > 0).ok_or(OrderError::InvalidOrderData)?;
    if lines.is_empty() || lines.iter().any(|l| l.quantity <= 0) { return Err(OrderError::InvalidOrderData); }

    let mut requested: HashMap<Uuid, i32> = HashMap::new();
    for line in lines {
        let qty = requested.entry(line.product_id).or_default();
        *qty = qty.checked_add(line.quantity).ok_or(OrderError::InvalidOrderData)?;
    }

    let mut items = Vec::with_capacity(lines.len());
    let mut total = Money::ZERO;
    for line in lines {
        let product = catalog.get(&line.product_id).ok_or(OrderError::ProductNotFound(line.product_id))?;
        if !product.has_stock(requested[&line.product_id]) { return Err(OrderError::InsufficientStock(product.name.clone())); }
        if product.price.amount() != line.price { return Err(OrderError::PriceChanged); }
        let item = LineItem { product_id: product.id, name: product.name.clone(), quantity: line.quantity, price: product.price };
        total = total.add(item.line_total()?).map_err(|_| OrderError::InvalidOrderData)?;
        items.push(item);
    }

    if total.amount() != declared_total { return Err(OrderError::TotalMismatch); }
    Ok((items, total))
}

impl Order {
    pub fn place(user_id: Uuid, items: Vec<LineItem>, total_amount: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), user_id, items, total_amount,
            payment_status: PaymentStatus::Pending, order_status: OrderStatus::Pending,
            transaction_ref: None, payment_initiated_at: None, created_at: now, updated_at: now,
        }
    }

    /// Last eight characters of the id, as shown to customers.
    pub fn short_number(&self) -> String {
        let id = self.id.simple().to_string();
        id[id.len() - 8..].to_string()
    }

    pub fn is_paid(&self) -> bool { self.payment_status == PaymentStatus::Completed }

    pub fn check_can_pay(&self, amount: i64) -> Result<(), OrderError> {
        if self.is_paid() { return Err(OrderError::AlreadyPaid); }
        if self.total_amount.amount() != amount { return Err(OrderError::AmountMismatch); }
        Ok(())
    }

    /// Transition for a provider outcome, or `None` when it is already applied.
    /// A completed payment is final.
    pub fn transition_for(&self, outcome: PaymentOutcome) -> Option<PaymentTransition> {
        let reference = self.transaction_ref.clone();
        match (outcome, self.payment_status) {
            (_, PaymentStatus::Completed) => None,
            (PaymentOutcome::Completed, from) => Some(PaymentTransition { from, to: PaymentStatus::Completed, order_status: Some(OrderStatus::Processing), reference }),
            (PaymentOutcome::Failed, PaymentStatus::Pending) => Some(PaymentTransition { from: PaymentStatus::Pending, to: PaymentStatus::Failed, order_status: None, reference }),
            (PaymentOutcome::Failed, PaymentStatus::Failed) => None,
        }
    }

    /// Fulfillment moves only after payment has completed.
    pub fn check_status_change(&self) -> Result<(), OrderError> {
        if !self.is_paid() { return Err(OrderError::UnpaidOrder); }
        Ok(())
    }

    /// When the server stops waiting for the provider.
    pub fn payment_deadline_base(&self) -> DateTime<Utc> { self.payment_initiated_at.unwrap_or(self.created_at) }

    /// Whether `transition` still matches the stored payment attempt.
    pub fn accepts(&self, transition: &PaymentTransition) -> bool {
        self.payment_status == transition.from && self.transaction_ref == transition.reference
    }

    pub fn apply(&mut self, transition: PaymentTransition) {
        self.payment_status = transition.to;
        if let Some(status) = transition.order_status { self.order_status = status; }
        self.touch();
    }

    pub fn record_initiation(&mut self, reference: String, at: DateTime<Utc>) {
        self.transaction_ref = Some(reference);
        self.payment_initiated_at = Some(at);
        if self.payment_status == PaymentStatus::Failed { self.payment_status = PaymentStatus::Pending; }
        self.updated_at = at;
    }

    pub fn set_order_status(&mut self, status: OrderStatus) { self.order_status = status; self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    InvalidOrderData,
    ProductNotFound(Uuid),
    InsufficientStock(String),
    PriceChanged,
    TotalMismatch,
    AlreadyPaid,
    AmountMismatch,
    UnpaidOrder,
    UnknownStatus(String),
}
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOrderData => write!(f, "Invalid order data"),
            Self::ProductNotFound(id) => write!(f, "Product {id} not found"),
            Self::InsufficientStock(name) => write!(f, "Insufficient stock for {name}"),
            Self::PriceChanged => write!(f, "Product price has changed"),
            Self::TotalMismatch => write!(f, "Order total does not match items"),
            Self::AlreadyPaid => write!(f, "Order is already paid"),
            Self::AmountMismatch => write!(f, "Amount does not match order total"),
            Self::UnpaidOrder => write!(f, "Cannot update status of unpaid order"),
            Self::UnknownStatus(s) => write!(f, "Unknown status: {s}"),
        }
    }
}
