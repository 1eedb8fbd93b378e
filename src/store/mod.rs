//! Persistence interfaces.
//!
//! Two backends implement these traits: [`PgStore`] for production and
//! [`MemoryStore`] for demos and tests. Both apply checkout and status
//! transitions atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Session;
use crate::domain::aggregates::{Order, OrderLineRequest, OrderStatus, PaymentTransition, Product, ProductDraft, User};
use crate::mail::{OutboundEmail, QueuedEmail};
use crate::reports::{AdminOrderView, Analytics, CustomerSummary, DashboardStats, DateRange};
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort { PriceAsc, PriceDesc, Newest }

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub sort: Option<ProductSort>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminOrderQuery {
    pub search: Option<String>,
    pub status: Option<OrderStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Resolved page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging { pub page: u32, pub limit: u32 }

impl Paging {
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32) -> Self {
        Self { page: page.unwrap_or(1).max(1), limit: limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_SIZE) }
    }
    pub fn offset(&self) -> usize { (self.page as usize - 1) * self.limit as usize }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> { pub data: Vec<T>, pub total: i64, pub total_pages: i64, pub current_page: u32 }

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: i64, paging: Paging) -> Self {
        let limit = i64::from(paging.limit);
        Self { data, total, total_pages: (total + limit - 1) / limit, current_page: paging.page }
    }
}

/// Non-empty, trimmed search term.
pub(crate) fn search_term(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>>;
    async fn all_products(&self) -> Result<Vec<Product>>;
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>>;
    async fn insert_product(&self, product: &Product) -> Result<()>;
    async fn update_product(&self, id: Uuid, draft: ProductDraft) -> Result<Option<Product>>;
    async fn delete_product(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with a validation error when the email is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn insert_session(&self, session: &Session) -> Result<()>;
    /// User behind an unexpired session.
    async fn session_user(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>>;
    async fn delete_session(&self, token_hash: &str) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Checks lines against the current catalog, writes the order and
    /// decrements stock as one unit. Nothing is written on rejection.
    async fn place_order(&self, user_id: Uuid, lines: &[OrderLineRequest], declared_total: Option<i64>) -> Result<Order>;
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn find_order_by_reference(&self, reference: &str) -> Result<Option<Order>>;
    async fn list_user_orders(&self, user_id: Uuid, query: &OrderQuery) -> Result<Page<Order>>;
    /// Stores a new transaction reference, replacing any earlier one.
    /// `None` when the order is absent or already paid.
    async fn record_payment_initiation(&self, id: Uuid, reference: &str, at: DateTime<Utc>) -> Result<Option<Order>>;
    /// Applies the transition only while `payment_status` still equals
    /// `transition.from` and the stored reference equals
    /// `transition.reference`; `None` means another writer got there first.
    async fn transition_payment(&self, id: Uuid, transition: PaymentTransition, notice: Option<OutboundEmail>) -> Result<Option<Order>>;
    /// Overwrites `order_status` of a paid order; `None` when absent or unpaid.
    async fn set_order_status(&self, id: Uuid, status: OrderStatus, notice: Option<OutboundEmail>) -> Result<Option<Order>>;
    /// Pending payments whose deadline base is older than `before`.
    async fn stale_pending_orders(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns false when the idempotency key was already queued.
    async fn enqueue_email(&self, email: &OutboundEmail) -> Result<bool>;
    /// Leases due messages until `lease_until` and counts the attempt.
    async fn claim_due_emails(&self, now: DateTime<Utc>, lease_until: DateTime<Utc>, limit: i64) -> Result<Vec<QueuedEmail>>;
    async fn mark_email_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
    /// `retry_at = None` gives up on the message.
    async fn mark_email_failed(&self, id: Uuid, error: &str, retry_at: Option<DateTime<Utc>>) -> Result<()>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn dashboard(&self) -> Result<DashboardStats>;
    async fn analytics(&self, range: &DateRange) -> Result<Analytics>;
    async fn list_admin_orders(&self, query: &AdminOrderQuery) -> Result<Page<AdminOrderView>>;
    async fn get_admin_order(&self, id: Uuid) -> Result<Option<AdminOrderView>>;
    async fn list_customers(&self, query: &CustomerQuery) -> Result<Page<CustomerSummary>>;
}

pub trait Store: ProductStore + UserStore + OrderStore + OutboxStore + ReportStore {}

impl<T: ProductStore + UserStore + OrderStore + OutboxStore + ReportStore> Store for T {}
