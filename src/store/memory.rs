//! In-process backend with the same semantics as [`super::PgStore`].
//!
//! All state sits behind one mutex, so every operation is atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    search_term, AdminOrderQuery, CustomerQuery, OrderQuery, OrderStore, OutboxStore, Page, Paging, ProductQuery,
    ProductSort, ProductStore, ReportStore, UserStore,
};
use crate::auth::Session;
use crate::domain::aggregates::{
    price_order_lines, CustomerContact, Order, OrderLineRequest, OrderStatus, PaymentStatus, PaymentTransition, Product,
    ProductDraft, Role, User,
};
use crate::mail::{OutboundEmail, QueuedEmail};
use crate::reports::{self, AdminOrderView, Analytics, CustomerSummary, DashboardStats, DateRange};
use crate::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboxStatus { Queued, Sent, Dead }

#[derive(Debug, Clone)]
struct OutboxRow {
    id: Uuid,
    email: OutboundEmail,
    status: OutboxStatus,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    products: HashMap<Uuid, Product>,
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Session>,
    orders: Vec<Order>,
    outbox: Vec<OutboxRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn newest_first<T, F: Fn(&T) -> DateTime<Utc>>(items: &mut [T], created: F) {
    items.sort_by(|a, b| created(b).cmp(&created(a)));
}

fn paginate<T: Clone>(items: &[T], paging: Paging) -> Vec<T> {
    items.iter().skip(paging.offset()).take(paging.limit as usize).cloned().collect()
}

impl Inner {
    fn order_mut(&mut self, id: Uuid) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.id == id)
    }

    fn admin_view(&self, order: &Order) -> AdminOrderView {
        AdminOrderView { order: order.clone(), customer: self.users.get(&order.user_id).map(CustomerContact::from) }
    }

    fn enqueue(&mut self, email: &OutboundEmail) -> bool {
        if self.outbox.iter().any(|r| r.email.idempotency_key == email.idempotency_key) {
            return false;
        }
        self.outbox.push(OutboxRow {
            id: Uuid::now_v7(),
            email: email.clone(),
            status: OutboxStatus::Queued,
            attempts: 0,
            next_attempt_at: Utc::now(),
        });
        true
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let paging = Paging::new(query.page, query.limit, 12);
        let inner = self.lock();
        let search = search_term(&query.search);
        let mut matching: Vec<Product> = inner
            .products
            .values()
            .filter(|p| query.category.as_deref().map_or(true, |c| p.category == c))
            .filter(|p| search.map_or(true, |s| p.matches_search(s)))
            .cloned()
            .collect();
        match query.sort.unwrap_or(ProductSort::Newest) {
            ProductSort::PriceAsc => matching.sort_by_key(|p| p.price),
            ProductSort::PriceDesc => matching.sort_by(|a, b| b.price.cmp(&a.price)),
            ProductSort::Newest => newest_first(&mut matching, |p| p.created_at),
        }
        Ok(Page::new(paginate(&matching, paging), matching.len() as i64, paging))
    }

    async fn all_products(&self) -> Result<Vec<Product>> {
        let mut all: Vec<Product> = self.lock().products.values().cloned().collect();
        newest_first(&mut all, |p| p.created_at);
        Ok(all)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        self.lock().products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&self, id: Uuid, draft: ProductDraft) -> Result<Option<Product>> {
        let mut inner = self.lock();
        let Some(product) = inner.products.get_mut(&id) else { return Ok(None) };
        product.apply(draft)?;
        Ok(Some(product.clone()))
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool> {
        Ok(self.lock().products.remove(&id).is_some())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut inner = self.lock();
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::validation("Email is already registered"));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.lock().users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        self.lock().sessions.insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn session_user(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        let inner = self.lock();
        Ok(inner
            .sessions
            .get(token_hash)
            .filter(|s| s.expires_at > now)
            .and_then(|s| inner.users.get(&s.user_id))
            .cloned())
    }

    async fn delete_session(&self, token_hash: &str) -> Result<()> {
        self.lock().sessions.remove(token_hash);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn place_order(&self, user_id: Uuid, lines: &[OrderLineRequest], declared_total: Option<i64>) -> Result<Order> {
        let mut inner = self.lock();
        let (items, total) = price_order_lines(lines, declared_total, &inner.products)?;
        for item in &items {
            if let Some(product) = inner.products.get_mut(&item.product_id) {
                product.remove_stock(item.quantity)?;
            }
        }
        let order = Order::place(user_id, items, total);
        inner.orders.push(order.clone());
        Ok(order)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.lock().orders.iter().find(|o| o.id == id).cloned())
    }

    async fn find_order_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        Ok(self.lock().orders.iter().find(|o| o.transaction_ref.as_deref() == Some(reference)).cloned())
    }

    async fn list_user_orders(&self, user_id: Uuid, query: &OrderQuery) -> Result<Page<Order>> {
        let paging = Paging::new(query.page, query.limit, 10);
        let mut mine: Vec<Order> = self
            .lock()
            .orders
            .iter()
            .filter(|o| o.user_id == user_id && query.status.map_or(true, |s| o.order_status == s))
            .cloned()
            .collect();
        newest_first(&mut mine, |o| o.created_at);
        Ok(Page::new(paginate(&mine, paging), mine.len() as i64, paging))
    }

    async fn record_payment_initiation(&self, id: Uuid, reference: &str, at: DateTime<Utc>) -> Result<Option<Order>> {
        let mut inner = self.lock();
        let Some(order) = inner.order_mut(id).filter(|o| !o.is_paid()) else { return Ok(None) };
        order.record_initiation(reference.to_string(), at);
        Ok(Some(order.clone()))
    }

    async fn transition_payment(&self, id: Uuid, transition: PaymentTransition, notice: Option<OutboundEmail>) -> Result<Option<Order>> {
        let mut inner = self.lock();
        let Some(order) = inner.order_mut(id) else { return Ok(None) };
        if !order.accepts(&transition) {
            return Ok(None);
        }
        order.apply(transition);
        let updated = order.clone();
        if let Some(email) = notice {
            inner.enqueue(&email);
        }
        Ok(Some(updated))
    }

    async fn set_order_status(&self, id: Uuid, status: OrderStatus, notice: Option<OutboundEmail>) -> Result<Option<Order>> {
        let mut inner = self.lock();
        let Some(order) = inner.order_mut(id) else { return Ok(None) };
        if order.payment_status != PaymentStatus::Completed {
            return Ok(None);
        }
        order.set_order_status(status);
        let updated = order.clone();
        if let Some(email) = notice {
            inner.enqueue(&email);
        }
        Ok(Some(updated))
    }

    async fn stale_pending_orders(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Order>> {
        let mut stale: Vec<Order> = self
            .lock()
            .orders
            .iter()
            .filter(|o| o.payment_status == PaymentStatus::Pending && o.payment_deadline_base() < before)
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.payment_deadline_base());
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue_email(&self, email: &OutboundEmail) -> Result<bool> {
        Ok(self.lock().enqueue(email))
    }

    async fn claim_due_emails(&self, now: DateTime<Utc>, lease_until: DateTime<Utc>, limit: i64) -> Result<Vec<QueuedEmail>> {
        let mut inner = self.lock();
        let limit = usize::try_from(limit).unwrap_or(0);
        let claimed = inner
            .outbox
            .iter_mut()
            .filter(|r| r.status == OutboxStatus::Queued && r.next_attempt_at <= now)
            .take(limit)
            .map(|r| {
                r.attempts += 1;
                r.next_attempt_at = lease_until;
                QueuedEmail { id: r.id, email: r.email.clone(), attempts: r.attempts }
            })
            .collect();
        Ok(claimed)
    }

    async fn mark_email_sent(&self, id: Uuid, _at: DateTime<Utc>) -> Result<()> {
        if let Some(row) = self.lock().outbox.iter_mut().find(|r| r.id == id) {
            row.status = OutboxStatus::Sent;
        }
        Ok(())
    }

    async fn mark_email_failed(&self, id: Uuid, error: &str, retry_at: Option<DateTime<Utc>>) -> Result<()> {
        if let Some(row) = self.lock().outbox.iter_mut().find(|r| r.id == id) {
            tracing::debug!(email = %id, error, "delivery attempt failed");
            match retry_at {
                Some(at) => row.next_attempt_at = at,
                None => row.status = OutboxStatus::Dead,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn dashboard(&self) -> Result<DashboardStats> {
        let inner = self.lock();
        let paid: Vec<&Order> = inner.orders.iter().filter(|o| o.is_paid()).collect();
        let mut recent: Vec<&Order> = inner.orders.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(DashboardStats {
            total_orders: paid.len() as i64,
            total_revenue: paid.iter().map(|o| o.total_amount.amount()).sum(),
            total_customers: inner.users.values().filter(|u| u.role == Role::User).count() as i64,
            total_products: inner.products.len() as i64,
            recent_orders: recent.into_iter().take(5).map(|o| inner.admin_view(o)).collect(),
        })
    }

    async fn analytics(&self, range: &DateRange) -> Result<Analytics> {
        let inner = self.lock();
        let users: Vec<User> = inner.users.values().cloned().collect();
        Ok(reports::compute_analytics(&inner.orders, &users, &inner.products, range))
    }

    async fn list_admin_orders(&self, query: &AdminOrderQuery) -> Result<Page<AdminOrderView>> {
        let paging = Paging::new(query.page, query.limit, 10);
        let inner = self.lock();
        let search = search_term(&query.search).map(str::to_lowercase);
        let mut views: Vec<AdminOrderView> = inner
            .orders
            .iter()
            .filter(|o| query.status.map_or(true, |s| o.order_status == s))
            .map(|o| inner.admin_view(o))
            .filter(|v| {
                search.as_deref().map_or(true, |s| {
                    v.order.id.to_string().contains(s)
                        || v.customer.as_ref().is_some_and(|c| c.name.to_lowercase().contains(s) || c.email.to_lowercase().contains(s))
                })
            })
            .collect();
        newest_first(&mut views, |v| v.order.created_at);
        Ok(Page::new(paginate(&views, paging), views.len() as i64, paging))
    }

    async fn get_admin_order(&self, id: Uuid) -> Result<Option<AdminOrderView>> {
        let inner = self.lock();
        Ok(inner.orders.iter().find(|o| o.id == id).map(|o| inner.admin_view(o)))
    }

    async fn list_customers(&self, query: &CustomerQuery) -> Result<Page<CustomerSummary>> {
        let paging = Paging::new(query.page, query.limit, 10);
        let inner = self.lock();
        let search = search_term(&query.search);
        let mut customers: Vec<&User> = inner
            .users
            .values()
            .filter(|u| u.role == Role::User && search.map_or(true, |s| u.matches_search(s)))
            .collect();
        customers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = customers.len() as i64;
        let data = customers
            .into_iter()
            .skip(paging.offset())
            .take(paging.limit as usize)
            .map(|u| reports::customer_summary(u, &inner.orders))
            .collect();
        Ok(Page::new(data, total, paging))
    }
}
