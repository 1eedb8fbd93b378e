//! PostgreSQL backend.
//!
//! Checkout locks the referenced product rows, writes the order and
//! decrements stock in one transaction. Payment and fulfillment transitions
//! are conditional updates committed together with their outbox message.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    search_term, AdminOrderQuery, CustomerQuery, OrderQuery, OrderStore, OutboxStore, Page, Paging, ProductQuery,
    ProductSort, ProductStore, ReportStore, UserStore,
};
use crate::auth::Session;
use crate::domain::aggregates::{
    price_order_lines, CustomerContact, LineItem, Order, OrderLineRequest, OrderStatus, PaymentTransition, Product,
    ProductDraft, User,
};
use crate::domain::value_objects::Money;
use crate::mail::{OutboundEmail, QueuedEmail};
use crate::reports::{average_order_value, AdminOrderView, Analytics, ChartSeries, CustomerStats, CustomerSummary, DashboardStats, DateRange};
use crate::{Result, StoreError};

const PRODUCT_COLUMNS: &str = "id, name, description, price, stock, category, image, created_at, updated_at";
const ADMIN_ORDER_SELECT: &str = "SELECT o.*, u.name AS customer_name, u.email AS customer_email, u.phone_number AS customer_phone \
     FROM orders o LEFT JOIN users u ON u.id = o.user_id";

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: String,
    price: i64,
    stock: i32,
    category: String,
    image: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(r: ProductRow) -> Result<Self> {
        Ok(Product {
            id: r.id, name: r.name, description: r.description, price: money(r.price)?, stock: r.stock,
            category: r.category, image: r.image, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    phone_number: String,
    role: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self> {
        Ok(User {
            id: r.id, name: r.name, email: r.email, phone_number: r.phone_number,
            role: r.role.parse().map_err(corrupt)?, password_hash: r.password_hash, created_at: r.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    total_amount: i64,
    payment_status: String,
    order_status: String,
    transaction_ref: Option<String>,
    payment_initiated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    order_id: Uuid,
    product_id: Uuid,
    name: String,
    quantity: i32,
    price: i64,
}

#[derive(Debug, FromRow)]
struct AdminOrderRow {
    #[sqlx(flatten)]
    order: OrderRow,
    customer_name: Option<String>,
    customer_email: Option<String>,
    customer_phone: Option<String>,
}

#[derive(Debug, FromRow)]
struct CustomerRow {
    #[sqlx(flatten)]
    user: UserRow,
    orders_count: i64,
    total_spent: i64,
}

#[derive(Debug, FromRow)]
struct OutboxRow {
    id: Uuid,
    idempotency_key: String,
    recipient: String,
    subject: String,
    html: String,
    attempts: i32,
}

fn money(amount: i64) -> Result<Money> {
    Money::new(amount).map_err(|e| StoreError::Internal(format!("stored amount {amount}: {e}")))
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Internal(format!("corrupt row: {e}"))
}

fn like_pattern(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

fn product_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ProductQuery) {
    qb.push(" WHERE TRUE");
    if let Some(category) = query.category.clone() {
        qb.push(" AND category = ").push_bind(category);
    }
    if let Some(term) = search_term(&query.search) {
        let pattern = like_pattern(term);
        qb.push(" AND (name ILIKE ").push_bind(pattern.clone()).push(" OR description ILIKE ").push_bind(pattern).push(")");
    }
}

fn admin_order_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &AdminOrderQuery) {
    qb.push(" WHERE TRUE");
    if let Some(status) = query.status {
        qb.push(" AND o.order_status = ").push_bind(status.as_str());
    }
    if let Some(term) = search_term(&query.search) {
        let pattern = like_pattern(term);
        qb.push(" AND (o.id::text ILIKE ").push_bind(pattern.clone())
            .push(" OR u.name ILIKE ").push_bind(pattern.clone())
            .push(" OR u.email ILIKE ").push_bind(pattern)
            .push(")");
    }
}

fn customer_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &CustomerQuery) {
    qb.push(" WHERE u.role = 'user'");
    if let Some(term) = search_term(&query.search) {
        let pattern = like_pattern(term);
        qb.push(" AND (u.name ILIKE ").push_bind(pattern.clone())
            .push(" OR u.email ILIKE ").push_bind(pattern.clone())
            .push(" OR u.phone_number ILIKE ").push_bind(pattern)
            .push(")");
    }
}

async fn insert_outbox(conn: impl PgExecutor<'_>, email: &OutboundEmail) -> Result<bool> {
    let inserted = sqlx::query(
        "INSERT INTO email_outbox (id, idempotency_key, recipient, subject, html) VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (idempotency_key) DO NOTHING",
    )
    .bind(Uuid::now_v7())
    .bind(&email.idempotency_key)
    .bind(&email.recipient)
    .bind(&email.subject)
    .bind(&email.html)
    .execute(conn)
    .await?;
    Ok(inserted.rows_affected() == 1)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Attaches line items to order rows, preserving row order.
    async fn hydrate(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let item_rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT order_id, product_id, name, quantity, price FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
        for r in item_rows {
            items.entry(r.order_id).or_default().push(LineItem { product_id: r.product_id, name: r.name, quantity: r.quantity, price: money(r.price)? });
        }

        rows.into_iter()
            .map(|r| {
                Ok(Order {
                    items: items.remove(&r.id).unwrap_or_default(),
                    id: r.id,
                    user_id: r.user_id,
                    total_amount: money(r.total_amount)?,
                    payment_status: r.payment_status.parse().map_err(corrupt)?,
                    order_status: r.order_status.parse().map_err(corrupt)?,
                    transaction_ref: r.transaction_ref,
                    payment_initiated_at: r.payment_initiated_at,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                })
            })
            .collect()
    }

    async fn hydrate_one(&self, row: Option<OrderRow>) -> Result<Option<Order>> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn hydrate_admin(&self, rows: Vec<AdminOrderRow>) -> Result<Vec<AdminOrderView>> {
        let mut contacts = Vec::with_capacity(rows.len());
        let mut order_rows = Vec::with_capacity(rows.len());
        for r in rows {
            contacts.push(match (r.customer_name, r.customer_email, r.customer_phone) {
                (Some(name), Some(email), Some(phone_number)) => Some(CustomerContact { name, email, phone_number }),
                _ => None,
            });
            order_rows.push(r.order);
        }
        let orders = self.hydrate(order_rows).await?;
        Ok(orders.into_iter().zip(contacts).map(|(order, customer)| AdminOrderView { order, customer }).collect())
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let paging = Paging::new(query.page, query.limit, 12);
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products");
        product_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {PRODUCT_COLUMNS} FROM products"));
        product_filters(&mut select, query);
        select.push(match query.sort.unwrap_or(ProductSort::Newest) {
            ProductSort::PriceAsc => " ORDER BY price ASC, created_at DESC",
            ProductSort::PriceDesc => " ORDER BY price DESC, created_at DESC",
            ProductSort::Newest => " ORDER BY created_at DESC",
        });
        select.push(" LIMIT ").push_bind(i64::from(paging.limit)).push(" OFFSET ").push_bind(paging.offset() as i64);
        let rows: Vec<ProductRow> = select.build_query_as().fetch_all(&self.pool).await?;

        let data = rows.into_iter().map(Product::try_from).collect::<Result<Vec<_>>>()?;
        Ok(Page::new(data, total, paging))
    }

    async fn all_products(&self) -> Result<Vec<Product>> {
        sqlx::query_as::<_, ProductRow>(&format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at DESC"))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Product::try_from)
            .collect()
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>> {
        sqlx::query_as::<_, ProductRow>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Product::try_from)
            .transpose()
    }

    async fn insert_product(&self, p: &Product) -> Result<()> {
        sqlx::query(&format!("INSERT INTO products ({PRODUCT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"))
            .bind(p.id).bind(&p.name).bind(&p.description).bind(p.price.amount()).bind(p.stock)
            .bind(&p.category).bind(&p.image).bind(p.created_at).bind(p.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_product(&self, id: Uuid, draft: ProductDraft) -> Result<Option<Product>> {
        let price = draft.check()?;
        sqlx::query_as::<_, ProductRow>(&format!(
            "UPDATE products SET name = $2, description = $3, price = $4, stock = $5, category = $6, image = $7, updated_at = NOW() \
             WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id).bind(draft.name.trim()).bind(&draft.description).bind(price.amount()).bind(draft.stock)
        .bind(draft.category.trim()).bind(&draft.image)
        .fetch_optional(&self.pool)
        .await?
        .map(Product::try_from)
        .transpose()
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM products WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(deleted.rows_affected() == 1)
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, u: &User) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO users (id, name, email, phone_number, role, password_hash, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(u.id).bind(&u.name).bind(&u.email).bind(&u.phone_number).bind(u.role.as_str()).bind(&u.password_hash).bind(u.created_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::validation("Email is already registered")),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn insert_session(&self, s: &Session) -> Result<()> {
        sqlx::query("INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES ($1, $2, $3, $4)")
            .bind(&s.token_hash).bind(s.user_id).bind(s.created_at).bind(s.expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn session_user(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT u.* FROM sessions s JOIN users u ON u.id = s.user_id WHERE s.token_hash = $1 AND s.expires_at > $2",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn delete_session(&self, token_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1").bind(token_hash).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn place_order(&self, user_id: Uuid, lines: &[OrderLineRequest], declared_total: Option<i64>) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        // Lock in id order so concurrent checkouts cannot deadlock.
        let catalog = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|r| Product::try_from(r).map(|p| (p.id, p)))
        .collect::<Result<HashMap<Uuid, Product>>>()?;

        let (items, total) = price_order_lines(lines, declared_total, &catalog)?;
        let order = Order::place(user_id, items, total);

        sqlx::query(
            "INSERT INTO orders (id, user_id, total_amount, payment_status, order_status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(order.id).bind(order.user_id).bind(order.total_amount.amount())
        .bind(order.payment_status.as_str()).bind(order.order_status.as_str())
        .bind(order.created_at).bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        let mut reserved: HashMap<Uuid, i32> = HashMap::new();
        for (position, item) in order.items.iter().enumerate() {
            sqlx::query("INSERT INTO order_items (order_id, position, product_id, name, quantity, price) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(order.id).bind(position as i32).bind(item.product_id).bind(&item.name).bind(item.quantity).bind(item.price.amount())
                .execute(&mut *tx)
                .await?;
            *reserved.entry(item.product_id).or_default() += item.quantity;
        }

        for (product_id, quantity) in reserved {
            let decremented = sqlx::query("UPDATE products SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2")
                .bind(product_id)
                .bind(quantity)
                .execute(&mut *tx)
                .await?;
            if decremented.rows_affected() != 1 {
                let name = catalog.get(&product_id).map(|p| p.name.clone()).unwrap_or_default();
                return Err(StoreError::validation(format!("Insufficient stock for {name}")));
            }
        }

        tx.commit().await?;
        Ok(order)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        self.hydrate_one(row).await
    }

    async fn find_order_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE transaction_ref = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate_one(row).await
    }

    async fn list_user_orders(&self, user_id: Uuid, query: &OrderQuery) -> Result<Page<Order>> {
        let paging = Paging::new(query.page, query.limit, 10);
        let status = query.status.map(|s| s.as_str());
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1 AND ($2::text IS NULL OR order_status = $2)")
            .bind(user_id)
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE user_id = $1 AND ($2::text IS NULL OR order_status = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(status)
        .bind(i64::from(paging.limit))
        .bind(paging.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page::new(self.hydrate(rows).await?, total, paging))
    }

    async fn record_payment_initiation(&self, id: Uuid, reference: &str, at: DateTime<Utc>) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(
            "UPDATE orders SET transaction_ref = $2, payment_initiated_at = $3, updated_at = $3, \
             payment_status = CASE WHEN payment_status = 'failed' THEN 'pending' ELSE payment_status END \
             WHERE id = $1 AND payment_status <> 'completed' RETURNING *",
        )
        .bind(id)
        .bind(reference)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        self.hydrate_one(row).await
    }

    async fn transition_payment(&self, id: Uuid, transition: PaymentTransition, notice: Option<OutboundEmail>) -> Result<Option<Order>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, OrderRow>(
            "UPDATE orders SET payment_status = $3, order_status = COALESCE($4, order_status), updated_at = NOW() \
             WHERE id = $1 AND payment_status = $2 AND transaction_ref IS NOT DISTINCT FROM $5 RETURNING *",
        )
        .bind(id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.order_status.map(|s| s.as_str()))
        .bind(transition.reference.as_deref())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else { return Ok(None) };
        if let Some(email) = notice {
            insert_outbox(&mut *tx, &email).await?;
        }
        tx.commit().await?;
        self.hydrate_one(Some(row)).await
    }

    async fn set_order_status(&self, id: Uuid, status: OrderStatus, notice: Option<OutboundEmail>) -> Result<Option<Order>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, OrderRow>(
            "UPDATE orders SET order_status = $2, updated_at = NOW() WHERE id = $1 AND payment_status = 'completed' RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else { return Ok(None) };
        if let Some(email) = notice {
            insert_outbox(&mut *tx, &email).await?;
        }
        tx.commit().await?;
        self.hydrate_one(Some(row)).await
    }

    async fn stale_pending_orders(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE payment_status = 'pending' AND COALESCE(payment_initiated_at, created_at) < $1 \
             ORDER BY COALESCE(payment_initiated_at, created_at) LIMIT $2",
        )
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn enqueue_email(&self, email: &OutboundEmail) -> Result<bool> {
        insert_outbox(&self.pool, email).await
    }

    async fn claim_due_emails(&self, now: DateTime<Utc>, lease_until: DateTime<Utc>, limit: i64) -> Result<Vec<QueuedEmail>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "UPDATE email_outbox SET attempts = attempts + 1, next_attempt_at = $2 \
             WHERE id IN (SELECT id FROM email_outbox WHERE status = 'queued' AND next_attempt_at <= $1 \
                          ORDER BY next_attempt_at LIMIT $3 FOR UPDATE SKIP LOCKED) \
             RETURNING id, idempotency_key, recipient, subject, html, attempts",
        )
        .bind(now)
        .bind(lease_until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| QueuedEmail {
                id: r.id,
                email: OutboundEmail { idempotency_key: r.idempotency_key, recipient: r.recipient, subject: r.subject, html: r.html },
                attempts: r.attempts,
            })
            .collect())
    }

    async fn mark_email_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE email_outbox SET status = 'sent', sent_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_email_failed(&self, id: Uuid, error: &str, retry_at: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query(
            "UPDATE email_outbox SET last_error = $2, next_attempt_at = COALESCE($3, next_attempt_at), \
             status = CASE WHEN $3::timestamptz IS NULL THEN 'dead' ELSE status END WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn dashboard(&self) -> Result<DashboardStats> {
        let (total_orders, total_revenue): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(total_amount), 0)::BIGINT FROM orders WHERE payment_status = 'completed'",
        )
        .fetch_one(&self.pool)
        .await?;
        let total_customers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'user'").fetch_one(&self.pool).await?;
        let total_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products").fetch_one(&self.pool).await?;
        let recent = sqlx::query_as::<_, AdminOrderRow>(&format!("{ADMIN_ORDER_SELECT} ORDER BY o.created_at DESC LIMIT 5"))
            .fetch_all(&self.pool)
            .await?;

        Ok(DashboardStats { total_orders, total_revenue, total_customers, total_products, recent_orders: self.hydrate_admin(recent).await? })
    }

    async fn analytics(&self, range: &DateRange) -> Result<Analytics> {
        let sales: Vec<(String, i64)> = sqlx::query_as(
            "SELECT to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD') AS day, SUM(total_amount)::BIGINT \
             FROM orders WHERE created_at BETWEEN $1 AND $2 AND payment_status = 'completed' \
             GROUP BY day ORDER BY day",
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        let top: Vec<(String, i64)> = sqlx::query_as(
            "SELECT p.name, SUM(i.quantity)::BIGINT AS sold FROM order_items i \
             JOIN orders o ON o.id = i.order_id JOIN products p ON p.id = i.product_id \
             WHERE o.created_at BETWEEN $1 AND $2 AND o.payment_status = 'completed' \
             GROUP BY p.id, p.name ORDER BY sold DESC, p.name LIMIT 5",
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        let statuses: Vec<(String, i64)> = sqlx::query_as(
            "SELECT order_status, COUNT(*) FROM orders WHERE created_at BETWEEN $1 AND $2 GROUP BY order_status ORDER BY order_status",
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        let categories: Vec<(String, i64)> = sqlx::query_as(
            "SELECT p.category, SUM(i.quantity::BIGINT * i.price)::BIGINT AS revenue FROM order_items i \
             JOIN orders o ON o.id = i.order_id JOIN products p ON p.id = i.product_id \
             WHERE o.created_at BETWEEN $1 AND $2 AND o.payment_status = 'completed' \
             GROUP BY p.category ORDER BY revenue DESC, p.category",
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        let (total_customers, new_customers): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE created_at BETWEEN $1 AND $2) FROM users WHERE role = 'user'",
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.pool)
        .await?;

        let (paid_orders, revenue, buyers): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(total_amount), 0)::BIGINT, COUNT(DISTINCT user_id) FROM orders \
             WHERE created_at BETWEEN $1 AND $2 AND payment_status = 'completed'",
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(Analytics {
            sales_over_time: ChartSeries::from_pairs(sales),
            top_products: ChartSeries::from_pairs(top),
            orders_by_status: ChartSeries::from_pairs(statuses),
            revenue_by_category: ChartSeries::from_pairs(categories),
            customer_stats: CustomerStats {
                total_customers,
                new_customers,
                returning_customers: buyers,
                average_order_value: average_order_value(revenue, paid_orders),
            },
        })
    }

    async fn list_admin_orders(&self, query: &AdminOrderQuery) -> Result<Page<AdminOrderView>> {
        let paging = Paging::new(query.page, query.limit, 10);
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders o LEFT JOIN users u ON u.id = o.user_id");
        admin_order_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(ADMIN_ORDER_SELECT);
        admin_order_filters(&mut select, query);
        select.push(" ORDER BY o.created_at DESC LIMIT ").push_bind(i64::from(paging.limit)).push(" OFFSET ").push_bind(paging.offset() as i64);
        let rows: Vec<AdminOrderRow> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page::new(self.hydrate_admin(rows).await?, total, paging))
    }

    async fn get_admin_order(&self, id: Uuid) -> Result<Option<AdminOrderView>> {
        let rows = sqlx::query_as::<_, AdminOrderRow>(&format!("{ADMIN_ORDER_SELECT} WHERE o.id = $1"))
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(self.hydrate_admin(rows).await?.pop())
    }

    async fn list_customers(&self, query: &CustomerQuery) -> Result<Page<CustomerSummary>> {
        let paging = Paging::new(query.page, query.limit, 10);
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users u");
        customer_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(
            "SELECT u.*, COUNT(o.id) AS orders_count, \
             COALESCE(SUM(o.total_amount) FILTER (WHERE o.payment_status = 'completed'), 0)::BIGINT AS total_spent \
             FROM users u LEFT JOIN orders o ON o.user_id = u.id",
        );
        customer_filters(&mut select, query);
        select.push(" GROUP BY u.id ORDER BY u.created_at DESC LIMIT ").push_bind(i64::from(paging.limit)).push(" OFFSET ").push_bind(paging.offset() as i64);
        let rows: Vec<CustomerRow> = select.build_query_as().fetch_all(&self.pool).await?;

        let data = rows
            .into_iter()
            .map(|r| Ok(CustomerSummary { user: User::try_from(r.user)?, orders_count: r.orders_count, total_spent: r.total_spent }))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(data, total, paging))
    }
}
