//! Back-office operations. Callers are already authorized by the admin
//! router middleware.

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{OrderError, OrderStatus, Product, ProductDraft};
use crate::domain::events::DomainEvent;
use crate::mail::templates;
use crate::reports::{AdminOrderView, Analytics, CustomerSummary, DashboardStats, DateRange};
use crate::state::AppState;
use crate::store::{AdminOrderQuery, CustomerQuery, Page};
use crate::{Result, StoreError};

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub range: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusUpdate {
    #[serde(alias = "orderStatus")]
    pub order_status: Option<String>,
}

pub async fn list_products(state: &AppState) -> Result<Vec<Product>> {
    state.store.all_products().await
}

pub async fn create_product(state: &AppState, draft: ProductDraft) -> Result<Product> {
    let product = Product::create(draft)?;
    state.store.insert_product(&product).await?;
    info!(product_id = %product.id, name = %product.name, "product created");
    Ok(product)
}

pub async fn update_product(state: &AppState, id: Uuid, draft: ProductDraft) -> Result<Product> {
    draft.check()?;
    let product = state.store.update_product(id, draft).await?.ok_or(StoreError::NotFound("Product"))?;
    info!(product_id = %id, "product updated");
    Ok(product)
}

pub async fn delete_product(state: &AppState, id: Uuid) -> Result<()> {
    if !state.store.delete_product(id).await? {
        return Err(StoreError::NotFound("Product"));
    }
    info!(product_id = %id, "product deleted");
    Ok(())
}

pub async fn dashboard(state: &AppState) -> Result<DashboardStats> {
    state.store.dashboard().await
}

pub async fn analytics(state: &AppState, query: &AnalyticsQuery) -> Result<Analytics> {
    let range = DateRange::preset(query.range.as_deref(), Utc::now());
    state.store.analytics(&range).await
}

pub async fn list_orders(state: &AppState, query: &AdminOrderQuery) -> Result<Page<AdminOrderView>> {
    state.store.list_admin_orders(query).await
}

pub async fn get_order(state: &AppState, id: Uuid) -> Result<AdminOrderView> {
    state.store.get_admin_order(id).await?.ok_or(StoreError::NotFound("Order"))
}

pub async fn list_customers(state: &AppState, query: &CustomerQuery) -> Result<Page<CustomerSummary>> {
    state.store.list_customers(query).await
}

/// Moves a paid order through fulfillment and queues the customer notice.
pub async fn update_order_status(state: &AppState, id: Uuid, update: StatusUpdate) -> Result<AdminOrderView> {
    let status: Option<OrderStatus> = update.order_status.as_deref().and_then(|s| s.trim().parse().ok());
    let status = status.ok_or_else(|| StoreError::validation("Order status is required"))?;

    let order = state.store.find_order(id).await?.ok_or(StoreError::NotFound("Order"))?;
    order.check_status_change()?;
    if order.order_status == status {
        return get_order(state, id).await;
    }

    let notice = state.store.find_user(order.user_id).await?.map(|customer| {
        let mut updated = order.clone();
        updated.set_order_status(status);
        templates::order_status(&updated, order.updated_at, &customer, &state.config.mail.app_url)
    });

    if state.store.set_order_status(id, status, notice).await?.is_none() {
        return Err(status_refusal(state, id).await);
    }
    info!(order_id = %id, from = %order.order_status, to = %status, "order status updated");
    state.events.publish(DomainEvent::OrderStatusChanged { order_id: id, status }).await;

    get_order(state, id).await
}

/// Why a guarded status write matched nothing: the order is gone, or its
/// payment is no longer completed.
async fn status_refusal(state: &AppState, id: Uuid) -> StoreError {
    match state.store.find_order(id).await {
        Ok(Some(_)) => OrderError::UnpaidOrder.into(),
        Ok(None) => StoreError::NotFound("Order"),
        Err(e) => e,
    }
}
