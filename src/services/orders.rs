//! Checkout and the customer's own order history.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderLineRequest, User};
use crate::domain::events::DomainEvent;
use crate::state::AppState;
use crate::store::{OrderQuery, Page};
use crate::{Result, StoreError};

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderLineRequest>,
    #[serde(alias = "totalAmount")]
    pub total_amount: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrderCreated {
    pub message: &'static str,
    pub order_id: Uuid,
}

impl From<&Order> for OrderCreated {
    fn from(order: &Order) -> Self {
        Self { message: "Order created successfully", order_id: order.id }
    }
}

pub async fn place_order(state: &AppState, user: &User, request: CreateOrderRequest) -> Result<Order> {
    let order = state.store.place_order(user.id, &request.items, request.total_amount).await?;
    info!(order_id = %order.id, user_id = %user.id, total = %order.total_amount, items = order.items.len(), "order placed");

    let event = DomainEvent::OrderPlaced { order_id: order.id, user_id: user.id, total: order.total_amount.amount() };
    state.events.publish(event).await;
    Ok(order)
}

pub async fn list_my_orders(state: &AppState, user: &User, query: &OrderQuery) -> Result<Page<Order>> {
    state.store.list_user_orders(user.id, query).await
}

/// Someone else's order is reported as absent.
pub async fn get_my_order(state: &AppState, user: &User, id: Uuid) -> Result<Order> {
    state.store.find_order(id).await?.filter(|o| o.user_id == user.id).ok_or(StoreError::NotFound("Order"))
}
