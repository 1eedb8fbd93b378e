//! Domain events
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::OrderStatus;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderPlaced { order_id: Uuid, user_id: Uuid, total: i64 },
    PaymentCompleted { order_id: Uuid, transaction_ref: Option<String> },
    PaymentFailed { order_id: Uuid, transaction_ref: Option<String> },
    OrderStatusChanged { order_id: Uuid, status: OrderStatus },
    CustomerRegistered { user_id: Uuid },
}

impl DomainEvent {
    /// NATS subject the event is published under.
    pub fn subject(&self) -> String {
        let name = match self {
            Self::OrderPlaced { .. } => "order_placed",
            Self::PaymentCompleted { .. } => "payment_completed",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::OrderStatusChanged { .. } => "order_status_changed",
            Self::CustomerRegistered { .. } => "customer_registered",
        };
        format!("storefront.{name}")
    }
}
