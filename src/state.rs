use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::domain::events::DomainEvent;
use crate::payments::PaymentGateway;
use crate::store::Store;

/// Publishes domain events to NATS when a connection is configured.
#[derive(Clone, Default)]
pub struct EventBus {
    nats: Option<async_nats::Client>,
}

impl EventBus {
    pub fn new(nats: Option<async_nats::Client>) -> Self {
        Self { nats }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Best effort: a failed publish is logged and otherwise ignored.
    pub async fn publish(&self, event: DomainEvent) {
        let Some(client) = &self.nats else { return };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "failed to encode domain event");
                return;
            }
        };
        if let Err(error) = client.publish(event.subject(), payload.into()).await {
            warn!(%error, subject = %event.subject(), "failed to publish domain event");
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub payments: Arc<dyn PaymentGateway>,
    pub events: EventBus,
}
