//! Mobile-money checkout: initiation, reconciliation and the deadline sweep.
//!
//! Three paths observe provider state: the client poll, the provider
//! callback and the background sweep. All of them funnel into [`settle`],
//! which applies a transition with a compare-and-set on the current payment
//! status, so each outcome takes effect (and notifies) once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderError, OrderStatus, PaymentOutcome, PaymentStatus, User};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::Msisdn;
use crate::mail::{templates, OutboundEmail};
use crate::payments::PaymentRequest;
use crate::state::AppState;
use crate::{Result, StoreError};

const SWEEP_BATCH: i64 = 100;
const SETTLE_ATTEMPTS: usize = 3;

#[derive(Debug, Default, Deserialize)]
pub struct InitiatePaymentRequest {
    #[serde(alias = "orderId")]
    pub order_id: Option<Uuid>,
    #[serde(alias = "phoneNumber")]
    pub phone_number: Option<String>,
    pub amount: Option<i64>,
}

/// Returned to the checkout page, which polls at the given cadence.
#[derive(Debug, Serialize)]
pub struct PaymentInitiated {
    pub transaction_id: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(alias = "transactionId")]
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusView {
    /// Provider state, verbatim.
    pub status: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
}

/// Provider push notification. Only used to find the order; its claims about
/// the outcome are never trusted.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCallback {
    pub external_id: Option<String>,
    pub reference_id: Option<String>,
}

impl ProviderCallback {
    fn reference(&self) -> Option<&str> {
        [self.external_id.as_deref(), self.reference_id.as_deref()].into_iter().flatten().map(str::trim).find(|r| !r.is_empty())
    }
}

pub async fn initiate(state: &AppState, user: &User, request: InitiatePaymentRequest) -> Result<PaymentInitiated> {
    let phone = request.phone_number.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let (Some(order_id), Some(phone), Some(amount)) = (request.order_id, phone, request.amount) else {
        return Err(StoreError::validation("Missing required fields"));
    };

    let order = state.store.find_order(order_id).await?.filter(|o| o.user_id == user.id).ok_or(StoreError::NotFound("Order"))?;
    order.check_can_pay(amount)?;
    let payer = Msisdn::normalize(phone, &state.config.momo.country_code).map_err(|e| StoreError::validation(e.to_string()))?;

    let now = Utc::now();
    let payment = PaymentRequest::new(order.id, payer, order.total_amount, now);
    state.payments.request_to_pay(&payment).await.map_err(|source| StoreError::Payment { context: "Payment initiation failed", source })?;
    state.store.record_payment_initiation(order.id, &payment.reference, now).await?.ok_or(OrderError::AlreadyPaid)?;
    info!(order_id = %order.id, reference = %payment.reference, provider = state.payments.provider_name(), "payment requested");

    let timing = &state.config.payments;
    Ok(PaymentInitiated { transaction_id: payment.reference, poll_interval_secs: timing.poll_interval.as_secs(), timeout_secs: timing.client_timeout.as_secs() })
}

/// Client poll. Customers see their own orders; administrators see any.
pub async fn check_status(state: &AppState, user: &User, transaction_id: Option<&str>) -> Result<PaymentStatusView> {
    let reference = transaction_id.map(str::trim).filter(|t| !t.is_empty());
    let reference = reference.ok_or_else(|| StoreError::validation("Transaction ID is required"))?;

    let order = state.store.find_order_by_reference(reference).await?;
    let order = order.filter(|o| o.user_id == user.id || user.is_admin()).ok_or(StoreError::NotFound("Order"))?;
    reconcile(state, order, reference).await
}

pub async fn handle_callback(state: &AppState, callback: ProviderCallback) -> Result<PaymentStatusView> {
    let reference = callback.reference().ok_or_else(|| StoreError::validation("Transaction ID is required"))?;
    let order = state.store.find_order_by_reference(reference).await?.ok_or(StoreError::NotFound("Order"))?;
    debug!(order_id = %order.id, reference, "provider callback received");
    reconcile(state, order, reference).await
}

async fn reconcile(state: &AppState, order: Order, reference: &str) -> Result<PaymentStatusView> {
    let provider_status = state.payments.transaction_status(reference).await;
    let provider_status = provider_status.map_err(|source| StoreError::Payment { context: "Failed to check payment status", source })?;

    let order = match provider_status.outcome() {
        Some(outcome) => settle(state, order, outcome).await?,
        None => order,
    };

    Ok(PaymentStatusView {
        status: provider_status.as_str().to_string(),
        payment_status: order.payment_status,
        order_status: order.order_status,
    })
}

/// Applies `outcome`, observed for the payment attempt `order` carries,
/// unless it is already reflected or the customer has started a new attempt
/// since. Returns the order as stored afterwards.
pub async fn settle(state: &AppState, mut order: Order, outcome: PaymentOutcome) -> Result<Order> {
    let observed = order.transaction_ref.clone();
    for _ in 0..SETTLE_ATTEMPTS {
        if order.transaction_ref != observed {
            debug!(order_id = %order.id, "payment re-initiated, dropping stale outcome");
            return Ok(order);
        }
        let Some(transition) = order.transition_for(outcome) else { return Ok(order) };
        let (from, to) = (transition.from, transition.to);

        let notice = match outcome {
            PaymentOutcome::Completed => confirmation_email(state, &order).await?,
            PaymentOutcome::Failed => None,
        };

        if let Some(updated) = state.store.transition_payment(order.id, transition, notice).await? {
            info!(order_id = %updated.id, %from, %to, "payment settled");
            let event = match outcome {
                PaymentOutcome::Completed => DomainEvent::PaymentCompleted { order_id: updated.id, transaction_ref: updated.transaction_ref.clone() },
                PaymentOutcome::Failed => DomainEvent::PaymentFailed { order_id: updated.id, transaction_ref: updated.transaction_ref.clone() },
            };
            state.events.publish(event).await;
            return Ok(updated);
        }

        debug!(order_id = %order.id, "payment status moved underneath us, reloading");
        order = state.store.find_order(order.id).await?.ok_or(StoreError::NotFound("Order"))?;
    }
    Ok(order)
}

async fn confirmation_email(state: &AppState, order: &Order) -> Result<Option<OutboundEmail>> {
    let customer = state.store.find_user(order.user_id).await?;
    if customer.is_none() {
        warn!(order_id = %order.id, "order has no customer, skipping confirmation email");
    }
    Ok(customer.map(|c| templates::order_confirmation(order, &c, &state.config.mail.app_url)))
}

/// Resolves pending payments older than the deadline. Orders with a
/// reference get one last provider lookup; anything not terminal fails.
/// Returns how many orders left `pending`.
pub async fn sweep_stale(state: &AppState, now: DateTime<Utc>) -> Result<usize> {
    let deadline = chrono::Duration::from_std(state.config.payments.deadline)
        .map_err(|e| StoreError::Internal(format!("payment deadline out of range: {e}")))?;
    let stale = state.store.stale_pending_orders(now - deadline, SWEEP_BATCH).await?;
    let mut resolved = 0;

    for order in stale {
        let outcome = match order.transaction_ref.as_deref() {
            Some(reference) => match state.payments.transaction_status(reference).await {
                Ok(status) => status.outcome().unwrap_or(PaymentOutcome::Failed),
                Err(error) => {
                    warn!(order_id = %order.id, %error, "final status lookup failed, expiring payment");
                    PaymentOutcome::Failed
                }
            },
            None => PaymentOutcome::Failed,
        };

        let order_id = order.id;
        match settle(state, order, outcome).await {
            Ok(settled) if settled.payment_status != PaymentStatus::Pending => resolved += 1,
            Ok(_) => {}
            Err(error) => warn!(%order_id, %error, "failed to expire payment"),
        }
    }

    if resolved > 0 {
        info!(resolved, "expired pending payments");
    }
    Ok(resolved)
}

pub async fn run_sweeper(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(state.config.payments.sweep_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = sweep_stale(&state, Utc::now()).await {
                    warn!(%error, "payment sweep failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("payment sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{OrderLineRequest, Role};
    use crate::payments::{PaymentError, ProviderStatus};
    use crate::store::{OrderStore, OutboxStore};
    use crate::testing::{harness, Harness};

    async fn pending_order(h: &Harness, buyer: &User) -> Order {
        let product = h.product("Router", 5_000, 10, "network").await;
        h.store
            .place_order(buyer.id, &[OrderLineRequest { product_id: product.id, quantity: 2, price: 5_000 }], Some(10_000))
            .await
            .unwrap()
    }

    fn pay(order: &Order, amount: i64) -> InitiatePaymentRequest {
        InitiatePaymentRequest { order_id: Some(order.id), phone_number: Some("078 812-3456".into()), amount: Some(amount) }
    }

    async fn queued_keys(h: &Harness) -> Vec<String> {
        let now = Utc::now() + chrono::Duration::days(1);
        h.store
            .claim_due_emails(now, now, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.email.idempotency_key)
            .collect()
    }

    #[tokio::test]
    async fn test_initiation_records_reference() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;

        let started = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap();
        assert!(started.transaction_id.starts_with(&format!("order_{}_", order.id)));
        assert_eq!((started.poll_interval_secs, started.timeout_secs), (5, 120));

        let sent = h.gateway.requests.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payer.as_str(), "250788123456");
        assert_eq!(sent[0].amount.amount(), 10_000);

        let stored = h.store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.transaction_ref.as_deref(), Some(started.transaction_id.as_str()));
        assert!(stored.payment_initiated_at.is_some());
    }

    #[tokio::test]
    async fn test_initiation_rejections() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let stranger = h.user("stranger@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;

        let missing = InitiatePaymentRequest { order_id: Some(order.id), phone_number: Some("  ".into()), amount: Some(10_000) };
        assert_eq!(initiate(&h.state, &buyer, missing).await.unwrap_err().to_string(), "Missing required fields");
        assert!(matches!(initiate(&h.state, &stranger, pay(&order, 10_000)).await, Err(StoreError::NotFound("Order"))));
        assert_eq!(initiate(&h.state, &buyer, pay(&order, 9_999)).await.unwrap_err().to_string(), "Amount does not match order total");

        let bad_phone = InitiatePaymentRequest { phone_number: Some("12ab".into()), ..pay(&order, 10_000) };
        assert_eq!(initiate(&h.state, &buyer, bad_phone).await.unwrap_err().status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(h.gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_500_and_leaves_order() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        h.gateway.fail_initiation(PaymentError::Authentication("401 from token endpoint".into()));

        let err = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Payment initiation failed");
        assert_eq!(h.store.find_order(order.id).await.unwrap().unwrap().transaction_ref, None);
    }

    #[tokio::test]
    async fn test_repeated_success_polls_settle_once() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        let reference = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap().transaction_id;

        h.gateway.answer(Ok(ProviderStatus::Pending));
        let first = check_status(&h.state, &buyer, Some(&reference)).await.unwrap();
        assert_eq!((first.status.as_str(), first.payment_status), ("PENDING", PaymentStatus::Pending));

        h.gateway.answer(Ok(ProviderStatus::Successful));
        for _ in 0..3 {
            let view = check_status(&h.state, &buyer, Some(&reference)).await.unwrap();
            assert_eq!(view.status, "SUCCESSFUL");
            assert_eq!(view.payment_status, PaymentStatus::Completed);
            assert_eq!(view.order_status, OrderStatus::Processing);
        }

        assert_eq!(queued_keys(&h).await, vec![format!("order-confirmation:{}", order.id)]);
    }

    #[tokio::test]
    async fn test_completed_is_terminal() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        let reference = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap().transaction_id;

        h.gateway.answer(Ok(ProviderStatus::Successful));
        check_status(&h.state, &buyer, Some(&reference)).await.unwrap();
        h.gateway.answer(Ok(ProviderStatus::Failed));
        let view = check_status(&h.state, &buyer, Some(&reference)).await.unwrap();

        assert_eq!(view.status, "FAILED");
        assert_eq!(view.payment_status, PaymentStatus::Completed);
        assert_eq!(initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap_err().to_string(), "Order is already paid");
    }

    #[tokio::test]
    async fn test_failed_payment_can_be_retried() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        let first = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap().transaction_id;

        h.gateway.answer(Ok(ProviderStatus::Failed));
        assert_eq!(check_status(&h.state, &buyer, Some(&first)).await.unwrap().payment_status, PaymentStatus::Failed);

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap().transaction_id;
        assert_ne!(first, second);
        let stored = h.store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(stored.transaction_ref.as_deref(), Some(second.as_str()));

        // The superseded reference no longer resolves.
        assert!(matches!(check_status(&h.state, &buyer, Some(&first)).await, Err(StoreError::NotFound("Order"))));
    }

    #[tokio::test]
    async fn test_status_lookup_validation() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        assert_eq!(check_status(&h.state, &buyer, None).await.unwrap_err().to_string(), "Transaction ID is required");
        assert!(matches!(check_status(&h.state, &buyer, Some("order_nope_1")).await, Err(StoreError::NotFound("Order"))));
        assert_eq!(h.gateway.status_calls(), 0);
    }

    #[tokio::test]
    async fn test_callback_reconciles_against_provider() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        let reference = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap().transaction_id;

        // The body claims success but the provider still says pending.
        h.gateway.answer(Ok(ProviderStatus::Pending));
        let callback = ProviderCallback { external_id: Some(reference.clone()), reference_id: None };
        let view = handle_callback(&h.state, callback).await.unwrap();
        assert_eq!(view.payment_status, PaymentStatus::Pending);
        assert_eq!(h.gateway.status_calls(), 1);

        h.gateway.answer(Ok(ProviderStatus::Successful));
        let callback = ProviderCallback { external_id: None, reference_id: Some(reference) };
        assert_eq!(handle_callback(&h.state, callback).await.unwrap().payment_status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_client_giving_up_leaves_pending_until_sweep() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        let reference = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap().transaction_id;

        h.gateway.answer(Ok(ProviderStatus::Pending));
        for _ in 0..24 {
            check_status(&h.state, &buyer, Some(&reference)).await.unwrap();
        }
        assert_eq!(h.store.find_order(order.id).await.unwrap().unwrap().payment_status, PaymentStatus::Pending);

        // Before the deadline the sweep leaves it alone.
        assert_eq!(sweep_stale(&h.state, Utc::now()).await.unwrap(), 0);
        assert_eq!(h.store.find_order(order.id).await.unwrap().unwrap().payment_status, PaymentStatus::Pending);

        let later = Utc::now() + chrono::Duration::seconds(601);
        assert_eq!(sweep_stale(&h.state, later).await.unwrap(), 1);
        assert_eq!(h.store.find_order(order.id).await.unwrap().unwrap().payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_sweep_applies_late_success() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap();
        let never_started = pending_order(&h, &buyer).await;

        h.gateway.answer(Ok(ProviderStatus::Successful));
        let later = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(sweep_stale(&h.state, later).await.unwrap(), 2);

        let paid = h.store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Completed);
        assert_eq!(paid.order_status, OrderStatus::Processing);
        assert_eq!(h.store.find_order(never_started.id).await.unwrap().unwrap().payment_status, PaymentStatus::Failed);
        // Only the order with a reference was looked up.
        assert_eq!(h.gateway.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expires_on_provider_error() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap();

        h.gateway.answer(Err(PaymentError::Transport("timed out".into())));
        sweep_stale(&h.state, Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(h.store.find_order(order.id).await.unwrap().unwrap().payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_sweep_outcome_for_superseded_attempt_is_dropped() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap();
        let stale = h.store.find_order(order.id).await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let retry = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap().transaction_id;

        let settled = settle(&h.state, stale, PaymentOutcome::Failed).await.unwrap();
        assert_eq!(settled.payment_status, PaymentStatus::Pending);
        assert_eq!(settled.transaction_ref.as_deref(), Some(retry.as_str()));
        assert_eq!(h.store.find_order(order.id).await.unwrap().unwrap().payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_initiation_refused_once_paid() {
        let h = harness();
        let buyer = h.user("buyer@x.rw", Role::User).await;
        let order = pending_order(&h, &buyer).await;
        let reference = initiate(&h.state, &buyer, pay(&order, 10_000)).await.unwrap().transaction_id;
        h.gateway.answer(Ok(ProviderStatus::Successful));
        check_status(&h.state, &buyer, Some(&reference)).await.unwrap();

        assert!(h.store.record_payment_initiation(order.id, "order_late_1", Utc::now()).await.unwrap().is_none());
        let stored = h.store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.transaction_ref.as_deref(), Some(reference.as_str()));
    }

    #[test]
    fn test_callback_reference_precedence() {
        let cb: ProviderCallback = serde_json::from_str(r#"{"externalId":" ","referenceId":"order_a_1","status":"SUCCESSFUL"}"#).unwrap();
        assert_eq!(cb.reference(), Some("order_a_1"));
        assert_eq!(ProviderCallback::default().reference(), None);
    }
}
