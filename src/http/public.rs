//! Storefront, account and checkout endpoints.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::json;
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use crate::auth::{bearer_token, CurrentUser};
use crate::domain::aggregates::{Order, Product};
use crate::services::accounts::{self, LoginRequest, RegisterRequest, SessionToken};
use crate::services::orders::{self, CreateOrderRequest, OrderCreated};
use crate::services::payments::{self, InitiatePaymentRequest, PaymentInitiated, PaymentStatusView, ProviderCallback, StatusQuery};
use crate::state::AppState;
use crate::store::{OrderQuery, Page, ProductQuery};
use crate::{Result, StoreError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/products", get(list_products))
        .route("/api/products/:id", get(get_product))
        .route("/api/orders", get(list_orders).post(create_order))
        .route("/api/orders/:id", get(get_order))
        .route("/api/payments/momo", post(initiate_payment))
        .route("/api/payments/status", get(payment_status))
        .route("/api/payments/momo/callback", post(payment_callback))
}

async fn register(State(s): State<AppState>, Json(body): Json<RegisterRequest>) -> Result<impl IntoResponse> {
    let user = accounts::register(&s, body).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Registration successful", "user": user }))))
}

async fn login(State(s): State<AppState>, Json(body): Json<LoginRequest>) -> Result<Json<SessionToken>> {
    accounts::login(&s, body).await.map(Json)
}

async fn logout(State(s): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    let token = bearer_token(&headers).ok_or(StoreError::Unauthorized)?;
    accounts::logout(&s, token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_products(State(s): State<AppState>, Query(q): Query<ProductQuery>) -> Result<Json<Page<Product>>> {
    s.store.list_products(&q).await.map(Json)
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    s.store.get_product(id).await?.map(Json).ok_or(StoreError::NotFound("Product"))
}

async fn list_orders(State(s): State<AppState>, CurrentUser(user): CurrentUser, Query(q): Query<OrderQuery>) -> Result<Json<Page<Order>>> {
    orders::list_my_orders(&s, &user, &q).await.map(Json)
}

async fn create_order(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreated>)> {
    let order = orders::place_order(&s, &user, body).await?;
    Ok((StatusCode::CREATED, Json(OrderCreated::from(&order))))
}

async fn get_order(State(s): State<AppState>, CurrentUser(user): CurrentUser, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    orders::get_my_order(&s, &user, id).await.map(Json)
}

async fn initiate_payment(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<InitiatePaymentRequest>,
) -> Result<Json<PaymentInitiated>> {
    payments::initiate(&s, &user, body).await.map(Json)
}

async fn payment_status(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<StatusQuery>,
) -> Result<Json<PaymentStatusView>> {
    payments::check_status(&s, &user, q.transaction_id.as_deref()).await.map(Json)
}

async fn payment_callback(State(s): State<AppState>, Json(body): Json<ProviderCallback>) -> Result<Json<PaymentStatusView>> {
    payments::handle_callback(&s, body).await.map(Json)
}
