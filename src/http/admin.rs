//! `/api/admin` endpoints. Mounted behind [`crate::auth::require_admin`].

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use crate::domain::aggregates::{Product, ProductDraft};
use crate::reports::{AdminOrderView, Analytics, CustomerSummary, DashboardStats};
use crate::services::admin::{self, AnalyticsQuery, StatusUpdate};
use crate::state::AppState;
use crate::store::{AdminOrderQuery, CustomerQuery, Page};
use crate::Result;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/analytics", get(analytics))
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", put(update_product).delete(delete_product))
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order).patch(update_order_status))
        .route("/customers", get(list_customers))
}

async fn dashboard(State(s): State<AppState>) -> Result<Json<DashboardStats>> {
    admin::dashboard(&s).await.map(Json)
}

async fn analytics(State(s): State<AppState>, Query(q): Query<AnalyticsQuery>) -> Result<Json<Analytics>> {
    admin::analytics(&s, &q).await.map(Json)
}

async fn list_products(State(s): State<AppState>) -> Result<Json<Vec<Product>>> {
    admin::list_products(&s).await.map(Json)
}

async fn create_product(State(s): State<AppState>, Json(draft): Json<ProductDraft>) -> Result<(StatusCode, Json<Product>)> {
    let product = admin::create_product(&s, draft).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(State(s): State<AppState>, Path(id): Path<Uuid>, Json(draft): Json<ProductDraft>) -> Result<Json<Product>> {
    admin::update_product(&s, id, draft).await.map(Json)
}

async fn delete_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>> {
    admin::delete_product(&s, id).await?;
    Ok(Json(json!({ "message": "Product deleted successfully" })))
}

async fn list_orders(State(s): State<AppState>, Query(q): Query<AdminOrderQuery>) -> Result<Json<Page<AdminOrderView>>> {
    admin::list_orders(&s, &q).await.map(Json)
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<AdminOrderView>> {
    admin::get_order(&s, id).await.map(Json)
}

async fn update_order_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(body): Json<StatusUpdate>) -> Result<Json<AdminOrderView>> {
    admin::update_order_status(&s, id, body).await.map(Json)
}

async fn list_customers(State(s): State<AppState>, Query(q): Query<CustomerQuery>) -> Result<Json<Page<CustomerSummary>>> {
    admin::list_customers(&s, &q).await.map(Json)
}
