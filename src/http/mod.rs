//! HTTP surface.

use axum::{middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::require_admin;
use crate::state::AppState;

pub mod admin;
pub mod extract;
pub mod public;

pub fn router(state: AppState) -> Router {
    let admin = admin::routes().route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health))
        .merge(public::routes())
        .nest("/api/admin", admin)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "momo-storefront" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    use crate::domain::aggregates::Role;
    use crate::payments::ProviderStatus;
    use crate::testing::{harness, Harness};

    async fn call(h: &Harness, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router(h.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = call(&h, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin_role() {
        let h = harness();
        let customer = h.user("c@x.rw", Role::User).await;
        let admin = h.user("a@x.rw", Role::Admin).await;
        let customer_token = h.token_for(&customer).await;
        let admin_token = h.token_for(&admin).await;

        for path in ["/api/admin/dashboard", "/api/admin/orders", "/api/admin/customers", "/api/admin/products"] {
            let (status, body) = call(&h, Method::GET, path, None, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
            assert_eq!(body["message"], "Unauthorized");
            assert_eq!(call(&h, Method::GET, path, Some(&customer_token), None).await.0, StatusCode::UNAUTHORIZED, "{path}");
            assert_eq!(call(&h, Method::GET, path, Some(&admin_token), None).await.0, StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn test_catalog_is_public_and_paginated() {
        let h = harness();
        for i in 0..3 {
            h.product(&format!("Phone {i}"), 100 * (i + 1), 5, "phones").await;
        }
        h.product("Charger", 50, 5, "accessories").await;

        let (status, body) = call(&h, Method::GET, "/api/products?category=phones&sort=price_desc&limit=2", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["total_pages"], 2);
        assert_eq!(body["data"][0]["name"], "Phone 2");

        let (status, body) = call(&h, Method::GET, &format!("/api/products/{}", uuid::Uuid::now_v7()), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Product not found");
    }

    #[tokio::test]
    async fn test_checkout_flow_over_http() {
        let h = harness();
        let buyer = h.user("b@x.rw", Role::User).await;
        let token = h.token_for(&buyer).await;
        let product = h.product("Router", 25_000, 2, "network").await;

        let order_body = json!({ "items": [{ "productId": product.id, "quantity": 1, "price": 25_000 }], "totalAmount": 25_000 });
        assert_eq!(call(&h, Method::POST, "/api/orders", None, Some(order_body.clone())).await.0, StatusCode::UNAUTHORIZED);

        let (status, created) = call(&h, Method::POST, "/api/orders", Some(&token), Some(order_body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["message"], "Order created successfully");
        let order_id = created["order_id"].as_str().unwrap().to_string();

        let pay = json!({ "orderId": order_id, "phoneNumber": "+250 788 123 456", "amount": 25_000 });
        let (status, started) = call(&h, Method::POST, "/api/payments/momo", Some(&token), Some(pay)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["poll_interval_secs"], 5);
        let reference = started["transaction_id"].as_str().unwrap().to_string();

        h.gateway.answer(Ok(ProviderStatus::Successful));
        let (status, polled) = call(&h, Method::GET, &format!("/api/payments/status?transactionId={reference}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(polled["status"], "SUCCESSFUL");
        assert_eq!(polled["payment_status"], "completed");
        assert_eq!(polled["order_status"], "processing");

        let (status, mine) = call(&h, Method::GET, &format!("/api/orders/{order_id}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine["items"][0]["name"], "Router");
    }

    #[tokio::test]
    async fn test_admin_status_patch_on_unpaid_order() {
        let h = harness();
        let admin = h.user("a@x.rw", Role::Admin).await;
        let admin_token = h.token_for(&admin).await;
        let buyer = h.user("b@x.rw", Role::User).await;
        let token = h.token_for(&buyer).await;
        let product = h.product("Router", 100, 2, "network").await;

        let order_body = json!({ "items": [{ "product_id": product.id, "quantity": 1, "price": 100 }], "total_amount": 100 });
        let (_, created) = call(&h, Method::POST, "/api/orders", Some(&token), Some(order_body)).await;
        let uri = format!("/api/admin/orders/{}", created["order_id"].as_str().unwrap());

        let (status, body) = call(&h, Method::PATCH, &uri, Some(&admin_token), Some(json!({ "orderStatus": "shipped" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Cannot update status of unpaid order");

        let (status, body) = call(&h, Method::GET, &uri, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order_status"], "pending");
        assert_eq!(body["customer"]["email"], "b@x.rw");
    }

    #[tokio::test]
    async fn test_incomplete_product_body_is_400_json() {
        let h = harness();
        let admin = h.user("a@x.rw", Role::Admin).await;
        let token = h.token_for(&admin).await;
        let existing = h.product("Router", 100, 2, "network").await;
        let without_image = json!({ "name": "Modem", "description": "4G", "price": 100, "stock": 1, "category": "network" });

        let (status, body) = call(&h, Method::POST, "/api/admin/products", Some(&token), Some(without_image.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "message": "All fields are required" }));

        let uri = format!("/api/admin/products/{}", existing.id);
        let (status, body) = call(&h, Method::PUT, &uri, Some(&token), Some(without_image)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "All fields are required");

        let wrong_type = json!({ "name": "Modem", "description": "4G", "price": "cheap", "stock": 1, "category": "network", "image": "/m.png" });
        let (status, body) = call(&h, Method::POST, "/api/admin/products", Some(&token), Some(wrong_type)).await;
        assert_eq!((status, body["message"].as_str()), (StatusCode::BAD_REQUEST, Some("All fields are required")));
        assert_eq!(call(&h, Method::GET, "/api/products", None, None).await.1["total"], 1);
    }

    #[tokio::test]
    async fn test_incomplete_order_lines_are_400_json() {
        let h = harness();
        let buyer = h.user("b@x.rw", Role::User).await;
        let token = h.token_for(&buyer).await;
        let product = h.product("Router", 100, 2, "network").await;

        for items in [json!([{ "productId": product.id, "quantity": 1 }]), json!([{ "productId": product.id, "price": 100 }]), json!("all")] {
            let (status, body) = call(&h, Method::POST, "/api/orders", Some(&token), Some(json!({ "items": items, "totalAmount": 100 }))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{items}");
            assert_eq!(body, json!({ "message": "Invalid order data" }));
        }
        assert_eq!(call(&h, Method::GET, "/api/orders", Some(&token), None).await.1["total"], 0);
    }

    #[tokio::test]
    async fn test_bad_path_and_query_are_400_json() {
        let h = harness();
        let (status, body) = call(&h, Method::GET, "/api/products/not-an-id", None, None).await;
        assert_eq!((status, body), (StatusCode::BAD_REQUEST, json!({ "message": "Invalid id" })));

        let (status, body) = call(&h, Method::GET, "/api/products?sort=cheapest", None, None).await;
        assert_eq!((status, body), (StatusCode::BAD_REQUEST, json!({ "message": "Invalid query parameters" })));
    }

    #[tokio::test]
    async fn test_provider_errors_are_generic_500() {
        let h = harness();
        let buyer = h.user("b@x.rw", Role::User).await;
        let token = h.token_for(&buyer).await;
        let product = h.product("Router", 100, 2, "network").await;
        let (_, created) = call(
            &h,
            Method::POST,
            "/api/orders",
            Some(&token),
            Some(json!({ "items": [{ "productId": product.id, "quantity": 1, "price": 100 }], "totalAmount": 100 })),
        )
        .await;

        h.gateway.fail_initiation(crate::payments::PaymentError::Rejected { status: 500, body: "secret upstream detail".into() });
        let pay = json!({ "orderId": created["order_id"], "phoneNumber": "0788123456", "amount": 100 });
        let (status, body) = call(&h, Method::POST, "/api/payments/momo", Some(&token), Some(pay)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "message": "Payment initiation failed" }));
    }
}
