//! Transactional email bodies.

use chrono::{DateTime, Utc};

use crate::domain::aggregates::{Order, OrderStatus, User};

use super::OutboundEmail;

const STORE_NAME: &str = "MTN Store";

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn layout(preview: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{preview}</title></head>\
         <body style=\"font-family:sans-serif;background:#f6f9fc\">\
         <div style=\"max-width:560px;margin:0 auto;padding:20px;background:#fff\">{body}</div></body></html>"
    )
}

fn order_url(app_url: &str, order: &Order) -> String {
    format!("{}/orders/{}", app_url.trim_end_matches('/'), order.id)
}

pub fn status_message(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Processing => "Your order is being processed and will be shipped soon.",
        OrderStatus::Shipped => "Your order has been shipped and is on its way to you.",
        OrderStatus::Delivered => "Your order has been delivered. We hope you enjoy your purchase!",
        OrderStatus::Cancelled => "Your order has been cancelled. If you have any questions, please contact our customer service.",
        OrderStatus::Pending => "There has been an update to your order.",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn order_confirmation(order: &Order, customer: &User, app_url: &str) -> OutboundEmail {
    let rows: String = order
        .items
        .iter()
        .map(|i| format!("<tr><td>{}</td><td>{}</td><td>{} RWF</td></tr>", escape(&i.name), i.quantity, i.price))
        .collect();
    let body = format!(
        "<h1>Thank you for your order!</h1>\
         <p>Hi {name}, your payment was received and your order is being processed.</p>\
         <p>Order Number: #{number}<br>Order Date: {date}</p>\
         <table width=\"100%\"><tr><th align=\"left\">Item</th><th align=\"left\">Qty</th><th align=\"left\">Price</th></tr>{rows}</table>\
         <p><strong>Total: {total} RWF</strong></p>\
         <p><a href=\"{url}\">View your order</a></p>",
        name = escape(&customer.name),
        number = order.short_number(),
        date = order.created_at.format("%Y-%m-%d"),
        total = order.total_amount,
        url = order_url(app_url, order),
    );
    OutboundEmail {
        idempotency_key: format!("order-confirmation:{}", order.id),
        recipient: customer.email.clone(),
        subject: format!("Order Confirmation #{}", order.short_number()),
        html: layout(&format!("Your {STORE_NAME} order confirmation"), &body),
    }
}

/// Notice for a status change. `changed_from` is the `updated_at` of the
/// order the change was made against, so each change gets its own key while
/// duplicate submissions of the same change collapse.
pub fn order_status(order: &Order, changed_from: DateTime<Utc>, customer: &User, app_url: &str) -> OutboundEmail {
    let body = format!(
        "<h1>Order Status Update</h1><p>{message}</p>\
         <p>Order Number: #{number}<br>Status: {status}<br>Last Updated: {updated}</p>\
         <p><a href=\"{url}\">View your order</a></p>",
        message = status_message(order.order_status),
        number = order.short_number(),
        status = capitalize(order.order_status.as_str()),
        updated = order.updated_at.format("%Y-%m-%d"),
        url = order_url(app_url, order),
    );
    OutboundEmail {
        idempotency_key: format!("order-status:{}:{}:{}", order.id, order.order_status, changed_from.timestamp_micros()),
        recipient: customer.email.clone(),
        subject: format!("Order Status Update #{}", order.short_number()),
        html: layout(&format!("Your {STORE_NAME} order status update"), &body),
    }
}

pub fn welcome(user: &User, app_url: &str) -> OutboundEmail {
    let body = format!(
        "<h1>Welcome to {STORE_NAME}!</h1><p>Hi {name}, thanks for creating an account.</p>\
         <p><a href=\"{url}/auth/signin\">Sign in to start shopping</a></p>",
        name = escape(&user.name),
        url = app_url.trim_end_matches('/'),
    );
    OutboundEmail {
        idempotency_key: format!("welcome:{}", user.id),
        recipient: user.email.clone(),
        subject: format!("Welcome to {STORE_NAME}"),
        html: layout(&format!("Welcome to {STORE_NAME}"), &body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{LineItem, Role};
    use crate::domain::value_objects::Money;
    use uuid::Uuid;

    fn fixtures() -> (Order, User) {
        let user = User::register("Jean <b>", "jean@x.rw", "0788000001", "h".into(), Role::User);
        let item = LineItem { product_id: Uuid::now_v7(), name: "Router".into(), quantity: 2, price: Money::new(1200).unwrap() };
        (Order::place(user.id, vec![item], Money::new(2400).unwrap()), user)
    }

    #[test]
    fn test_confirmation() {
        let (order, user) = fixtures();
        let mail = order_confirmation(&order, &user, "https://shop.rw/");
        assert_eq!(mail.idempotency_key, format!("order-confirmation:{}", order.id));
        assert_eq!(mail.subject, format!("Order Confirmation #{}", order.short_number()));
        assert!(mail.html.contains(&format!("https://shop.rw/orders/{}", order.id)));
        assert!(mail.html.contains("Jean &lt;b&gt;"));
        assert!(mail.html.contains("2400 RWF"));
    }

    #[test]
    fn test_status_key_tracks_each_change() {
        let (mut order, user) = fixtures();
        let before = order.updated_at;
        order.set_order_status(OrderStatus::Shipped);
        let shipped = order_status(&order, before, &user, "https://shop.rw");
        assert!(shipped.html.contains("Status: Shipped"));
        assert!(shipped.html.contains("on its way"));
        assert_eq!(order_status(&order, before, &user, "https://shop.rw").idempotency_key, shipped.idempotency_key);

        let later = before + chrono::Duration::seconds(5);
        assert_ne!(order_status(&order, later, &user, "https://shop.rw").idempotency_key, shipped.idempotency_key);
        order.set_order_status(OrderStatus::Delivered);
        assert_ne!(order_status(&order, before, &user, "https://shop.rw").idempotency_key, shipped.idempotency_key);
    }

    #[test]
    fn test_welcome() {
        let (_, user) = fixtures();
        let mail = welcome(&user, "https://shop.rw");
        assert_eq!(mail.subject, "Welcome to MTN Store");
        assert!(mail.html.contains("https://shop.rw/auth/signin"));
    }
}
