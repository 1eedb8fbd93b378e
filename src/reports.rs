//! Admin report shapes and the aggregation rules behind them.
//!
//! Reports are computed per request. Only orders with a completed payment
//! count toward revenue, units sold and customer spend.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{CustomerContact, Order, PaymentStatus, Product, Role, User};

const TOP_PRODUCTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange { pub start: DateTime<Utc>, pub end: DateTime<Utc> }

impl DateRange {
    /// `7days` (the default), `30days`, `90days` or `year` (since 1 January).
    pub fn preset(name: Option<&str>, now: DateTime<Utc>) -> Self {
        let start = match name.unwrap_or("7days") {
            "30days" => now - Duration::days(30),
            "90days" => now - Duration::days(90),
            "year" => Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).single().unwrap_or(now),
            _ => now - Duration::days(7),
        };
        Self { start, end: now }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool { at >= self.start && at <= self.end }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries<T> { pub labels: Vec<String>, pub data: Vec<T> }

impl<T> ChartSeries<T> {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, T)>) -> Self {
        let (labels, data) = pairs.into_iter().unzip();
        Self { labels, data }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminOrderView {
    #[serde(flatten)]
    pub order: Order,
    pub customer: Option<CustomerContact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_orders: i64,
    pub total_revenue: i64,
    pub total_customers: i64,
    pub total_products: i64,
    pub recent_orders: Vec<AdminOrderView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerStats {
    pub total_customers: i64,
    pub new_customers: i64,
    pub returning_customers: i64,
    pub average_order_value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analytics {
    pub sales_over_time: ChartSeries<i64>,
    pub top_products: ChartSeries<i64>,
    pub orders_by_status: ChartSeries<i64>,
    pub revenue_by_category: ChartSeries<i64>,
    pub customer_stats: CustomerStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerSummary {
    #[serde(flatten)]
    pub user: User,
    pub orders_count: i64,
    pub total_spent: i64,
}

pub fn average_order_value(revenue: i64, orders: i64) -> i64 {
    if orders == 0 { return 0; }
    (revenue as f64 / orders as f64).round() as i64
}

fn paid(order: &Order) -> bool { order.payment_status == PaymentStatus::Completed }

/// Sums amounts, pinning at `i64::MAX` instead of overflowing.
fn saturating_total(amounts: impl IntoIterator<Item = i64>) -> i64 { amounts.into_iter().fold(0, i64::saturating_add) }

/// Analytics over in-memory collections; mirrors the SQL in `PgStore`.
pub fn compute_analytics(orders: &[Order], users: &[User], products: &HashMap<Uuid, Product>, range: &DateRange) -> Analytics {
    let in_range: Vec<&Order> = orders.iter().filter(|o| range.contains(o.created_at)).collect();
    let paid_in_range: Vec<&Order> = in_range.iter().copied().filter(|o| paid(o)).collect();

    let mut sales: BTreeMap<String, i64> = BTreeMap::new();
    for o in &paid_in_range {
        let day = sales.entry(o.created_at.format("%Y-%m-%d").to_string()).or_default();
        *day = day.saturating_add(o.total_amount.amount());
    }

    let mut units: HashMap<Uuid, i64> = HashMap::new();
    let mut by_category: HashMap<String, i64> = HashMap::new();
    for item in paid_in_range.iter().flat_map(|o| o.items.iter()) {
        let Some(product) = products.get(&item.product_id) else { continue };
        *units.entry(product.id).or_default() += i64::from(item.quantity);
        let revenue = item.price.amount().saturating_mul(i64::from(item.quantity));
        let category = by_category.entry(product.category.clone()).or_default();
        *category = category.saturating_add(revenue);
    }
    let mut top: Vec<(String, i64)> = units.into_iter().map(|(id, sold)| (products[&id].name.clone(), sold)).collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(TOP_PRODUCTS);

    let mut categories: Vec<(String, i64)> = by_category.into_iter().collect();
    categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut statuses: BTreeMap<String, i64> = BTreeMap::new();
    for o in &in_range {
        *statuses.entry(o.order_status.to_string()).or_default() += 1;
    }

    let customers: Vec<&User> = users.iter().filter(|u| u.role == Role::User).collect();
    let revenue = saturating_total(paid_in_range.iter().map(|o| o.total_amount.amount()));
    let buyers: HashSet<Uuid> = paid_in_range.iter().map(|o| o.user_id).collect();

    Analytics {
        sales_over_time: ChartSeries::from_pairs(sales),
        top_products: ChartSeries::from_pairs(top),
        orders_by_status: ChartSeries::from_pairs(statuses),
        revenue_by_category: ChartSeries::from_pairs(categories),
        customer_stats: CustomerStats {
            total_customers: customers.len() as i64,
            new_customers: customers.iter().filter(|u| range.contains(u.created_at)).count() as i64,
            returning_customers: buyers.len() as i64,
            average_order_value: average_order_value(revenue, paid_in_range.len() as i64),
        },
    }
}

/// Order count and completed spend per customer.
pub fn customer_summary(user: &User, orders: &[Order]) -> CustomerSummary {
    let mine: Vec<&Order> = orders.iter().filter(|o| o.user_id == user.id).collect();
    CustomerSummary {
        user: user.clone(),
        orders_count: mine.len() as i64,
        total_spent: saturating_total(mine.iter().filter(|o| paid(o)).map(|o| o.total_amount.amount())),
    }
}
