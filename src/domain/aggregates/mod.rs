//! Aggregates module
pub mod product;
pub mod order;
pub mod user;

pub use product::{Product, ProductDraft, ProductError};
pub use order::{price_order_lines, LineItem, Order, OrderError, OrderLineRequest, OrderStatus, PaymentOutcome, PaymentStatus, PaymentTransition};
pub use user::{normalize_email, CustomerContact, Role, User};
