//! Use cases behind the HTTP handlers and the background workers.

pub mod accounts;
pub mod admin;
pub mod orders;
pub mod payments;
