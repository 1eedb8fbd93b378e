//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub stock: i32,
    pub category: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable product fields, as submitted by the admin console.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ProductDraft {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[validate(range(min = 0))]
    pub price: i64,
    #[validate(range(min = 0))]
    pub stock: i32,
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(length(min = 1))]
    pub image: String,
}

impl ProductDraft {
    pub fn check(&self) -> Result<Money, ProductError> {
        self.validate().map_err(|_| ProductError::MissingFields)?;
        Money::new(self.price).map_err(|_| ProductError::MissingFields)
    }
}

impl Product {
    pub fn create(draft: ProductDraft) -> Result<Self, ProductError> {
        let price = draft.check()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), name: draft.name.trim().to_string(), description: draft.description,
            price, stock: draft.stock, category: draft.category.trim().to_string(), image: draft.image,
            created_at: now, updated_at: now,
        })
    }

    /// Replaces every editable field.
    pub fn apply(&mut self, draft: ProductDraft) -> Result<(), ProductError> {
        self.price = draft.check()?;
        self.name = draft.name.trim().to_string();
        self.description = draft.description;
        self.stock = draft.stock;
        self.category = draft.category.trim().to_string();
        self.image = draft.image;
        self.touch();
        Ok(())
    }

    pub fn has_stock(&self, qty: i32) -> bool { qty <= self.stock }

    pub fn remove_stock(&mut self, qty: i32) -> Result<(), ProductError> {
        if !self.has_stock(qty) { return Err(ProductError::InsufficientStock); }
        self.stock -= qty;
        self.touch();
        Ok(())
    }

    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.name.to_lowercase().contains(&needle) || self.description.to_lowercase().contains(&needle)
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { MissingFields, InsufficientStock }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::MissingFields => write!(f, "All fields are required"), Self::InsufficientStock => write!(f, "Insufficient stock") }
    }
}
