//! User Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub role: Role,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role { #[default] User, Admin }

impl Role {
    pub fn as_str(&self) -> &'static str { match self { Self::User => "user", Self::Admin => "admin" } }
}

impl FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "user" => Ok(Self::User), "admin" => Ok(Self::Admin), other => Err(format!("unknown role {other}")) }
    }
}

impl User {
    pub fn register(name: impl Into<String>, email: &str, phone_number: impl Into<String>, password_hash: String, role: Role) -> Self {
        Self {
            id: Uuid::now_v7(), name: name.into(), email: normalize_email(email), phone_number: phone_number.into(),
            role, password_hash, created_at: Utc::now(),
        }
    }

    pub fn is_admin(&self) -> bool { self.role == Role::Admin }

    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        [&self.name, &self.email, &self.phone_number].iter().any(|f| f.to_lowercase().contains(&needle))
    }
}

/// Emails are unique case-insensitively.
pub fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }

/// Contact details shown next to orders in the admin console.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact { pub name: String, pub email: String, pub phone_number: String }

impl From<&User> for CustomerContact {
    fn from(u: &User) -> Self { Self { name: u.name.clone(), email: u.email.clone(), phone_number: u.phone_number.clone() } }
}
