//! Value Objects for the storefront

use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in whole currency units (the store trades in RWF, which has no
/// minor unit).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn new(amount: i64) -> Result<Self, MoneyError> {
        if amount < 0 { return Err(MoneyError::Negative); }
        Ok(Self(amount))
    }
    pub fn amount(&self) -> i64 { self.0 }
    pub fn add(&self, other: Money) -> Result<Money, MoneyError> {
        self.0.checked_add(other.0).map(Money).ok_or(MoneyError::Overflow)
    }
    pub fn multiply(&self, qty: i32) -> Result<Money, MoneyError> {
        if qty < 0 { return Err(MoneyError::Negative); }
        self.0.checked_mul(i64::from(qty)).map(Money).ok_or(MoneyError::Overflow)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum MoneyError { Negative, Overflow }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Negative => write!(f, "Amount must not be negative"), Self::Overflow => write!(f, "Amount overflow") }
    }
}

/// Mobile-money subscriber number in international format, digits only.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Msisdn(String);

impl Msisdn {
    /// Normalizes a customer-entered number. A leading local-format `0` is
    /// replaced by `country_code`; spaces, dashes and a leading `+` are dropped.
    pub fn normalize(raw: &str, country_code: &str) -> Result<Self, MsisdnError> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
        let compact = compact.strip_prefix('+').unwrap_or(&compact);
        if compact.is_empty() { return Err(MsisdnError::Empty); }
        let number = match compact.strip_prefix('0') {
            Some(local) => format!("{country_code}{local}"),
            None => compact.to_string(),
        };
        if !number.chars().all(|c| c.is_ascii_digit()) { return Err(MsisdnError::NotNumeric); }
        if !(9..=15).contains(&number.len()) { return Err(MsisdnError::BadLength); }
        Ok(Self(number))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum MsisdnError { Empty, NotNumeric, BadLength }
impl std::error::Error for MsisdnError {}
impl fmt::Display for MsisdnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Phone number is required"),
            Self::NotNumeric => write!(f, "Phone number must contain digits only"),
            Self::BadLength => write!(f, "Phone number has an invalid length"),
        }
    }
}
