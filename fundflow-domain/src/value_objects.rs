//! Value Objects for the Fundflow Domain
//!
//! Immutable, validated money primitives.
//! All value objects enforce invariants at construction time.
//!
//! Amounts are held as integer minor units (hundredths). Decimal strings only
//! exist at the boundary, in `Amount::parse` and `Display`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for value object validation and balance rules
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Amount is not a valid non-negative decimal with two fractional digits
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Currency is not a three-letter code
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    /// Money of one currency applied to an account of another
    #[error("Currency mismatch: expected {expected}, got {found}")]
    CurrencyMismatch {
        /// Currency of the account
        expected: Currency,
        /// Currency of the money being applied
        found: Currency,
    },

    /// Debit would take the balance below zero
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Balance before the debit
        available: Amount,
        /// Requested debit
        requested: Amount,
    },

    /// Arithmetic left the representable range
    #[error("Amount overflow")]
    AmountOverflow,

    /// Email address failed basic validation
    #[error("Invalid email: {0}")]
    InvalidEmail(String),
}

// =============================================================================
// Amount
// =============================================================================

/// Non-negative fixed-point amount with exactly two fractional digits.
///
/// # Invariants
/// - Stored as minor units (1.00 == 100)
/// - Never negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(i64);

impl Amount {
    /// Number of fractional digits carried by every amount
    pub const SCALE: u32 = 2;

    /// Zero amount
    pub const ZERO: Amount = Amount(0);

    /// Create an amount from minor units (hundredths)
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if `minor` is negative
    pub fn from_minor(minor: i64) -> Result<Self, DomainError> {
        if minor < 0 {
            return Err(DomainError::InvalidAmount("Amount must not be negative".to_string()));
        }
        Ok(Self(minor))
    }

    /// Parse a decimal string such as `"250.00"` or `"12.5"`.
    ///
    /// Trailing zeros beyond the second fractional digit are tolerated
    /// (`"1.500"` is `1.50`); any other third digit is rejected.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` for non-numeric, negative or
    /// over-precise input
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidAmount("Amount is required".to_string()));
        }

        let value = Decimal::from_str(trimmed)
            .map_err(|_| DomainError::InvalidAmount(format!("Not a decimal number: {}", trimmed)))?;

        Self::from_decimal(value)
    }

    /// Parse an amount that must be strictly positive.
    ///
    /// # Errors
    /// Same as [`Amount::parse`], plus `InvalidAmount` for zero
    pub fn parse_positive(input: &str) -> Result<Self, DomainError> {
        let amount = Self::parse(input)?;
        if amount.is_zero() {
            return Err(DomainError::InvalidAmount("Amount must be positive".to_string()));
        }
        Ok(amount)
    }

    /// Convert from a `Decimal` (e.g. a NUMERIC(18,2) column)
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if negative or more precise than
    /// two fractional digits, `AmountOverflow` if out of range
    pub fn from_decimal(value: Decimal) -> Result<Self, DomainError> {
        let value = value.normalize();
        if value < Decimal::ZERO {
            return Err(DomainError::InvalidAmount("Amount must not be negative".to_string()));
        }
        if value.scale() > Self::SCALE {
            return Err(DomainError::InvalidAmount(format!(
                "At most {} fractional digits allowed: {}",
                Self::SCALE,
                value
            )));
        }

        let minor = value
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|v| v.to_i64())
            .ok_or(DomainError::AmountOverflow)?;
        Ok(Self(minor))
    }

    /// Get the amount in minor units
    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// Get the amount as a `Decimal` with scale 2
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, Self::SCALE)
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Add two amounts
    pub fn checked_add(self, other: Amount) -> Result<Amount, DomainError> {
        self.0.checked_add(other.0).map(Amount).ok_or(DomainError::AmountOverflow)
    }

    /// Subtract `other`, returning `None` if the result would be negative
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        if other.0 > self.0 {
            return None;
        }
        Some(Amount(self.0 - other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Amount {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Amount {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

// =============================================================================
// Currency
// =============================================================================

/// ISO-4217 style currency code (e.g., INR)
///
/// # Invariants
/// - Exactly three ASCII letters, stored upper-case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Create a currency from a code, normalizing to upper case
    ///
    /// # Examples
    /// ```
    /// # use fundflow_domain::value_objects::Currency;
    /// let inr = Currency::new("inr").unwrap();
    /// assert_eq!(inr.code(), "INR");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidCurrency` unless the code is three letters
    pub fn new(code: &str) -> Result<Self, DomainError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidCurrency(format!(
                "Expected a three-letter code, got '{}'",
                code
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Indian rupee, the default ledger currency
    pub fn inr() -> Self {
        Self("INR".to_string())
    }

    /// Get the currency code
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

// =============================================================================
// Money
// =============================================================================

/// Exact amount in a single currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's minor units
    pub amount: Amount,
    /// Currency of the amount
    pub currency: Currency,
}

impl Money {
    /// Create a new Money value
    pub fn new(amount: Amount, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Parse amount and currency strings from a request
    pub fn parse(amount: &str, currency: &str) -> Result<Self, DomainError> {
        Ok(Self::new(Amount::parse(amount)?, Currency::new(currency)?))
    }

    /// Check currency compatibility
    pub fn same_currency(&self, other: &Currency) -> bool {
        &self.currency == other
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

// =============================================================================
// Tests
// =============================================================================
