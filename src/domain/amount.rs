//! Transfer amount
//!
//! A strictly positive decimal, fixed at 8 fractional digits on the wire.
//! Construction is the only validation point; holding an `Amount` means the
//! value already passed every rule.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Largest amount a single transfer may move
const MAX_AMOUNT: i64 = 1_000_000_000_000;

/// Fractional digits kept on the wire and in storage
const MAX_SCALE: u32 = 8;

/// Validated amount of a transfer.
///
/// Serialized as a string with exactly 8 fractional digits, so `"100"` and
/// `"100.00"` produce the same events and the same request fingerprint.
///
/// ```
/// use transfer_service::domain::Amount;
///
/// let amount: Amount = "12.5".parse().unwrap();
/// assert_eq!(amount.to_string(), "12.50000000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        // "1.50000000000" is still 1.5
        let value = value.normalize();
        if value.scale() > MAX_SCALE {
            return Err(AmountError::TooManyDecimals(value.scale()));
        }
        if value > Decimal::from(MAX_AMOUNT) {
            return Err(AmountError::Overflow);
        }
        Ok(Self(value))
    }

    pub fn from_integer(value: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::from(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountError::ParseError("empty amount".to_string()));
        }
        Decimal::from_str(s)
            .map_err(|e| AmountError::ParseError(e.to_string()))
            .and_then(Amount::new)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}
