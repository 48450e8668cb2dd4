//! Monetary amounts and percentages using decimal arithmetic.
//!
//! All cart money is `rust_decimal::Decimal` in the currency's standard unit
//! (dollars, not cents). Rounding is half-up to the currency's minor unit.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::CurrencyCode;

/// Errors that can occur when validating an [`Amount`] or [`Percent`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Amount below zero.
    #[error("amount cannot be negative")]
    Negative,
    /// Percentage outside `0..=100`.
    #[error("percentage must be between 0 and 100")]
    PercentOutOfRange,
    /// Amount above [`Amount::MAX`].
    #[error("amount cannot exceed 9999999999.99")]
    TooLarge,
}

/// Round half-up (away from zero) to the currency's minor unit.
#[must_use]
pub fn round_money(value: Decimal, currency: CurrencyCode) -> Decimal {
    value.round_dp_with_strategy(currency.minor_units(), RoundingStrategy::MidpointAwayFromZero)
}

fn round_2dp(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// A non-negative monetary amount rounded to two decimals.
///
/// Used for unit prices and fixed discounts supplied by callers. Bounded by
/// the widest price column, `NUMERIC(12, 2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Largest accepted amount, `9999999999.99`.
    pub const MAX: Self = Self(Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2));

    /// Validate and round an amount.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::Negative`] for values below zero and
    /// [`MoneyError::TooLarge`] when the rounded value exceeds [`Amount::MAX`].
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative);
        }
        let rounded = round_2dp(value);
        if rounded > Self::MAX.0 {
            return Err(MoneyError::TooLarge);
        }
        Ok(Self(rounded))
    }

    /// Get the underlying decimal.
    #[must_use]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    /// Whether the amount is strictly positive.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// A percentage in `0..=100`, rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Percent(Decimal);

impl Percent {
    /// Zero percent.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Validate and round a percentage.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::PercentOutOfRange`] outside `0..=100`.
    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(MoneyError::PercentOutOfRange);
        }
        Ok(Self(round_2dp(value)))
    }

    /// Get the underlying decimal (e.g. `8.25` for 8.25%).
    #[must_use]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    /// Apply the percentage to `base` without rounding.
    #[must_use]
    pub fn of(&self, base: Decimal) -> Decimal {
        base * self.0 / Decimal::ONE_HUNDRED
    }
}

impl TryFrom<Decimal> for Percent {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Percent> for Decimal {
    fn from(pct: Percent) -> Self {
        pct.0
    }
}
