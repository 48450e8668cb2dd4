//! Line item quantities.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when validating a [`Quantity`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    /// The value is outside `1..=999`.
    #[error("quantity must be between {min} and {max}")]
    OutOfRange {
        /// Smallest accepted quantity.
        min: i32,
        /// Largest accepted quantity.
        max: i32,
    },
}

/// Quantity of a single line, always within `1..=999`.
///
/// ```
/// use cartkeeper_core::Quantity;
///
/// assert!(Quantity::parse(0).is_err());
/// assert_eq!(Quantity::clamped(5000).get(), 999);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i32")]
pub struct Quantity(i32);

impl Quantity {
    /// Smallest quantity a line can hold.
    pub const MIN: Self = Self(1);
    /// Largest quantity a line can hold.
    pub const MAX: Self = Self(999);

    /// Validate a caller-supplied quantity.
    ///
    /// # Errors
    ///
    /// Returns [`QuantityError::OutOfRange`] outside `1..=999`.
    pub fn parse(value: i64) -> Result<Self, QuantityError> {
        if value < i64::from(Self::MIN.0) || value > i64::from(Self::MAX.0) {
            return Err(QuantityError::OutOfRange {
                min: Self::MIN.0,
                max: Self::MAX.0,
            });
        }
        // In range, so the narrowing cannot fail.
        i32::try_from(value).map(Self).map_err(|_| QuantityError::OutOfRange {
            min: Self::MIN.0,
            max: Self::MAX.0,
        })
    }

    /// Clamp any integer into `1..=999`.
    #[must_use]
    pub fn clamped(value: i64) -> Self {
        let bounded = value.clamp(i64::from(Self::MIN.0), i64::from(Self::MAX.0));
        Self(i32::try_from(bounded).unwrap_or(Self::MAX.0))
    }

    /// Get the underlying value.
    #[must_use]
    pub const fn get(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Quantity {
    type Error = QuantityError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Quantity> for i32 {
    fn from(q: Quantity) -> Self {
        q.0
    }
}
