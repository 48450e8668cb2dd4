//! ISO 4217 currency codes.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`CurrencyCode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CurrencyError {
    /// The code is not exactly three ASCII letters.
    #[error("currency must be a three-letter ISO 4217 code")]
    Malformed,
}

/// A three-letter currency code, stored upper-case.
///
/// Any well-formed code is accepted; the cart engine does not keep an
/// exchange table, it only needs the code's minor unit for rounding.
///
/// ```
/// use cartkeeper_core::CurrencyCode;
///
/// let usd = CurrencyCode::parse(" usd ").unwrap();
/// assert_eq!(usd.as_str(), "USD");
/// assert_eq!(usd.minor_units(), 2);
/// assert!(CurrencyCode::parse("US").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    /// US dollar, the default cart currency.
    pub const USD: Self = Self(*b"USD");

    /// Parse a currency code, trimming whitespace and upper-casing.
    ///
    /// # Errors
    ///
    /// Returns [`CurrencyError::Malformed`] unless the trimmed input is
    /// exactly three ASCII letters.
    pub fn parse(s: &str) -> Result<Self, CurrencyError> {
        let bytes = s.trim().as_bytes();
        let [a, b, c] = bytes else {
            return Err(CurrencyError::Malformed);
        };
        let code = [
            a.to_ascii_uppercase(),
            b.to_ascii_uppercase(),
            c.to_ascii_uppercase(),
        ];
        if code.iter().all(u8::is_ascii_uppercase) {
            Ok(Self(code))
        } else {
            Err(CurrencyError::Malformed)
        }
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII letters.
        core::str::from_utf8(&self.0).unwrap_or("XXX")
    }

    /// Number of decimal places in the currency's minor unit.
    #[must_use]
    pub fn minor_units(&self) -> u32 {
        match &self.0 {
            b"JPY" | b"KRW" | b"CLP" | b"ISK" | b"VND" | b"PYG" | b"UGX" => 0,
            b"BHD" | b"KWD" | b"OMR" | b"JOD" | b"TND" => 3,
            _ => 2,
        }
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self::USD
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.as_str().to_owned()
    }
}
