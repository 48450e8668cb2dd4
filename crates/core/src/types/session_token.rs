//! Anonymous session token type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`SessionToken`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionTokenError {
    /// The input string is empty.
    #[error("session token cannot be empty")]
    Empty,
    /// The input has the wrong length.
    #[error("session token must be between {min} and {max} characters")]
    BadLength {
        /// Minimum allowed length.
        min: usize,
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains a character outside `[A-Za-z0-9_-]`.
    #[error("session token may only contain letters, digits, '_' and '-'")]
    InvalidCharacter,
}

/// Opaque token identifying an anonymous shopper.
///
/// Issued by the authentication layer; the cart engine only validates its
/// shape and compares it for equality.
///
/// ## Constraints
///
/// - Length: 16-64 characters
/// - Alphabet: ASCII letters, digits, `_` and `-`
///
/// ## Examples
///
/// ```
/// use cartkeeper_core::SessionToken;
///
/// assert!(SessionToken::parse("anon_0123456789abcdef").is_ok());
/// assert!(SessionToken::parse("short").is_err());
/// assert!(SessionToken::parse("has spaces in it, sorry").is_err());
/// ```
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    /// Minimum token length.
    pub const MIN_LENGTH: usize = 16;
    /// Maximum token length.
    pub const MAX_LENGTH: usize = 64;

    /// Parse a `SessionToken`, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed input is empty, has a length outside
    /// 16-64, or contains characters outside `[A-Za-z0-9_-]`.
    pub fn parse(s: &str) -> Result<Self, SessionTokenError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SessionTokenError::Empty);
        }

        if s.len() < Self::MIN_LENGTH || s.len() > Self::MAX_LENGTH {
            return Err(SessionTokenError::BadLength {
                min: Self::MIN_LENGTH,
                max: Self::MAX_LENGTH,
            });
        }

        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(SessionTokenError::InvalidCharacter);
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the token and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

// Tokens are bearer credentials; keep them out of logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.0.get(..4).unwrap_or("");
        write!(f, "SessionToken({prefix}…)")
    }
}

impl std::str::FromStr for SessionToken {
    type Err = SessionTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionToken {
    type Error = SessionTokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self {
        token.0
    }
}

impl AsRef<str> for SessionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// SQLx support (with postgres feature)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for SessionToken {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for SessionToken {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for SessionToken {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
