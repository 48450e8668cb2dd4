//! Cart ownership and caller identity.

use serde::{Deserialize, Serialize};

use super::{SessionToken, UserId};

/// Who a cart belongs to.
///
/// Outside of a merge a cart is owned by exactly one identity. `Migrating`
/// only exists while an anonymous cart is being handed to a user inside a
/// merge transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CartOwner {
    /// Authenticated shopper.
    User {
        /// Owning user.
        user_id: UserId,
    },
    /// Anonymous shopper identified by a session token.
    Anonymous {
        /// Owning session.
        session_token: SessionToken,
    },
    /// Mid-merge: both identities are bound.
    Migrating {
        /// Destination user.
        user_id: UserId,
        /// Source session.
        session_token: SessionToken,
    },
}

impl CartOwner {
    /// Rebuild an owner from the nullable column pair a cart row stores.
    ///
    /// Returns `None` when neither column is set.
    #[must_use]
    pub fn from_columns(user_id: Option<UserId>, session_token: Option<SessionToken>) -> Option<Self> {
        match (user_id, session_token) {
            (Some(user_id), None) => Some(Self::User { user_id }),
            (None, Some(session_token)) => Some(Self::Anonymous { session_token }),
            (Some(user_id), Some(session_token)) => Some(Self::Migrating {
                user_id,
                session_token,
            }),
            (None, None) => None,
        }
    }

    /// The user column value.
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User { user_id } | Self::Migrating { user_id, .. } => Some(*user_id),
            Self::Anonymous { .. } => None,
        }
    }

    /// The session token column value.
    #[must_use]
    pub const fn session_token(&self) -> Option<&SessionToken> {
        match self {
            Self::Anonymous { session_token } | Self::Migrating { session_token, .. } => {
                Some(session_token)
            }
            Self::User { .. } => None,
        }
    }

    /// Ownership check.
    ///
    /// A caller owns the cart if it presents the owning user id or the
    /// owning token. A caller presenting neither never owns anything.
    #[must_use]
    pub fn is_owned_by(&self, caller: &CallerIdentity) -> bool {
        if caller.is_empty() {
            return false;
        }
        let user_matches = matches!(
            (self.user_id(), caller.user_id),
            (Some(owner), Some(presented)) if owner == presented
        );
        let token_matches = matches!(
            (self.session_token(), caller.session_token.as_ref()),
            (Some(owner), Some(presented)) if owner == presented
        );
        user_matches || token_matches
    }
}

/// Identity asserted by the authentication layer for one request.
///
/// Either half may be absent. When both are present the user id is the
/// trusted one for lookups and new carts; the token only matters for
/// finding the caller's pre-login anonymous cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Authenticated user, if any.
    pub user_id: Option<UserId>,
    /// Anonymous session token, if any.
    pub session_token: Option<SessionToken>,
}

impl CallerIdentity {
    /// Whether the caller asserted no identity at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.session_token.is_none()
    }

    /// Owner a newly created cart gets: the user when known, else the token.
    #[must_use]
    pub fn preferred_owner(&self) -> Option<CartOwner> {
        match (self.user_id, &self.session_token) {
            (Some(user_id), _) => Some(CartOwner::User { user_id }),
            (None, Some(token)) => Some(CartOwner::Anonymous {
                session_token: token.clone(),
            }),
            (None, None) => None,
        }
    }
}
