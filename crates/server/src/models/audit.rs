//! Audit log domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use cartkeeper_core::{AuditAction, AuditEntryId, CallerIdentity, CartId, UserId};

/// Network details of the request that caused a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientMeta {
    /// Client IP address as reported by the proxy chain.
    pub ip: Option<String>,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// Correlation ID assigned by the request-id middleware.
    pub request_id: Option<String>,
}

/// Everything known about who made a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    /// Identity asserted by the authentication layer.
    pub identity: CallerIdentity,
    /// Network details for the audit trail.
    pub client: ClientMeta,
}

impl Caller {
    /// Audit entry for `action` on `cart_id` attributed to this caller.
    #[must_use]
    pub fn audit(&self, cart_id: CartId, action: AuditAction) -> NewAuditEntry {
        NewAuditEntry::new(cart_id, action, &self.identity, &self.client)
    }
}

/// An audit entry waiting to be written.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    /// Cart the action applied to.
    pub cart_id: Option<CartId>,
    /// What happened.
    pub action: AuditAction,
    /// Action-specific payload.
    pub detail: Option<serde_json::Value>,
    /// Who did it.
    pub actor: CallerIdentity,
    /// From where.
    pub client: ClientMeta,
}

impl NewAuditEntry {
    /// Entry for `action` on `cart_id` with no detail.
    #[must_use]
    pub fn new(cart_id: CartId, action: AuditAction, actor: &CallerIdentity, client: &ClientMeta) -> Self {
        Self {
            cart_id: Some(cart_id),
            action,
            detail: None,
            actor: actor.clone(),
            client: client.clone(),
        }
    }

    /// Attach a detail payload.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Entry recorded by the system itself (sweeper, maintenance).
    #[must_use]
    pub const fn system(cart_id: CartId, action: AuditAction, detail: serde_json::Value) -> Self {
        Self {
            cart_id: Some(cart_id),
            action,
            detail: Some(detail),
            actor: CallerIdentity {
                user_id: None,
                session_token: None,
            },
            client: ClientMeta {
                ip: None,
                user_agent: None,
                request_id: None,
            },
        }
    }
}

/// A persisted audit entry (domain type).
///
/// The session token is kept as stored; it is only exposed through the
/// maintenance export.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub cart_id: Option<CartId>,
    pub action: AuditAction,
    pub detail: Option<serde_json::Value>,
    pub user_id: Option<UserId>,
    pub session_token: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
