//! HTTP middleware and extractors.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request span)
//! 3. Request ID (recorded on the span, Sentry scope, audit trail and response)
//!
//! Caller identity and the maintenance guard are extractors, applied per
//! handler.

pub mod identity;
pub mod maintenance;
pub mod request_id;

pub use identity::{RequestCaller, SESSION_TOKEN_HEADER, USER_ID_HEADER};
pub use maintenance::{MAINTENANCE_TOKEN_HEADER, MaintenanceAccess};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
