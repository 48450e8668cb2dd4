//! Request correlation IDs.
//!
//! Every request carries an ID: the gateway's `x-request-id` when it sent a
//! usable one, else a fresh UUID v4. The ID is recorded on the tracing span,
//! tagged on the Sentry scope, handed to extractors as a [`RequestId`]
//! extension (and from there onto each audit entry) and echoed back.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Span;
use uuid::Uuid;

/// The HTTP header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest upstream ID kept; longer ones are replaced.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation ID of the current request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// Reuse a well-formed upstream ID or generate a new one.
    #[must_use]
    pub fn from_upstream(header: Option<&HeaderValue>) -> Self {
        header
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
            .map_or_else(|| Self(Uuid::new_v4().to_string()), |id| Self(id.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Middleware that ensures every request has a request ID.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::from_upstream(request.headers().get(REQUEST_ID_HEADER));

    Span::current().record("request_id", request_id.as_str());
    sentry::configure_scope(|scope| {
        scope.set_tag("request_id", request_id.as_str());
    });

    let echoed = HeaderValue::from_str(request_id.as_str()).ok();
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;
    if let Some(value) = echoed {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_id_is_kept() {
        let header = HeaderValue::from_static(" req-123 ");
        assert_eq!(RequestId::from_upstream(Some(&header)).as_str(), "req-123");
    }

    #[test]
    fn test_missing_or_oversized_id_is_replaced() {
        let generated = RequestId::from_upstream(None);
        assert!(Uuid::parse_str(generated.as_str()).is_ok());

        let long = HeaderValue::from_str(&"r".repeat(MAX_REQUEST_ID_LEN + 1)).unwrap();
        let replaced = RequestId::from_upstream(Some(&long));
        assert!(Uuid::parse_str(replaced.as_str()).is_ok());

        let blank = HeaderValue::from_static("");
        assert!(Uuid::parse_str(RequestId::from_upstream(Some(&blank)).as_str()).is_ok());
    }
}
