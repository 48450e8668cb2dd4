//! Shared fixtures for the Cartkeeper integration tests.
//!
//! Tests drive the real router in-process with `tower::ServiceExt::oneshot`.
//! Those that need `PostgreSQL` read `CARTKEEPER_TEST_DATABASE_URL`, apply the
//! migrations and are marked `#[ignore]`:
//!
//! ```bash
//! CARTKEEPER_TEST_DATABASE_URL=postgres://localhost/cartkeeper_test \
//!     cargo test -p cartkeeper-integration-tests -- --include-ignored
//! ```
//!
//! Every test creates its own products, user ids and session tokens, so tests
//! can share one database and run in parallel.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use cartkeeper_server::config::{CartPolicy, ServerConfig};
use cartkeeper_server::middleware::{MAINTENANCE_TOKEN_HEADER, SESSION_TOKEN_HEADER, USER_ID_HEADER};
use cartkeeper_server::services::AuditLog;
use cartkeeper_server::state::AppState;

/// Maintenance token configured by [`config`].
pub const MAINTENANCE_TOKEN: &str = "kQ7vR2xN9mT4wB8zL3pH6sJ1";

const TEST_DATABASE_URL_VAR: &str = "CARTKEEPER_TEST_DATABASE_URL";

/// Server configuration for tests, with sweeping disabled.
#[must_use]
pub fn config(database_url: &str) -> ServerConfig {
    ServerConfig {
        database_url: SecretString::from(database_url.to_string()),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        policy: CartPolicy {
            sweep_interval: None,
            ..CartPolicy::default()
        },
        maintenance_token: Some(SecretString::from(MAINTENANCE_TOKEN.to_string())),
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 0.0,
        sentry_traces_sample_rate: 0.0,
    }
}

/// Build the router around `pool`, with a running audit writer.
#[must_use]
pub fn app_with(config: ServerConfig, pool: PgPool) -> Router {
    let (audit, _writer) = AuditLog::spawn(pool.clone(), config.policy.audit_queue_capacity);
    cartkeeper_server::app(AppState::new(config, pool, audit))
}

/// A router whose pool never connects.
///
/// Only usable for requests rejected before any query runs.
#[must_use]
pub fn offline_app() -> Router {
    offline_app_with(config("postgres://cartkeeper@127.0.0.1:1/unused"))
}

/// [`offline_app`] with a custom configuration.
#[must_use]
pub fn offline_app_with(config: ServerConfig) -> Router {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://cartkeeper@127.0.0.1:1/unused")
        .unwrap();
    app_with(config, pool)
}

/// A migrated database and a router on top of it.
pub struct TestDb {
    pub pool: PgPool,
    pub app: Router,
}

impl TestDb {
    /// Connect to `CARTKEEPER_TEST_DATABASE_URL` and apply migrations.
    pub async fn connect() -> Self {
        let url = std::env::var(TEST_DATABASE_URL_VAR)
            .unwrap_or_else(|_| panic!("{TEST_DATABASE_URL_VAR} must be set"));
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("Failed to connect to test database");
        sqlx::migrate!("../server/migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        let app = app_with(config(&url), pool.clone());
        Self { pool, app }
    }

    /// Insert `count` active products priced at `price`, returning their ids.
    pub async fn seed_products(&self, count: i32, price: Decimal) -> Vec<i32> {
        sqlx::query_scalar::<_, i32>(
            "INSERT INTO catalog.product (price) \
             SELECT $1 FROM generate_series(1, $2) \
             RETURNING id",
        )
        .bind(price)
        .bind(count)
        .fetch_all(&self.pool)
        .await
        .unwrap()
    }

    /// Send `request`, returning the status and the JSON body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        send(&self.app, request).await
    }
}

/// Send `request` to `app`, returning the status and the JSON body.
///
/// Non-JSON bodies come back as a JSON string.
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

/// Who a test request is sent as.
#[derive(Debug, Clone, Default)]
pub struct As {
    pub user_id: Option<i32>,
    pub session_token: Option<String>,
}

impl As {
    /// A fresh anonymous shopper.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            session_token: Some(session_token()),
        }
    }

    /// A fresh signed-in shopper.
    #[must_use]
    pub fn user() -> Self {
        Self {
            user_id: Some(user_id()),
            session_token: None,
        }
    }

    /// Build a request carrying this identity, with an optional JSON body.
    #[must_use]
    pub fn request(&self, method: Method, uri: &str, body: Option<&Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = self.user_id {
            builder = builder.header(USER_ID_HEADER, user_id.to_string());
        }
        if let Some(token) = &self.session_token {
            builder = builder.header(SESSION_TOKEN_HEADER, token.as_str());
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }
}

/// A maintenance request authenticated with [`MAINTENANCE_TOKEN`].
#[must_use]
pub fn maintenance_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(MAINTENANCE_TOKEN_HEADER, MAINTENANCE_TOKEN)
        .body(Body::empty())
        .unwrap()
}

/// A session token no other test uses.
#[must_use]
pub fn session_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A user id no other test is likely to use.
#[must_use]
pub fn user_id() -> i32 {
    let n = uuid::Uuid::new_v4().as_u128() % 2_000_000_000;
    i32::try_from(n).unwrap() + 1
}

/// Read a decimal field serialized as a string.
#[must_use]
pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .unwrap_or_else(|| panic!("expected a decimal string, got {value}"))
        .parse()
        .unwrap()
}
