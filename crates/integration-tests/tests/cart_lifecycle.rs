//! End-to-end cart lifecycle against `PostgreSQL`.
//!
//! Run with `CARTKEEPER_TEST_DATABASE_URL` set and `--include-ignored`.

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use serde_json::{Value, json};

use cartkeeper_integration_tests::{As, TestDb, decimal, maintenance_request, send, session_token};

async fn create_cart(db: &TestDb, caller: &As) -> i64 {
    let (status, body) = db.send(caller.request(Method::POST, "/carts", None)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["cart"]["id"].as_i64().unwrap()
}

async fn create_cart_with(db: &TestDb, caller: &As, settings: &Value) -> Value {
    let (status, body) = db
        .send(caller.request(Method::POST, "/carts", Some(settings)))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["cart"].clone()
}

async fn add_line(db: &TestDb, caller: &As, cart: i64, product: i32, quantity: i64) -> Value {
    let (status, body) = db
        .send(caller.request(
            Method::POST,
            &format!("/carts/{cart}/lines"),
            Some(&json!({ "product_id": product, "quantity": quantity })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

async fn backdate(db: &TestDb, cart: i64, days: i32) {
    sqlx::query("UPDATE cart.cart SET updated_at = NOW() - make_interval(days => $2) WHERE id = $1")
        .bind(i32::try_from(cart).unwrap())
        .bind(days)
        .execute(&db.pool)
        .await
        .unwrap();
}

async fn status_of(db: &TestDb, cart: i64) -> String {
    sqlx::query_scalar("SELECT status FROM cart.cart WHERE id = $1")
        .bind(i32::try_from(cart).unwrap())
        .fetch_one(&db.pool)
        .await
        .unwrap()
}

async fn expirations(db: &TestDb, cart: i64) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM cart.audit_log WHERE cart_id = $1 AND action = 'expire'",
    )
    .bind(i32::try_from(cart).unwrap())
    .fetch_one(&db.pool)
    .await
    .unwrap()
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_simple_mode_pricing() {
    let db = TestDb::connect().await;
    let product = db.seed_products(1, dec!(10.00)).await[0];
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;

    add_line(&db, &caller, cart, product, 2).await;
    let (status, body) = db
        .send(caller.request(
            Method::PATCH,
            &format!("/carts/{cart}"),
            Some(&json!({ "discount_pct": "10", "tax_pct": "8" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let totals = &body["cart"];
    assert_eq!(decimal(&totals["subtotal"]), dec!(20.00));
    assert_eq!(decimal(&totals["discount_total"]), dec!(2.00));
    assert_eq!(decimal(&totals["tax_total"]), dec!(1.44));
    assert_eq!(decimal(&totals["total"]), dec!(19.44));

    // Setting a line's quantity replaces it rather than adding to it.
    let (status, body) = db
        .send(caller.request(
            Method::PUT,
            &format!("/carts/{cart}/lines/{product}"),
            Some(&json!({ "quantity": 3 })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["line"]["quantity"], 3);
    assert_eq!(decimal(&body["cart"]["subtotal"]), dec!(30.00));
    assert_eq!(decimal(&body["cart"]["discount_total"]), dec!(3.00));
    assert_eq!(decimal(&body["cart"]["tax_total"]), dec!(2.16));
    assert_eq!(decimal(&body["cart"]["total"]), dec!(29.16));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_add_existing_line_grows_quantity() {
    let db = TestDb::connect().await;
    let product = db.seed_products(1, dec!(4.50)).await[0];
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;

    add_line(&db, &caller, cart, product, 2).await;
    let body = add_line(&db, &caller, cart, product, 3).await;
    assert_eq!(body["line"]["quantity"], 5);
    assert_eq!(decimal(&body["cart"]["total"]), dec!(22.50));

    let (status, body) = db
        .send(caller.request(Method::GET, &format!("/carts/{cart}/lines/count"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lines"], 1);
    assert_eq!(body["quantity"], 5);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_other_callers_are_refused() {
    let db = TestDb::connect().await;
    let owner = As::anonymous();
    let cart = create_cart(&db, &owner).await;

    let (status, _) = db
        .send(As::anonymous().request(Method::GET, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = db
        .send(As::default().request(Method::GET, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = db
        .send(owner.request(Method::GET, "/carts/2147483647", None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "cart not found");
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_unknown_product_and_missing_line() {
    let db = TestDb::connect().await;
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;

    let (status, body) = db
        .send(caller.request(
            Method::POST,
            &format!("/carts/{cart}/lines"),
            Some(&json!({ "product_id": 2_147_483_647 })),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "product not found");

    let (status, body) = db
        .send(caller.request(Method::DELETE, &format!("/carts/{cart}/lines/2147483647"), None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "line not found");
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_closed_cart_rejects_mutations() {
    let db = TestDb::connect().await;
    let product = db.seed_products(1, dec!(1.00)).await[0];
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;

    let (status, body) = db
        .send(caller.request(
            Method::PATCH,
            &format!("/carts/{cart}"),
            Some(&json!({ "status": "expired" })),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "status cannot be set to expired");

    let (status, _) = db
        .send(caller.request(
            Method::PATCH,
            &format!("/carts/{cart}"),
            Some(&json!({ "status": "confirmed" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = db
        .send(caller.request(
            Method::POST,
            &format!("/carts/{cart}/lines"),
            Some(&json!({ "product_id": product })),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "cart is not open");

    // Reads and deletes still work on a confirmed cart.
    let (status, _) = db
        .send(caller.request(Method::GET, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = db
        .send(caller.request(Method::DELETE, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_merge_reassigns_when_user_has_no_cart() {
    let db = TestDb::connect().await;
    let products = db.seed_products(2, dec!(3.00)).await;
    let anonymous = As::anonymous();
    let cart = create_cart(&db, &anonymous).await;
    add_line(&db, &anonymous, cart, products[0], 1).await;
    add_line(&db, &anonymous, cart, products[1], 2).await;

    let user = As::user();
    let (status, body) = db
        .send(user.request(
            Method::POST,
            "/carts/merge",
            Some(&json!({
                "user_id": user.user_id,
                "session_token": anonymous.session_token,
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["kind"], "reassign");
    assert_eq!(body["cart"]["id"].as_i64(), Some(cart));
    assert_eq!(body["cart"]["owner"]["kind"], "user");
    assert_eq!(body["cart"]["owner"]["user_id"].as_i64(), user.user_id.map(i64::from));
    assert_eq!(body["stats"]["fused"], 0);
    assert_eq!(body["stats"]["added"], 0);
    assert_eq!(body["stats"]["omitted"], 0);

    // The anonymous session no longer owns it.
    let (status, _) = db
        .send(anonymous.request(Method::GET, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = db
        .send(user.request(Method::GET, &format!("/carts/{cart}/lines"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lines"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_merge_respects_line_cap() {
    let db = TestDb::connect().await;
    let products = db.seed_products(201, dec!(1.00)).await;
    let user = As::user();
    let destination = create_cart(&db, &user).await;

    sqlx::query(
        "INSERT INTO cart.line (cart_id, product_id, quantity, unit_price) \
         SELECT $1, product_id, 1, 1.00 FROM UNNEST($2::int[]) AS product_id",
    )
    .bind(i32::try_from(destination).unwrap())
    .bind(products[..200].to_vec())
    .execute(&db.pool)
    .await
    .unwrap();

    let anonymous = As::anonymous();
    let source = create_cart(&db, &anonymous).await;
    add_line(&db, &anonymous, source, products[0], 2).await;
    add_line(&db, &anonymous, source, products[200], 1).await;

    let (status, body) = db
        .send(user.request(
            Method::POST,
            "/carts/merge",
            Some(&json!({
                "user_id": user.user_id,
                "session_token": anonymous.session_token,
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["kind"], "fuse");
    assert_eq!(body["cart"]["id"].as_i64(), Some(destination));

    let stats = &body["stats"];
    assert_eq!(stats["fused"], 1);
    assert_eq!(stats["added"], 0);
    assert_eq!(stats["omitted"], 1);
    assert_eq!(stats["warnings"].as_array().map(Vec::len), Some(1));

    let (status, body) = db
        .send(user.request(Method::GET, &format!("/carts/{destination}/lines/count"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lines"], 200);
    assert_eq!(body["quantity"], 202);

    assert_eq!(status_of(&db, source).await, "cancelled");
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart.line WHERE cart_id = $1")
        .bind(i32::try_from(source).unwrap())
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_merge_accounts_for_every_source_line() {
    let db = TestDb::connect().await;
    let products = db.seed_products(4, dec!(2.00)).await;
    let user = As::user();
    let destination = create_cart(&db, &user).await;
    add_line(&db, &user, destination, products[0], 1).await;

    let anonymous = As::anonymous();
    let source = create_cart(&db, &anonymous).await;
    for product in &products[..3] {
        add_line(&db, &anonymous, source, *product, 1).await;
    }

    let (status, body) = db
        .send(user.request(
            Method::POST,
            "/carts/merge",
            Some(&json!({
                "user_id": user.user_id,
                "session_token": anonymous.session_token,
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let stats = &body["stats"];
    let accounted = stats["fused"].as_u64().unwrap()
        + stats["added"].as_u64().unwrap()
        + stats["omitted"].as_u64().unwrap();
    assert_eq!(accounted, 3);
    assert_eq!(stats["fused"], 1);
    assert_eq!(stats["added"], 2);
    assert_eq!(decimal(&body["cart"]["subtotal"]), dec!(8.00));

    let merges: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cart.audit_log WHERE cart_id = $1 AND action = 'merge'",
    )
    .bind(i32::try_from(destination).unwrap())
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert_eq!(merges, 1);

    // A second merge finds no open anonymous cart.
    let (status, body) = db
        .send(user.request(
            Method::POST,
            "/carts/merge",
            Some(&json!({
                "user_id": user.user_id,
                "session_token": anonymous.session_token,
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "noop");
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_stale_cart_reads_as_expired() {
    let db = TestDb::connect().await;
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;
    backdate(&db, cart, 31).await;

    let read = db.send(caller.request(Method::GET, &format!("/carts/{cart}"), None));
    let sweep = db.send(maintenance_request(Method::POST, "/maintenance/expire"));
    let ((status, body), (sweep_status, _)) = tokio::join!(read, sweep);
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "cart expired");
    assert_eq!(sweep_status, StatusCode::OK);

    let (status, body) = db
        .send(caller.request(Method::GET, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "cart expired");
    assert_eq!(status_of(&db, cart).await, "expired");

    assert_eq!(expirations(&db, cart).await, 1);

    // The caller's next current cart is a new one.
    let (status, body) = db.send(caller.request(Method::GET, "/carts/current", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["cart"]["id"].as_i64(), Some(cart));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_sweep_is_idempotent() {
    let db = TestDb::connect().await;
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;
    backdate(&db, cart, 45).await;

    // Sweeps from tests running alongside may expire the cart first, so only
    // the second run's report and the audit trail are exact.
    let (status, first) = db
        .send(maintenance_request(Method::POST, "/maintenance/expire"))
        .await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(status_of(&db, cart).await, "expired");

    let (status, second) = db
        .send(maintenance_request(Method::POST, "/maintenance/expire"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!second["expired"].as_array().unwrap().contains(&json!(cart)));
    assert_eq!(expirations(&db, cart).await, 1);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_audit_query_by_cart() {
    let db = TestDb::connect().await;
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;
    backdate(&db, cart, 31).await;
    let (status, _) = db
        .send(caller.request(Method::GET, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = db
        .send(maintenance_request(
            Method::GET,
            &format!("/maintenance/audit?cart_id={cart}&action=expire"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["total"], 1);
    let trigger = &body["entries"][0]["detail"]["trigger"];
    assert!(trigger == "read" || trigger == "sweep", "{trigger}");

    let (status, csv) = db
        .send(maintenance_request(
            Method::GET,
            &format!("/maintenance/audit?cart_id={cart}&action=expire&format=csv"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let csv = csv.as_str().unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.lines().nth(1).unwrap().contains(",expire,"));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_create_with_pricing_settings() {
    let db = TestDb::connect().await;
    let caller = As::user();
    let cart = create_cart_with(
        &db,
        &caller,
        &json!({ "currency": "eur", "tax_mode": "multi", "discount_amount": "2.50" }),
    )
    .await;

    assert_eq!(cart["currency"], "EUR");
    assert_eq!(cart["tax_mode"], "multi");
    assert_eq!(cart["status"], "open");
    assert_eq!(decimal(&cart["discount_amount"]), dec!(2.50));
    assert_eq!(decimal(&cart["total"]), dec!(0));

    let (status, body) = db
        .send(caller.request(
            Method::POST,
            "/carts",
            Some(&json!({ "currency": "EURO" })),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_multi_tax_breakdown_follows_mode() {
    let db = TestDb::connect().await;
    let product = db.seed_products(1, dec!(10.00)).await[0];
    let suffix = session_token();
    let rules: Vec<i32> = sqlx::query_scalar(
        "INSERT INTO catalog.tax_rule (code, name, kind, rate, applies_to) VALUES \
         ('VAT-' || $1, 'Value added tax', 'percentage', 8, 'discounted_base'), \
         ('ECO-' || $1, 'Eco fee', 'fixed', 0.25, 'gross') \
         RETURNING id",
    )
    .bind(&suffix)
    .fetch_all(&db.pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO catalog.product_tax_rule (product_id, tax_rule_id) \
         SELECT $1, rule FROM UNNEST($2::int[]) AS rule",
    )
    .bind(product)
    .bind(&rules)
    .execute(&db.pool)
    .await
    .unwrap();

    let caller = As::anonymous();
    let cart = create_cart_with(
        &db,
        &caller,
        &json!({ "tax_mode": "multi", "discount_pct": "10", "tax_pct": "50" }),
    )
    .await;
    let cart = cart["id"].as_i64().unwrap();
    add_line(&db, &caller, cart, product, 2).await;

    let (status, body) = db
        .send(caller.request(Method::GET, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    // 20.00 - 10% = 18.00; 8% of that is 1.44, plus 2 x 0.25 fixed.
    assert_eq!(decimal(&body["cart"]["discount_total"]), dec!(2.00));
    assert_eq!(decimal(&body["cart"]["tax_total"]), dec!(1.94));
    assert_eq!(decimal(&body["cart"]["total"]), dec!(19.94));

    let breakdown = body["tax_breakdown"].as_array().unwrap();
    assert_eq!(breakdown.len(), 2);
    let shares: Vec<_> = breakdown.iter().map(|s| decimal(&s["amount"])).collect();
    assert_eq!(shares, vec![dec!(1.44), dec!(0.50)]);
    assert_eq!(shares.iter().copied().sum::<rust_decimal::Decimal>(), dec!(1.94));
    assert_eq!(breakdown[0]["code"], format!("VAT-{suffix}"));

    // Back to simple mode: header tax applies and the breakdown is gone.
    let (status, body) = db
        .send(caller.request(
            Method::PATCH,
            &format!("/carts/{cart}"),
            Some(&json!({ "tax_mode": "simple", "tax_pct": "5" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["cart"]["tax_total"]), dec!(0.90));
    assert_eq!(decimal(&body["cart"]["total"]), dec!(18.90));

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart.tax_breakdown WHERE cart_id = $1")
        .bind(i32::try_from(cart).unwrap())
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(stored, 0);
    let (_, body) = db
        .send(caller.request(Method::GET, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(body["tax_breakdown"], json!([]));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_largest_amounts_fit_storage() {
    let db = TestDb::connect().await;
    let product = db.seed_products(1, dec!(1.00)).await[0];
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;

    let (status, body) = db
        .send(caller.request(
            Method::POST,
            &format!("/carts/{cart}/lines"),
            Some(&json!({ "product_id": product, "quantity": 999, "unit_price": "9999999999.99" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["line"]["line_subtotal"]), dec!(9989999999990.01));
    assert_eq!(decimal(&body["cart"]["total"]), dec!(9989999999990.01));

    let (status, body) = db
        .send(caller.request(
            Method::PATCH,
            &format!("/carts/{cart}"),
            Some(&json!({ "discount_amount": "9999999999.99" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["cart"]["total"]), dec!(9979999999990.02));

    for (method, body) in [
        (Method::POST, json!({ "product_id": product, "unit_price": "10000000000" })),
        (Method::PATCH, json!({ "discount_amount": "100000000000000" })),
    ] {
        let uri = if method == Method::POST {
            format!("/carts/{cart}/lines")
        } else {
            format!("/carts/{cart}")
        };
        let (status, body) = db.send(caller.request(method, &uri, Some(&body))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body["error"], "amount cannot exceed 9999999999.99");
    }
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_merge_folds_write_failures_into_omitted() {
    let db = TestDb::connect().await;
    let products = db.seed_products(3, dec!(2.00)).await;
    let user = As::user();
    let destination = create_cart(&db, &user).await;
    add_line(&db, &user, destination, products[0], 1).await;

    let anonymous = As::anonymous();
    let source = create_cart(&db, &anonymous).await;
    for product in &products {
        add_line(&db, &anonymous, source, *product, 1).await;
    }

    // Inserting the third product into any cart now fails like a vanished
    // catalog row would.
    let rejected = products[2];
    sqlx::query(
        "CREATE OR REPLACE FUNCTION public.reject_line_insert() RETURNS trigger \
         LANGUAGE plpgsql AS $$ BEGIN \
         RAISE EXCEPTION 'product % is gone', NEW.product_id \
         USING ERRCODE = 'foreign_key_violation'; \
         END $$",
    )
    .execute(&db.pool)
    .await
    .unwrap();
    sqlx::query(&format!(
        "CREATE TRIGGER reject_line_{rejected} BEFORE INSERT ON cart.line \
         FOR EACH ROW WHEN (NEW.product_id = {rejected}) \
         EXECUTE FUNCTION public.reject_line_insert()"
    ))
    .execute(&db.pool)
    .await
    .unwrap();

    let (status, body) = db
        .send(user.request(
            Method::POST,
            "/carts/merge",
            Some(&json!({
                "user_id": user.user_id,
                "session_token": anonymous.session_token,
            })),
        ))
        .await;

    sqlx::query(&format!("DROP TRIGGER reject_line_{rejected} ON cart.line"))
        .execute(&db.pool)
        .await
        .unwrap();

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["kind"], "fuse");
    let stats = &body["stats"];
    assert_eq!(stats["fused"], 1);
    assert_eq!(stats["added"], 1);
    assert_eq!(stats["omitted"], 1);
    let accounted = stats["fused"].as_u64().unwrap()
        + stats["added"].as_u64().unwrap()
        + stats["omitted"].as_u64().unwrap();
    assert_eq!(accounted, 3);
    assert_eq!(
        stats["warnings"],
        json!([format!("product {rejected} omitted: product no longer exists")])
    );

    // The failed line rolled back alone; the rest of the merge committed.
    assert_eq!(decimal(&body["cart"]["subtotal"]), dec!(6.00));
    assert_eq!(status_of(&db, source).await, "cancelled");
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_concurrent_adds_of_one_product_all_land() {
    let db = TestDb::connect().await;
    let product = db.seed_products(1, dec!(1.25)).await[0];
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;

    let mut adds = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let app = db.app.clone();
        let request = caller.request(
            Method::POST,
            &format!("/carts/{cart}/lines"),
            Some(&json!({ "product_id": product, "quantity": 1 })),
        );
        adds.spawn(async move { send(&app, request).await });
    }
    while let Some(result) = adds.join_next().await {
        let (status, body) = result.unwrap();
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (status, body) = db
        .send(caller.request(Method::GET, &format!("/carts/{cart}"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lines"][0]["quantity"], 8);
    assert_eq!(decimal(&body["cart"]["subtotal"]), dec!(10.00));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_concurrent_adds_never_exceed_line_cap() {
    let db = TestDb::connect().await;
    let products = db.seed_products(204, dec!(1.00)).await;
    let caller = As::anonymous();
    let cart = create_cart(&db, &caller).await;

    sqlx::query(
        "INSERT INTO cart.line (cart_id, product_id, quantity, unit_price) \
         SELECT $1, product_id, 1, 1.00 FROM UNNEST($2::int[]) AS product_id",
    )
    .bind(i32::try_from(cart).unwrap())
    .bind(products[..199].to_vec())
    .execute(&db.pool)
    .await
    .unwrap();

    let mut adds = tokio::task::JoinSet::new();
    for product in &products[199..] {
        let app = db.app.clone();
        let request = caller.request(
            Method::POST,
            &format!("/carts/{cart}/lines"),
            Some(&json!({ "product_id": product })),
        );
        adds.spawn(async move { send(&app, request).await });
    }

    let mut accepted = 0;
    while let Some(result) = adds.join_next().await {
        let (status, body) = result.unwrap();
        if status == StatusCode::OK {
            accepted += 1;
        } else {
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(body["error"], "cart line limit reached (200 lines)");
        }
    }
    assert_eq!(accepted, 1);

    let (status, body) = db
        .send(caller.request(Method::GET, &format!("/carts/{cart}/lines/count"), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lines"], 200);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (CARTKEEPER_TEST_DATABASE_URL)"]
async fn test_audit_entries_carry_request_id() {
    let db = TestDb::connect().await;
    let anonymous = As::anonymous();
    let cart = create_cart(&db, &anonymous).await;

    let user = As::user();
    let request_id = format!("req-{}", session_token());
    let mut request = user.request(
        Method::POST,
        "/carts/merge",
        Some(&json!({
            "user_id": user.user_id,
            "session_token": anonymous.session_token,
        })),
    );
    request
        .headers_mut()
        .insert("x-request-id", request_id.parse().unwrap());
    let (status, body) = db.send(request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["kind"], "reassign");

    let (status, body) = db
        .send(maintenance_request(
            Method::GET,
            &format!("/maintenance/audit?cart_id={cart}&action=merge"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["total"], 1);
    assert_eq!(body["entries"][0]["request_id"], request_id);
}
