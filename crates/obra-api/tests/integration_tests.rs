//! # Integration Tests for obra-api
//!
//! Drives the assembled router end to end: health checks, login and the
//! brute-force lockout, tenant isolation, contract reconciliation through
//! expense validation, cashbox closing, the audit chain and OpenAPI.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use obra_api::auth::PasswordCost;
use obra_api::middleware::brute_force::LoginThrottleConfig;
use obra_api::state::{AppConfig, AppState, BootstrapAdmin};

const ADMIN_EMAIL: &str = "admin@obra.test";
const ADMIN_PASSWORD: &str = "correct-horse-battery";

/// Helper: state with a bootstrapped administrator, in-memory only.
async fn seeded_state(login: LoginThrottleConfig) -> AppState {
    let state = AppState::with_config(
        AppConfig {
            password_cost: PasswordCost::MINIMUM,
            login,
            bootstrap: Some(BootstrapAdmin {
                email: ADMIN_EMAIL.into(),
                password: ADMIN_PASSWORD.into(),
                org_name: "Constructora Norte".into(),
                org_cuit: "30-71234567-1".into(),
            }),
            ..AppConfig::default()
        },
        None,
    );
    obra_api::bootstrap::bootstrap_admin(&state)
        .await
        .unwrap()
        .expect("administrator created");
    state
}

async fn test_app() -> Router {
    obra_api::app(seeded_state(LoginThrottleConfig::default()).await)
}

/// Helper: read a response body as JSON.
async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> axum::http::Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn login(app: &Router, email: &str, password: &str) -> axum::http::Response<Body> {
    send(
        app,
        "POST",
        "/v1/auth/login",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await
}

async fn admin_token(app: &Router) -> String {
    let response = login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Helper: POST and return the created record, asserting 201.
async fn create(app: &Router, token: &str, uri: &str, body: Value) -> Value {
    let response = send(app, "POST", uri, Some(token), Some(body)).await;
    let status = response.status();
    let json = body_json(response).await;
    assert_eq!(status, StatusCode::CREATED, "POST {uri}: {json}");
    json
}

fn id(record: &Value) -> String {
    record["id"].as_str().unwrap().to_string()
}

async fn create_work(app: &Router, token: &str, code: &str) -> Value {
    create(
        app,
        token,
        "/v1/works",
        json!({ "code": code, "name": "Edificio Belgrano", "budget": "50000.00" }),
    )
    .await
}

async fn create_supplier(app: &Router, token: &str) -> Value {
    create(
        app,
        token,
        "/v1/suppliers",
        json!({
            "name": "Hormigones del Sur",
            "cuit": "20-12345678-6",
            "fiscal_condition": "responsable_inscripto",
        }),
    )
    .await
}

async fn create_contract(app: &Router, token: &str, work: &Value, supplier: &Value) -> Value {
    create(
        app,
        token,
        "/v1/contracts",
        json!({
            "work_id": id(work),
            "supplier_id": id(supplier),
            "description": "Estructura de hormigón",
            "total_amount": "1000.00",
        }),
    )
    .await
}

async fn create_expense(app: &Router, token: &str, contract: &Value, number: &str, net: &str) -> Value {
    create(
        app,
        token,
        "/v1/expenses",
        json!({
            "work_id": contract["work_id"],
            "contract_id": id(contract),
            "document_type": "invoice_a",
            "document_number": number,
            "issue_date": "2024-05-02",
            "description": "Certificado de avance",
            "net_amount": net,
        }),
    )
    .await
}

// -- Health Checks ------------------------------------------------------------

#[tokio::test]
async fn liveness_answers_ok() {
    let app = test_app().await;
    let response = send(&app, "GET", "/health/liveness", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn readiness_without_database() {
    let app = test_app().await;
    let response = send(&app, "GET", "/health/readiness", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

#[tokio::test]
async fn metrics_count_requests() {
    let app = test_app().await;
    send(&app, "GET", "/health/liveness", None, None).await;
    let response = send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_string(response).await;
    assert!(text.contains("# TYPE obra_http_requests_total counter"));
    assert!(text.contains(
        "obra_http_requests_total{method=\"GET\",path=\"/health/liveness\",status=\"200\"} 1"
    ));
    assert!(text.contains("obra_audit_entries"));
}

// -- Authentication -----------------------------------------------------------

#[tokio::test]
async fn protected_route_requires_token() {
    let app = test_app().await;
    let response = send(&app, "GET", "/v1/works", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, "GET", "/v1/works", Some("not-a-jwt"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_and_me() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let response = send(&app, "GET", "/v1/auth/me", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let me = body_json(response).await;
    assert_eq!(me["user"]["email"], ADMIN_EMAIL);
    assert_eq!(me["organization"]["name"], "Constructora Norte");
    assert!(me["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = test_app().await;
    let response = login(&app, ADMIN_EMAIL, "wrong-password").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn repeated_failures_lock_out_the_client() {
    let state = seeded_state(LoginThrottleConfig {
        max_attempts: 3,
        window: std::time::Duration::from_secs(60),
        lockout: std::time::Duration::from_secs(300),
    })
    .await;
    let app = obra_api::app(state);

    for _ in 0..3 {
        let response = login(&app, ADMIN_EMAIL, "wrong-password").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Locked out even with the right password.
    let response = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 300);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "TOO_MANY_ATTEMPTS");
}

#[tokio::test]
async fn successful_login_resets_the_failure_count() {
    let state = seeded_state(LoginThrottleConfig {
        max_attempts: 2,
        window: std::time::Duration::from_secs(60),
        lockout: std::time::Duration::from_secs(300),
    })
    .await;
    let app = obra_api::app(state);

    assert_eq!(
        login(&app, ADMIN_EMAIL, "wrong-password").await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        login(&app, ADMIN_EMAIL, "wrong-password").await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await.status(),
        StatusCode::OK
    );
}

// -- Validation ---------------------------------------------------------------

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/works")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn blank_name_is_unprocessable() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let response = send(
        &app,
        "POST",
        "/v1/works",
        Some(&token),
        Some(json!({ "code": "OB-1", "name": "   " })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn invalid_cuit_is_unprocessable() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let response = send(
        &app,
        "POST",
        "/v1/suppliers",
        Some(&token),
        Some(json!({
            "name": "Sin CUIT",
            "cuit": "20-12345678-0",
            "fiscal_condition": "monotributista",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn duplicate_work_code_conflicts() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    create_work(&app, &token, "OB-1").await;
    let response = send(
        &app,
        "POST",
        "/v1/works",
        Some(&token),
        Some(json!({ "code": "OB-1", "name": "Otra" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "DUPLICATE");
}

// -- Tenancy ------------------------------------------------------------------

#[tokio::test]
async fn records_of_another_organization_are_not_found() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let work = create_work(&app, &token, "OB-1").await;

    create(
        &app,
        &token,
        "/v1/organizations",
        json!({
            "name": "Constructora Oeste",
            "cuit": "30-70000000-8",
            "admin_email": "admin@oeste.test",
            "admin_display_name": "Admin Oeste",
            "admin_password": "another-long-password",
        }),
    )
    .await;
    let response = login(&app, "admin@oeste.test", "another-long-password").await;
    assert_eq!(response.status(), StatusCode::OK);
    let other = body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string();

    let uri = format!("/v1/works/{}", id(&work));
    let response = send(&app, "GET", &uri, Some(&other), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, "GET", "/v1/works", Some(&other), None).await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 0);

    let response = send(&app, "GET", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// -- Contracts and Expenses ---------------------------------------------------

#[tokio::test]
async fn validating_expenses_executes_the_contract() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let work = create_work(&app, &token, "OB-1").await;
    let supplier = create_supplier(&app, &token).await;
    let contract = create_contract(&app, &token, &work, &supplier).await;
    assert_eq!(contract["status"], "active");
    assert_eq!(contract["executed_amount"], "0.00");

    // 500.00 net + 21 % VAT = 605.00 gross.
    let expense = create_expense(&app, &token, &contract, "0001-00000001", "500.00").await;
    assert_eq!(expense["status"], "pending");
    assert_eq!(expense["supplier_id"], supplier["id"]);
    assert_eq!(expense["taxes"]["gross"], "605.00");

    let uri = format!("/v1/expenses/{}/validate", id(&expense));
    let response = send(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["expense"]["status"], "validated");
    assert_eq!(outcome["contract"]["executed_amount"], "605.00");

    let uri = format!("/v1/contracts/{}/balance", id(&contract));
    let balance = body_json(send(&app, "GET", &uri, Some(&token), None).await).await;
    assert_eq!(balance["balance"], "395.00");
    assert_eq!(balance["consumption_bps"], 6050);

    // 400.00 net = 484.00 gross, more than the remaining balance.
    let second = create_expense(&app, &token, &contract, "0001-00000002", "400.00").await;
    let uri = format!("/v1/expenses/{}/validate", id(&second));
    let response = send(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "CONTRACT_BALANCE_EXCEEDED"
    );

    // The rejected validation left nothing behind.
    let uri = format!("/v1/expenses/{}", id(&second));
    let expense = body_json(send(&app, "GET", &uri, Some(&token), None).await).await;
    assert_eq!(expense["status"], "pending");
    let uri = format!("/v1/contracts/{}/balance", id(&contract));
    let balance = body_json(send(&app, "GET", &uri, Some(&token), None).await).await;
    assert_eq!(balance["executed"], "605.00");
}

#[tokio::test]
async fn annulling_a_validated_expense_restores_the_balance() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let work = create_work(&app, &token, "OB-1").await;
    let supplier = create_supplier(&app, &token).await;
    let contract = create_contract(&app, &token, &work, &supplier).await;
    let expense = create_expense(&app, &token, &contract, "0001-00000001", "500.00").await;

    let uri = format!("/v1/expenses/{}/validate", id(&expense));
    assert_eq!(
        send(&app, "POST", &uri, Some(&token), None).await.status(),
        StatusCode::OK
    );

    let uri = format!("/v1/expenses/{}/annul", id(&expense));
    let response = send(
        &app,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "reason": "Factura duplicada" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["expense"]["status"], "annulled");
    assert_eq!(outcome["contract"]["executed_amount"], "0.00");

    // Annulled is terminal.
    let uri = format!("/v1/expenses/{}/validate", id(&expense));
    let response = send(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn blocked_supplier_cannot_be_validated() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let work = create_work(&app, &token, "OB-1").await;
    let supplier = create_supplier(&app, &token).await;
    let contract = create_contract(&app, &token, &work, &supplier).await;
    let expense = create_expense(&app, &token, &contract, "0001-00000001", "100.00").await;

    let uri = format!("/v1/suppliers/{}", id(&supplier));
    let response = send(
        &app,
        "PATCH",
        &uri,
        Some(&token),
        Some(json!({ "manually_blocked": true, "block_reason": "Deuda con la obra" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let uri = format!("/v1/expenses/{}/validate", id(&expense));
    let response = send(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "SUPPLIER_BLOCKED");
}

#[tokio::test]
async fn duplicate_document_conflicts() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let work = create_work(&app, &token, "OB-1").await;
    let supplier = create_supplier(&app, &token).await;
    let contract = create_contract(&app, &token, &work, &supplier).await;
    create_expense(&app, &token, &contract, "0001-00000001", "100.00").await;

    let response = send(
        &app,
        "POST",
        "/v1/expenses",
        Some(&token),
        Some(json!({
            "work_id": id(&work),
            "contract_id": id(&contract),
            "document_type": "invoice_a",
            "document_number": "0001-00000001",
            "issue_date": "2024-05-03",
            "description": "Repetida",
            "net_amount": "100.00",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "DUPLICATE");
}

// -- Cashboxes ----------------------------------------------------------------

#[tokio::test]
async fn closing_a_cashbox_with_a_difference_raises_an_alert() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let cashbox = create(
        &app,
        &token,
        "/v1/cashboxes",
        json!({ "period": "2024-05", "opening_balance": "100.00" }),
    )
    .await;
    assert_eq!(cashbox["status"], "open");

    let uri = format!("/v1/cashboxes/{}/movements", id(&cashbox));
    let response = send(
        &app,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "kind": "inflow", "amount": "50.00", "concept": "Reposición" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["balance"], "150.00");

    // Outflows cannot overdraw the cashbox.
    let response = send(
        &app,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "kind": "outflow", "amount": "500.00", "concept": "Materiales" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "INSUFFICIENT_FUNDS");

    let uri = format!("/v1/cashboxes/{}/close", id(&cashbox));
    let response = send(
        &app,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "declared_balance": "140.00" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let closed = body_json(response).await;
    assert_eq!(closed["cashbox"]["status"], "closed");
    assert_eq!(closed["closing"]["computed"], "150.00");
    assert_eq!(closed["closing"]["difference"], "-10.00");
    assert!(closed["alert"].is_object());

    let response = send(&app, "GET", "/v1/alerts?open=true", Some(&token), None).await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = send(
        &app,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "declared_balance": "150.00" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// -- Audit --------------------------------------------------------------------

#[tokio::test]
async fn audit_chain_records_actions_and_verifies() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let work = create_work(&app, &token, "OB-1").await;

    let uri = format!("/v1/audit?resource_id={}", id(&work));
    let entries = body_json(send(&app, "GET", &uri, Some(&token), None).await).await;
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "work.created");

    let response = send(&app, "GET", "/v1/audit/verify", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["chain_valid"], true);
    assert_eq!(result["broken_links"], 0);
}

// -- Taxes --------------------------------------------------------------------

#[tokio::test]
async fn tax_preview_computes_vat() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let response = send(
        &app,
        "POST",
        "/v1/taxes/preview",
        Some(&token),
        Some(json!({
            "direction": "purchase",
            "counterparty_condition": "responsable_inscripto",
            "document_type": "invoice_a",
            "net_amount": "1000.00",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let taxes = body_json(response).await;
    assert_eq!(taxes["vat"], "210.00");
    assert_eq!(taxes["gross"], "1210.00");
}

// -- OpenAPI ------------------------------------------------------------------

#[tokio::test]
async fn openapi_document_is_public() {
    let app = test_app().await;
    let response = send(&app, "GET", "/openapi.json", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await;
    assert_eq!(doc["info"]["title"], "Obra API");
    assert!(doc["paths"]["/v1/expenses/{id}/validate"].is_object());
}

// -- Access Control -----------------------------------------------------------

/// Helper: a user with a role granting only `permissions`, and its token.
async fn limited_user(app: &Router, admin: &str, email: &str, permissions: Value) -> (Value, String) {
    let role = create(
        app,
        admin,
        "/v1/roles",
        json!({ "name": format!("Rol {email}"), "permissions": permissions }),
    )
    .await;
    create(
        app,
        admin,
        "/v1/users",
        json!({
            "email": email,
            "display_name": "Usuario Limitado",
            "password": "limited-user-password",
            "role_id": id(&role),
        }),
    )
    .await;
    let response = login(app, email, "limited-user-password").await;
    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string();
    (role, token)
}

#[tokio::test]
async fn missing_permission_is_forbidden() {
    let app = test_app().await;
    let admin = admin_token(&app).await;
    let (_, token) = limited_user(&app, &admin, "lectura@obra.test", json!(["works.read"])).await;

    let response = send(&app, "GET", "/v1/works", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        "POST",
        "/v1/works",
        Some(&token),
        Some(json!({ "code": "OB-9", "name": "Sin permiso" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"]["code"], "FORBIDDEN");

    let response = send(&app, "GET", "/v1/works", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn system_and_assigned_roles_cannot_be_deleted() {
    let app = test_app().await;
    let admin = admin_token(&app).await;

    let roles = body_json(send(&app, "GET", "/v1/roles", Some(&admin), None).await).await;
    let system = roles
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["system"] == true)
        .unwrap()
        .clone();
    let uri = format!("/v1/roles/{}", id(&system));
    let response = send(&app, "DELETE", &uri, Some(&admin), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "CONFLICT");

    let (assigned, _) = limited_user(&app, &admin, "asignado@obra.test", json!(["works.read"])).await;
    let uri = format!("/v1/roles/{}", id(&assigned));
    let response = send(&app, "DELETE", &uri, Some(&admin), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let unused = create(
        &app,
        &admin,
        "/v1/roles",
        json!({ "name": "Sin uso", "permissions": ["alerts.read"] }),
    )
    .await;
    let uri = format!("/v1/roles/{}", id(&unused));
    let response = send(&app, "DELETE", &uri, Some(&admin), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = send(&app, "DELETE", &uri, Some(&admin), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn users_cannot_deactivate_themselves() {
    let app = test_app().await;
    let admin = admin_token(&app).await;
    let me = body_json(send(&app, "GET", "/v1/auth/me", Some(&admin), None).await).await;
    let uri = format!("/v1/users/{}", me["user"]["id"].as_str().unwrap());

    let response = send(&app, "PATCH", &uri, Some(&admin), Some(json!({ "active": false }))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Still able to work.
    let response = send(&app, "GET", "/v1/auth/me", Some(&admin), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["user"]["active"], true);

    let response = send(
        &app,
        "PATCH",
        &uri,
        Some(&admin),
        Some(json!({ "display_name": "Administración" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn duplicate_user_email_conflicts() {
    let app = test_app().await;
    let admin = admin_token(&app).await;
    let role = create(
        &app,
        &admin,
        "/v1/roles",
        json!({ "name": "Compras", "permissions": ["expenses.*"] }),
    )
    .await;

    let response = send(
        &app,
        "POST",
        "/v1/users",
        Some(&admin),
        Some(json!({
            "email": ADMIN_EMAIL.to_uppercase(),
            "display_name": "Otro Admin",
            "password": "yet-another-password",
            "role_id": id(&role),
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "DUPLICATE");
}

#[tokio::test]
async fn creating_organizations_requires_a_platform_admin() {
    let app = test_app().await;
    let admin = admin_token(&app).await;
    create(
        &app,
        &admin,
        "/v1/organizations",
        json!({
            "name": "Constructora Oeste",
            "cuit": "30-70000000-8",
            "admin_email": "admin@oeste.test",
            "admin_display_name": "Admin Oeste",
            "admin_password": "another-long-password",
        }),
    )
    .await;

    // A tenant administrator holds every permission but is not a platform admin.
    let response = login(&app, "admin@oeste.test", "another-long-password").await;
    let tenant_admin = body_json(response).await["token"]
        .as_str()
        .unwrap()
        .to_string();
    let response = send(
        &app,
        "POST",
        "/v1/organizations",
        Some(&tenant_admin),
        Some(json!({
            "name": "Constructora Sur",
            "cuit": "30-71111111-3",
            "admin_email": "admin@sur.test",
            "admin_display_name": "Admin Sur",
            "admin_password": "third-long-password",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        login(&app, "admin@sur.test", "third-long-password").await.status(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn change_password_rejects_a_wrong_current_password() {
    let app = test_app().await;
    let admin = admin_token(&app).await;

    let response = send(
        &app,
        "POST",
        "/v1/auth/change-password",
        Some(&admin),
        Some(json!({
            "current_password": "not-the-password",
            "new_password": "brand-new-password",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        login(&app, ADMIN_EMAIL, "brand-new-password").await.status(),
        StatusCode::UNAUTHORIZED
    );

    let response = send(
        &app,
        "POST",
        "/v1/auth/change-password",
        Some(&admin),
        Some(json!({
            "current_password": ADMIN_PASSWORD,
            "new_password": "brand-new-password",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        login(&app, ADMIN_EMAIL, "brand-new-password").await.status(),
        StatusCode::OK
    );
}

// -- Incomes ------------------------------------------------------------------

#[tokio::test]
async fn annulling_an_income_reverses_its_cash_collection() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    let work = create_work(&app, &token, "OB-1").await;
    let cashbox = create(
        &app,
        &token,
        "/v1/cashboxes",
        json!({ "period": "2024-05", "opening_balance": "100.00" }),
    )
    .await;

    let created = create(
        &app,
        &token,
        "/v1/incomes",
        json!({
            "work_id": id(&work),
            "cashbox_id": id(&cashbox),
            "client_name": "Consorcio Belgrano",
            "client_fiscal_condition": "responsable_inscripto",
            "document_type": "invoice_a",
            "document_number": "0002-00000001",
            "issue_date": "2024-05-10",
            "description": "Anticipo financiero",
            "net_amount": "200.00",
        }),
    )
    .await;
    let income = &created["income"];
    assert_eq!(income["status"], "registered");
    assert_eq!(created["cash_movement"]["kind"], "inflow");
    assert_eq!(created["cash_movement"]["amount"], income["taxes"]["payable"]);

    let uri = format!("/v1/incomes/{}/annul", id(income));
    let response = send(
        &app,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "reason": "Cliente desistió" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let annulled = body_json(response).await;
    assert_eq!(annulled["income"]["status"], "annulled");
    assert_eq!(annulled["cash_movement"]["kind"], "outflow");
    assert_eq!(annulled["cash_movement"]["reversal"], true);
    assert_eq!(annulled["cash_movement"]["amount"], income["taxes"]["payable"]);

    let uri_cashbox = format!("/v1/cashboxes/{}", id(&cashbox));
    let current = body_json(send(&app, "GET", &uri_cashbox, Some(&token), None).await).await;
    assert_eq!(current["movements"].as_array().unwrap().len(), 2);

    // The collection and its reversal cancel out.
    let uri_movements = format!("/v1/cashboxes/{}/movements", id(&cashbox));
    let response = send(
        &app,
        "POST",
        &uri_movements,
        Some(&token),
        Some(json!({ "kind": "inflow", "amount": "1.00", "concept": "Redondeo" })),
    )
    .await;
    assert_eq!(body_json(response).await["balance"], "101.00");

    let response = send(
        &app,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "reason": "Otra vez" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// -- Alerts -------------------------------------------------------------------

#[tokio::test]
async fn acknowledged_alert_is_raised_again_by_a_scan() {
    let app = test_app().await;
    let token = admin_token(&app).await;
    create(
        &app,
        &token,
        "/v1/suppliers",
        json!({
            "name": "Andamios Sin ART",
            "cuit": "20-12345678-6",
            "fiscal_condition": "monotributista",
            "requires_art": true,
        }),
    )
    .await;

    let response = send(&app, "POST", "/v1/alerts/scan", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let open = body_json(send(&app, "GET", "/v1/alerts?open=true", Some(&token), None).await).await;
    let open = open.as_array().unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["kind"], "art_expired");
    let first = id(&open[0]);

    // A second scan does not duplicate an open alert.
    let report = body_json(send(&app, "POST", "/v1/alerts/scan", Some(&token), None).await).await;
    assert_eq!(report["raised"].as_array().unwrap().len(), 0);

    let uri = format!("/v1/alerts/{first}/acknowledge");
    let response = send(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["acknowledged_at"].is_string());
    let response = send(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let report = body_json(send(&app, "POST", "/v1/alerts/scan", Some(&token), None).await).await;
    let raised = report["raised"].as_array().unwrap();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0]["kind"], "art_expired");
    assert_ne!(id(&raised[0]), first);

    let open = body_json(send(&app, "GET", "/v1/alerts?open=true", Some(&token), None).await).await;
    assert_eq!(open.as_array().unwrap().len(), 1);
}

// -- Write Transactions -------------------------------------------------------

/// Helper: a work, supplier, contract and pending 500.00 net expense.
async fn pending_expense(app: &Router, token: &str) -> (Value, Value) {
    let work = create_work(app, token, "OB-1").await;
    let supplier = create_supplier(app, token).await;
    let contract = create_contract(app, token, &work, &supplier).await;
    let expense = create_expense(app, token, &contract, "0001-00000001", "500.00").await;
    (contract, expense)
}

#[tokio::test]
async fn failed_database_commit_rolls_the_stores_back() {
    let state = seeded_state(LoginThrottleConfig::default()).await;
    let app = obra_api::app(state.clone());
    let token = admin_token(&app).await;
    let (contract, expense) = pending_expense(&app, &token).await;
    let audit_before = body_json(send(&app, "GET", "/v1/audit", Some(&token), None).await).await;
    let records_before =
        body_json(send(&app, "GET", "/v1/accounting-records", Some(&token), None).await).await;

    // Same stores, but every commit goes to a database that is not there.
    let mut unreachable = state.clone();
    unreachable.db_pool = Some(
        sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy("postgres://obra@127.0.0.1:1/obra")
            .unwrap(),
    );
    let broken = obra_api::app(unreachable);

    let uri = format!("/v1/expenses/{}/validate", id(&expense));
    let response = send(&broken, "POST", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let uri_expense = format!("/v1/expenses/{}", id(&expense));
    let current = body_json(send(&app, "GET", &uri_expense, Some(&token), None).await).await;
    assert_eq!(current["status"], "pending");
    let uri_balance = format!("/v1/contracts/{}/balance", id(&contract));
    let balance = body_json(send(&app, "GET", &uri_balance, Some(&token), None).await).await;
    assert_eq!(balance["executed"], "0.00");
    let audit_after = body_json(send(&app, "GET", "/v1/audit", Some(&token), None).await).await;
    assert_eq!(audit_after, audit_before);
    let records_after =
        body_json(send(&app, "GET", "/v1/accounting-records", Some(&token), None).await).await;
    assert_eq!(records_after, records_before);
    let verify = body_json(send(&app, "GET", "/v1/audit/verify", Some(&token), None).await).await;
    assert_eq!(verify["chain_valid"], true);

    // The lock was released and the next attempt applies cleanly.
    let response = send(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["contract"]["executed_amount"], "605.00");
}

#[tokio::test]
async fn writes_wait_for_the_transaction_in_progress() {
    let state = seeded_state(LoginThrottleConfig::default()).await;
    let app = obra_api::app(state.clone());
    let token = admin_token(&app).await;
    let (_, expense) = pending_expense(&app, &token).await;

    let tx = state.begin().await;
    let mut request = {
        let app = app.clone();
        let uri = format!("/v1/expenses/{}/validate", id(&expense));
        tokio::spawn(async move { send(&app, "POST", &uri, Some(&token), None).await })
    };
    let waited = tokio::time::timeout(std::time::Duration::from_millis(100), &mut request).await;
    assert!(waited.is_err(), "validation ran while another write held the ledger");

    tx.commit(obra_api::db::Changes::new()).await.unwrap();
    let response = request.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn readiness_ignores_a_held_ledger() {
    let state = seeded_state(LoginThrottleConfig::default()).await;
    let app = obra_api::app(state.clone());

    let tx = state.begin().await;
    let response = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        send(&app, "GET", "/health/readiness", None, None),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    drop(tx);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_cannot_exceed_the_attempt_limit() {
    let state = seeded_state(LoginThrottleConfig {
        max_attempts: 3,
        window: std::time::Duration::from_secs(60),
        lockout: std::time::Duration::from_secs(300),
    })
    .await;
    let app = obra_api::app(state);

    let attempts: Vec<_> = (0..20)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { login(&app, ADMIN_EMAIL, "wrong-password").await.status() })
        })
        .collect();
    let mut unauthorized = 0;
    let mut throttled = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            StatusCode::UNAUTHORIZED => unauthorized += 1,
            StatusCode::TOO_MANY_REQUESTS => throttled += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(unauthorized, 3);
    assert_eq!(throttled, 17);
}

#[tokio::test]
async fn login_does_not_revive_a_user_deactivated_meanwhile() {
    let state = seeded_state(LoginThrottleConfig::default()).await;
    let app = obra_api::app(state.clone());
    let admin = state
        .user_by_email(&obra_core::Email::new(ADMIN_EMAIL).unwrap())
        .unwrap();

    let tx = state.begin().await;
    let attempt = {
        let app = app.clone();
        tokio::spawn(async move { login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await.status() })
    };
    // Let the password check finish; the login then waits for the ledger.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    tx.users
        .try_update_scoped(admin.organization_id, admin.id.as_uuid(), |u| {
            u.active = false;
            Ok::<_, ()>(())
        })
        .unwrap()
        .unwrap();
    tx.commit(obra_api::db::Changes::new()).await.unwrap();

    assert_eq!(attempt.await.unwrap(), StatusCode::UNAUTHORIZED);
    let stored = state.users.get(admin.id.as_uuid()).unwrap();
    assert!(!stored.active);
    assert!(stored.last_login_at.is_none());
}
