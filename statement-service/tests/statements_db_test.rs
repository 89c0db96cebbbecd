//! End-to-end flows against a real PostgreSQL.
//!
//! Run with `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.

mod common;

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use common::*;
use serde_json::{json, Value};
use statement_service::{
    build_router,
    extraction::{ExtractionError, FileKind, OcrEngine, OcrOutput, StatementPipeline},
    services::Database,
    AppState,
};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const STATEMENT_TEXT: &str = "\
JPMorgan Chase Bank, N.A.
Customer Name: Jane Doe
Account Number: 123456789
Statement Period: 01/01/2024 to 01/31/2024
Opening Balance: $1,000.00
01/05/2024 ACME PAYROLL DEPOSIT 2,500.00 CR 3,500.00
01/09/2024 BLUE BOTTLE COFFEE 4.50 DR 3,495.50
01/15/2024 RENT PAYMENT 1,200.00 DR 2,295.50
Closing Balance: $2,295.50
";

/// Returns canned text instead of shelling out to tesseract.
struct CannedOcr(Option<&'static str>);

#[async_trait]
impl OcrEngine for CannedOcr {
    async fn extract_text(&self, _path: &Path, _kind: FileKind) -> Result<OcrOutput, ExtractionError> {
        match self.0 {
            Some(text) => Ok(OcrOutput {
                text: text.to_string(),
                pages: 1,
            }),
            None => Err(ExtractionError::EmptyText),
        }
    }
}

async fn spawn_db_app(ocr_text: Option<&'static str>) -> TestApp {
    init_tracing();
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let upload_dir = tempfile::tempdir().unwrap();
    let config = test_config(upload_dir.path(), &url);

    let db = Database::new(&url, 5, 1).await.expect("connect to test database");
    db.run_migrations().await.expect("migrations");

    let mut state = AppState::new(config, db).await.unwrap();
    state.pipeline = StatementPipeline::new(state.db.clone(), Arc::new(CannedOcr(ocr_text)));

    TestApp {
        router: build_router(state.clone()),
        state,
        upload_dir,
    }
}

/// Register a fresh user and return `(user_id, token)`.
async fn register_and_login(app: &TestApp) -> (Uuid, String) {
    let suffix = Uuid::new_v4().simple().to_string();
    let email = format!("user_{}@example.com", &suffix[..12]);
    let register = json!({
        "username": format!("user_{}", &suffix[..12]),
        "email": email,
        "password": "correct horse battery",
    });

    let response = assert_status(
        app,
        json_request("POST", "/register", &register),
        StatusCode::CREATED,
    )
    .await;
    let user_id: Uuid = body_json(response).await["user_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let login = json!({"email": email, "password": "correct horse battery"});
    let response = assert_status(app, json_request("POST", "/login", &login), StatusCode::OK).await;
    let body = body_json(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);

    (user_id, body["access_token"].as_str().unwrap().to_string())
}

async fn upload(app: &TestApp, token: &str) -> (StatusCode, Value) {
    let request = authed(
        multipart_request("/ocr/process", "file", "january statement.png", b"\x89PNG fake"),
        token,
    );
    let response = app.send(request).await;
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
#[ignore]
async fn register_rejects_duplicates_and_login_rejects_bad_password() {
    let app = spawn_db_app(Some(STATEMENT_TEXT)).await;
    let suffix = Uuid::new_v4().simple().to_string();
    let body = json!({
        "username": format!("dup_{}", &suffix[..10]),
        "email": format!("dup_{}@example.com", &suffix[..10]),
        "password": "long enough password",
    });

    assert_status(&app, json_request("POST", "/register", &body), StatusCode::CREATED).await;
    assert_status(&app, json_request("POST", "/register", &body), StatusCode::CONFLICT).await;

    let login = json!({"email": body["email"], "password": "wrong password"});
    let response = assert_status(&app, json_request("POST", "/login", &login), StatusCode::UNAUTHORIZED).await;
    assert_eq!(body_json(response).await["error"], "Invalid credentials");
}

#[tokio::test]
#[ignore]
async fn upload_extracts_persists_and_exports() {
    let app = spawn_db_app(Some(STATEMENT_TEXT)).await;
    let (user_id, token) = register_and_login(&app).await;

    let (status, body) = upload(&app, &token).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["filename"], "january statement.png");
    assert_eq!(body["bank"]["code"], "CHASE");
    assert_eq!(body["transaction_count"], 3);
    assert_eq!(body["pages"], 1);
    assert!(body["raw_text_preview"].as_str().unwrap().starts_with("JPMorgan"));

    let categories: Vec<&str> = body["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["category"].as_str())
        .collect();
    assert!(categories.contains(&"Income"));
    assert!(categories.contains(&"Food & Dining"));

    let id = body["statement_id"].as_str().unwrap().to_string();

    let response = assert_status(&app, authed(get("/statements"), &token), StatusCode::OK).await;
    let list = body_json(response).await;
    assert_eq!(list["total"], 1);
    assert_eq!(list["statements"][0]["id"], id);
    assert_eq!(list["statements"][0]["processing_status"], "completed");
    assert_eq!(list["statements"][0]["transaction_count"], 3);

    let uri = format!("/statements/{}/transactions", id);
    let response = assert_status(&app, authed(get(&uri), &token), StatusCode::OK).await;
    assert_eq!(body_json(response).await["count"], 3);

    let uri = format!("/statements/{}/logs", id);
    let response = assert_status(&app, authed(get(&uri), &token), StatusCode::OK).await;
    let logs = body_json(response).await;
    let actions: Vec<&str> = logs
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["action"].as_str().unwrap())
        .collect();
    for expected in ["upload", "ocr_start", "ocr_complete", "parse_start", "parse_complete", "categorize", "reconcile"] {
        assert!(actions.contains(&expected), "missing {} in {:?}", expected, actions);
    }

    let uri = format!("/statements/{}/balance-check", id);
    let response = assert_status(&app, authed(get(&uri), &token), StatusCode::OK).await;
    let check = body_json(response).await;
    assert_eq!(check["total_credits"], "2500.00");
    assert_eq!(check["total_debits"], "1204.50");

    let uri = format!("/statements/{}/export/csv", id);
    let response = assert_status(&app, authed(get(&uri), &token), StatusCode::OK).await;
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/csv");
    let csv = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert_eq!(csv.lines().count(), 4);
    assert!(csv.lines().next().unwrap().contains("amount"));

    let uri = format!("/statements/{}/export/json", id);
    let response = assert_status(&app, authed(get(&uri), &token), StatusCode::OK).await;
    let export = body_json(response).await;
    assert_eq!(export["statement"]["id"], id);
    assert_eq!(export["transactions"].as_array().unwrap().len(), 3);

    // another user sees nothing
    let stranger = app.token_for(Uuid::new_v4());
    let uri = format!("/statements/{}", id);
    assert_status(&app, authed(get(&uri), &stranger), StatusCode::NOT_FOUND).await;
    assert_ne!(user_id, Uuid::nil());

    let delete = axum::http::Request::builder()
        .method("DELETE")
        .uri(&uri)
        .body(axum::body::Body::empty())
        .unwrap();
    assert_status(&app, authed(delete, &token), StatusCode::OK).await;
    assert_status(&app, authed(get(&uri), &token), StatusCode::NOT_FOUND).await;
    assert_eq!(std::fs::read_dir(app.upload_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore]
async fn failed_ocr_marks_statement_failed() {
    let app = spawn_db_app(None).await;
    let (_, token) = register_and_login(&app).await;

    let (status, body) = upload(&app, &token).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Processing failed");
    assert_eq!(body["details"], "OCR produced no text");

    let response = assert_status(&app, authed(get("/statements"), &token), StatusCode::OK).await;
    let list = body_json(response).await;
    let statement = &list["statements"][0];
    assert_eq!(statement["processing_status"], "failed");
    assert!(statement["processing_error"]
        .as_str()
        .unwrap()
        .contains("OCR produced no text"));

    let uri = format!("/statements/{}/logs", statement["id"].as_str().unwrap());
    let response = assert_status(&app, authed(get(&uri), &token), StatusCode::OK).await;
    let logs = body_json(response).await;
    assert!(logs
        .as_array()
        .unwrap()
        .iter()
        .any(|l| l["action"] == "error" && l["status"] == "failed"));
}

#[tokio::test]
#[ignore]
async fn reference_data_is_seeded() {
    let app = spawn_db_app(Some(STATEMENT_TEXT)).await;
    let token = app.token();

    let response = assert_status(&app, authed(get("/banks"), &token), StatusCode::OK).await;
    let banks = body_json(response).await;
    let codes: Vec<&str> = banks
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["code"].as_str().unwrap())
        .collect();
    for code in ["BOA", "CHASE", "WF"] {
        assert!(codes.contains(&code));
    }

    let response = assert_status(&app, authed(get("/categories"), &token), StatusCode::OK).await;
    let tree = body_json(response).await;
    let tree = tree.as_array().unwrap();
    assert_eq!(tree.len(), 8);
    assert_eq!(tree[0]["name"], "Income");
    assert!(!tree[0]["subcategories"].as_array().unwrap().is_empty());
}
