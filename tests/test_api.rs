//! HTTP API tests against the assembled router, memory-backed.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use flowrunner::account::AccountService;
use flowrunner::node::builtin::register_builtin_nodes;
use flowrunner::node::registry::NodeRegistry;
use flowrunner::registry::FlowRegistry;
use flowrunner::runtime::FlowRuntime;
use flowrunner::server::{AppState, router};
use flowrunner::storage::{MemoryStorage, StorageProvider};
use flowrunner::vault::SecretVault;
use flowrunner::vault::cipher::SecretCipher;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let storage: Arc<dyn StorageProvider> = Arc::new(MemoryStorage::new());
    let vault = Arc::new(SecretVault::new(
        storage.clone(),
        SecretCipher::new(&[8u8; 32]).unwrap(),
    ));
    let accounts = Arc::new(AccountService::new(
        storage.clone(),
        b"api-test-secret".to_vec(),
        24,
    ));
    let flows = Arc::new(FlowRegistry::new(storage.clone()));

    let mut node_registry = NodeRegistry::new();
    register_builtin_nodes(&mut node_registry);
    let node_registry = node_registry.into_shared();

    let runtime = Arc::new(FlowRuntime::new(
        storage,
        vault.clone(),
        node_registry.clone(),
    ));

    router(AppState {
        accounts,
        flows,
        runtime,
        vault,
        node_registry,
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, body)
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn register_and_login(app: &Router, username: &str) -> (String, String) {
    let (status, created) = send(
        app,
        post_json(
            "/api/v1/accounts",
            None,
            json!({"username": username, "password": "hunter2"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let account_id = created["id"].as_str().unwrap().to_string();

    let (status, login) = send(
        app,
        post_json(
            "/api/v1/login",
            None,
            json!({"username": username, "password": "hunter2"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["account_id"], json!(account_id));
    let token = login["token"].as_str().unwrap().to_string();
    (account_id, token)
}

const FLOW_YAML: &str = "metadata:\n  name: api-demo\nnodes:\n  start:\n    type: set_value\n    params: {key: out, value: done}\n";

#[tokio::test]
async fn test_account_lifecycle_and_auth() {
    let app = app();
    let (account_id, token) = register_and_login(&app, "alice").await;

    // Bearer JWT works.
    let (status, me) = send(&app, get("/api/v1/accounts/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], json!(account_id));
    assert_eq!(me["username"], json!("alice"));

    // No credentials → 401; wrong password → 401.
    let (status, _) = send(&app, get("/api/v1/accounts/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/login",
            None,
            json!({"username": "alice", "password": "wrong"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Duplicate username → 409.
    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/accounts",
            None,
            json!({"username": "alice", "password": "x"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_flow_crud_over_http() {
    let app = app();
    let (_, token) = register_and_login(&app, "bob").await;

    // Create.
    let (status, created) = send(
        &app,
        post_json(
            "/api/v1/flows",
            Some(&token),
            json!({"name": "api-demo", "content": FLOW_YAML}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let flow_id = created["id"].as_str().unwrap().to_string();

    // List includes it with extracted metadata.
    let (status, listed) = send(&app, get("/api/v1/flows", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed[0]["name"], json!("api-demo"));

    // Raw YAML round-trips byte-for-byte.
    let (status, raw) = send(&app, get(&format!("/api/v1/flows/{flow_id}"), Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(raw, Value::String(FLOW_YAML.to_string()));

    // Update bumps the version list to two entries.
    let updated = FLOW_YAML.replace("api-demo", "api-demo-2");
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/api/v1/flows/{flow_id}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(json!({"content": updated}).to_string()))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, versions) = send(
        &app,
        get(&format!("/api/v1/flows/{flow_id}/versions"), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(versions.as_array().unwrap().len(), 2);

    // Malformed definitions are rejected up front.
    let (status, _) = send(
        &app,
        post_json(
            "/api/v1/flows",
            Some(&token),
            json!({"content": "nodes:\n  start:\n    type: no-such-node\n"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Delete.
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/flows/{flow_id}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get(&format!("/api/v1/flows/{flow_id}"), Some(&token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_run_flow_and_poll_execution() {
    let app = app();
    let (_, token) = register_and_login(&app, "carol").await;

    let (_, created) = send(
        &app,
        post_json(
            "/api/v1/flows",
            Some(&token),
            json!({"content": FLOW_YAML}),
        ),
    )
    .await;
    let flow_id = created["id"].as_str().unwrap().to_string();

    let (status, run) = send(
        &app,
        post_json(
            &format!("/api/v1/flows/{flow_id}/run"),
            Some(&token),
            json!({"shared": {"request_id": "req-1"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let execution_id = run["execution_id"].as_str().unwrap().to_string();

    // Poll until terminal.
    let mut last = Value::Null;
    for _ in 0..200 {
        let (status, execution) = send(
            &app,
            get(&format!("/api/v1/executions/{execution_id}"), Some(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let state = execution["status"].as_str().unwrap().to_string();
        last = execution;
        if state != "pending" && state != "running" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(last["status"], json!("completed"));
    assert_eq!(last["results"]["start"], json!("done"));

    let (status, logs) = send(
        &app,
        get(
            &format!("/api/v1/executions/{execution_id}/logs"),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!logs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_secret_endpoints_and_ownership() {
    let app = app();
    let (alice_id, alice_token) = register_and_login(&app, "alice").await;
    let (_bob_id, bob_token) = register_and_login(&app, "bob").await;

    // Set and read back.
    let (status, _) = send(
        &app,
        post_json(
            &format!("/api/v1/accounts/{alice_id}/secrets/API_KEY"),
            Some(&alice_token),
            json!({"value": "sk-abc"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, secret) = send(
        &app,
        get(
            &format!("/api/v1/accounts/{alice_id}/secrets/API_KEY"),
            Some(&alice_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(secret["value"], json!("sk-abc"));

    let (status, keys) = send(
        &app,
        get(
            &format!("/api/v1/accounts/{alice_id}/secrets/keys"),
            Some(&alice_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(keys["total"], json!(1));
    assert_eq!(keys["keys"], json!(["API_KEY"]));

    // Another account cannot touch alice's secrets.
    let (status, _) = send(
        &app,
        get(
            &format!("/api/v1/accounts/{alice_id}/secrets/API_KEY"),
            Some(&bob_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Delete, then reads 404.
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/accounts/{alice_id}/secrets/API_KEY"))
        .header(header::AUTHORIZATION, format!("Bearer {alice_token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        get(
            &format!("/api/v1/accounts/{alice_id}/secrets/API_KEY"),
            Some(&alice_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_basic_auth_accepted() {
    let app = app();
    let (account_id, _) = register_and_login(&app, "dora").await;

    use base64::Engine;
    let credentials = base64::engine::general_purpose::STANDARD.encode("dora:hunter2");
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/accounts/me")
        .header(header::AUTHORIZATION, format!("Basic {credentials}"))
        .body(Body::empty())
        .unwrap();
    let (status, me) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], json!(account_id));
}
