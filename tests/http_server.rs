//! End-to-end tests against the HTTP query façade (C10, §6): spin up
//! `server::run_server` on a loopback port and drive it with real requests.

use base64::Engine;
use odras_rag_core::config::{self, Config};
use odras_rag_core::{migrate, server};
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

async fn spawn_server() -> (TempDir, String) {
    spawn_server_with_embedding(
        r#"
        [[embedding]]
        id = "default"
        provider = "disabled"
        dims = 3
        "#,
    )
    .await
}

async fn spawn_server_with_embedding(embedding_block: &str) -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("blobs")).unwrap();

    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let bind = format!("127.0.0.1:{port}");

    let config_text = format!(
        r#"
        [database]
        path = "{data}/rag.sqlite"

        [object_store]
        backend = "local"
        [object_store.local]
        root = "{blobs}"

        [chunking]
        min_tokens = 4
        target_tokens = 40
        max_tokens = 80
        overlap_ratio = 0.15

        {embedding_block}

        [server]
        bind = "{bind}"
        "#,
        data = root.join("data").display(),
        blobs = root.join("blobs").display(),
        embedding_block = embedding_block,
        bind = bind,
    );
    let config_path = root.join("rag.toml");
    fs::write(&config_path, config_text).unwrap();

    let cfg: Config = config::load_config(&config_path).unwrap();
    migrate::run_migrations(&cfg).await.unwrap();

    tokio::spawn(async move {
        server::run_server(&cfg).await.unwrap();
    });

    let base_url = format!("http://{bind}");
    wait_for_health(&base_url).await;
    (tmp, base_url)
}

/// Starts a tiny mock Ollama `/api/embed` endpoint that returns a constant
/// unit vector for every input text, so ingestion and query embedding
/// succeed deterministically without a real embedding backend.
async fn spawn_mock_embedding_server() -> String {
    use axum::{routing::post, Json, Router};

    async fn handle_embed(Json(req): Json<Value>) -> Json<Value> {
        let count = req.get("input").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(1);
        let vector: Vec<f64> = std::iter::once(1.0).chain(std::iter::repeat(0.0)).take(EMBED_DIMS).collect();
        let embeddings: Vec<Vec<f64>> = std::iter::repeat(vector).take(count.max(1)).collect();
        Json(json!({ "embeddings": embeddings }))
    }

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    listener.set_nonblocking(true).unwrap();
    let listener = tokio::net::TcpListener::from_std(listener).unwrap();

    tokio::spawn(async move {
        let app = Router::new().route("/api/embed", post(handle_embed));
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://127.0.0.1:{port}")
}

const EMBED_DIMS: usize = 3;

async fn wait_for_health(base_url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{base_url}/health")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("server did not become healthy in time");
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (_tmp, base_url) = spawn_server().await;
    let client = reqwest::Client::new();
    let resp = client.get(format!("{base_url}/health")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn upload_file_then_list_and_fetch_asset_lifecycle() {
    let (_tmp, base_url) = spawn_server().await;
    let client = reqwest::Client::new();

    let content = b"The system shall operate offline when network access is unavailable.";
    let content_b64 = base64::engine::general_purpose::STANDARD.encode(content);

    let upload_resp = client
        .post(format!("{base_url}/files"))
        .json(&json!({
            "project_id": "proj-http",
            "filename": "req.txt",
            "content_type": "text/plain",
            "content_base64": content_b64,
        }))
        .send()
        .await
        .unwrap();
    assert!(upload_resp.status().is_success(), "upload failed: {:?}", upload_resp.status());
    let upload_body: Value = upload_resp.json().await.unwrap();
    let file_id = upload_body["id"].as_str().unwrap().to_string();

    // Ingestion fails because the test config's "default" embedding provider
    // is the disabled kind — the failure must surface as a 503, not a panic
    // or a 200 with bogus data.
    let create_resp = client
        .post(format!("{base_url}/knowledge/assets"))
        .json(&json!({ "file_id": file_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(create_resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let err_body: Value = create_resp.json().await.unwrap();
    assert_eq!(err_body["error"]["code"], "dependency_unavailable");

    // Listing assets for the project still works and is simply empty, since
    // the asset never got created.
    let list_resp = client
        .get(format!("{base_url}/knowledge/assets"))
        .query(&[("project_id", "proj-http")])
        .send()
        .await
        .unwrap();
    assert!(list_resp.status().is_success());
    let assets: Vec<Value> = list_resp.json().await.unwrap();
    assert!(assets.is_empty());
}

#[tokio::test]
async fn get_nonexistent_asset_returns_404_with_stable_error_code() {
    let (_tmp, base_url) = spawn_server().await;
    let client = reqwest::Client::new();
    let random_id = uuid::Uuid::new_v4();

    let resp = client
        .get(format!("{base_url}/knowledge/assets/{random_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn search_with_empty_question_is_rejected_as_validation_error() {
    let (_tmp, base_url) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base_url}/knowledge/search"))
        .json(&json!({ "project_id": "proj-http", "question": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation");
}

#[tokio::test]
async fn search_with_unknown_embedding_provider_is_rejected_as_validation_error() {
    let (_tmp, base_url) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base_url}/knowledge/search"))
        .json(&json!({
            "project_id": "proj-http",
            "question": "what does the system do",
            "embedding_provider_id": "nonexistent",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation");
}

/// Retrieval succeeding but synthesis failing (no synthesis provider
/// configured, so synthesis is disabled by default) must not 503 the whole
/// request — it degrades to the fixed fallback answer, `Confidence::Unknown`,
/// and the citations retrieval already found.
#[tokio::test]
async fn rag_query_falls_back_gracefully_when_synthesis_is_unavailable() {
    let mock_base = spawn_mock_embedding_server().await;
    let embedding_block = format!(
        r#"
        [[embedding]]
        id = "default"
        provider = "ollama"
        model = "mock-embed"
        dims = {EMBED_DIMS}
        base_url = "{mock_base}"
        "#
    );
    let (_tmp, base_url) = spawn_server_with_embedding(&embedding_block).await;
    let client = reqwest::Client::new();

    let content = b"The system shall operate offline when network access is unavailable.";
    let content_b64 = base64::engine::general_purpose::STANDARD.encode(content);

    let upload_resp = client
        .post(format!("{base_url}/files"))
        .json(&json!({
            "project_id": "proj-fallback",
            "filename": "req.txt",
            "content_type": "text/plain",
            "content_base64": content_b64,
        }))
        .send()
        .await
        .unwrap();
    assert!(upload_resp.status().is_success());
    let upload_body: Value = upload_resp.json().await.unwrap();
    let file_id = upload_body["id"].as_str().unwrap().to_string();

    let create_resp = client
        .post(format!("{base_url}/knowledge/assets"))
        .json(&json!({ "file_id": file_id }))
        .send()
        .await
        .unwrap();
    assert!(create_resp.status().is_success(), "ingest failed: {:?}", create_resp.text().await);

    let resp = client
        .post(format!("{base_url}/rag/query"))
        .json(&json!({
            "project_id": "proj-fallback",
            "user_id": "user-1",
            "question": "what does the system do when offline",
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "expected 200, got {:?}", resp.status());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["answer"], "Unable to generate a response at this time.");
    assert_eq!(body["confidence"], "unknown");
    assert!(!body["citations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn workflow_status_for_unknown_instance_is_rejected() {
    let (_tmp, base_url) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base_url}/workflows/rag-query/does-not-exist/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

/// The workflow instance's stored envelope must carry a single `llm_response`
/// JSON-string variable with `answer`/`confidence`/`key_points`/`metadata`
/// fields, not separate ad hoc `rag_answer`/`rag_confidence` primitives.
#[tokio::test]
async fn workflow_envelope_carries_a_single_llm_response_variable() {
    let (_tmp, base_url) = spawn_server().await;
    let client = reqwest::Client::new();

    let start_resp = client
        .post(format!("{base_url}/workflows/rag-query"))
        .json(&json!({
            "project_id": "proj-workflow",
            "user_id": "user-1",
            "question": "what does the system do",
        }))
        .send()
        .await
        .unwrap();
    assert!(start_resp.status().is_success(), "expected 200, got {:?}", start_resp.status());
    let start_body: Value = start_resp.json().await.unwrap();
    let instance_id = start_body["instance_id"].as_str().unwrap().to_string();

    let status_resp = client
        .get(format!("{base_url}/workflows/rag-query/{instance_id}/status"))
        .send()
        .await
        .unwrap();
    assert!(status_resp.status().is_success());
    let status_body: Value = status_resp.json().await.unwrap();
    assert_eq!(status_body["status"], "completed");
    assert!(status_body["answer"].as_str().is_some());
    assert!(status_body["confidence"].as_str().is_some());
}
