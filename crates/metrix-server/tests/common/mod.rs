#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use metrix_common::cipher::PayloadDecryptor;
use ip_network::IpNetwork;
use metrix_common::signature::HashSigner;
use metrix_server::app;
use metrix_server::state::AppState;
use metrix_storage::file::FileStorage;
use metrix_storage::sqlite::SqliteStorage;
use metrix_storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const TEST_KEY: &str = "test-secret";

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

/// Options layered on top of a plain, file-backed server.
#[derive(Default)]
pub struct TestOptions {
    pub key: Option<&'static str>,
    pub decryptor: Option<PayloadDecryptor>,
    pub trusted_subnet: Option<&'static str>,
    /// Back the server with SQLite instead of the snapshot file.
    pub sqlite: bool,
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(TestOptions::default())
}

pub fn build_test_context_with(options: TestOptions) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let storage: Arc<dyn StorageEngine> = if options.sqlite {
        Arc::new(SqliteStorage::open(&temp_dir.path().join("metrics.db"))?)
    } else {
        Arc::new(FileStorage::open(
            temp_dir.path().join("metrics.json"),
            Duration::ZERO,
            false,
        )?)
    };

    let mut state = AppState::new(storage);
    state.signer = HashSigner::new(options.key);
    state.decryptor = options.decryptor.map(Arc::new);
    state.trusted_subnet = options
        .trusted_subnet
        .map(|s| s.parse::<IpNetwork>().expect("test subnet"));

    let app = app::build_http_app(state.clone());
    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("body should be JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(body.into()).expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> TestResponse {
    send(app, method, uri, &[], Body::empty()).await
}

pub async fn post_json(app: &axum::Router, uri: &str, body: serde_json::Value) -> TestResponse {
    send(
        app,
        "POST",
        uri,
        &[("Content-Type", "application/json")],
        body.to_string(),
    )
    .await
}
