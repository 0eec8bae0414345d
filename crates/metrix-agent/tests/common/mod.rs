#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use metrix_common::codec::gzip_decompress;
use metrix_common::types::Metric;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One request as the collector saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub metrics: Vec<Metric>,
    pub body: Vec<u8>,
    pub signature: Option<String>,
    pub real_ip: Option<String>,
    pub content_encoding: Option<String>,
}

#[derive(Default)]
pub struct Recorder {
    pub attempts: AtomicUsize,
    pub received: Mutex<Vec<Received>>,
    pub fail_with: Option<StatusCode>,
}

impl Recorder {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    /// Every delivered metric, sorted by name.
    pub fn all_metrics(&self) -> Vec<Metric> {
        let mut all: Vec<Metric> = self
            .received()
            .into_iter()
            .flat_map(|r| r.metrics)
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn record_batch(
    State(recorder): State<Arc<Recorder>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    recorder.attempts.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = recorder.fail_with {
        return status;
    }
    let Ok(json) = gzip_decompress(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    let Ok(metrics) = serde_json::from_slice::<Vec<Metric>>(&json) else {
        return StatusCode::BAD_REQUEST;
    };
    recorder.received.lock().unwrap().push(Received {
        metrics,
        body: body.to_vec(),
        signature: header(&headers, "hashsha256"),
        real_ip: header(&headers, "x-real-ip"),
        content_encoding: header(&headers, "content-encoding"),
    });
    StatusCode::OK
}

/// Binds a router on an ephemeral loopback port and serves it in the
/// background.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    addr
}

/// A stand-in collector that records every batch posted to `/updates/`.
pub async fn spawn_collector(fail_with: Option<StatusCode>) -> (SocketAddr, Arc<Recorder>) {
    let recorder = Arc::new(Recorder {
        fail_with,
        ..Recorder::default()
    });
    let app = Router::new()
        .route("/updates/", post(record_batch))
        .with_state(Arc::clone(&recorder));
    (serve(app).await, recorder)
}
