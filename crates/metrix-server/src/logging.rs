use axum::extract::Request;
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use metrix_common::REAL_IP_HEADER;
use rand::Rng;
use std::time::{Duration, Instant};

/// Trace ID of the current request, stored in request extensions.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// Trace ID attached by [`request_logging`], or `-` outside of it.
pub fn trace_id_of(req: &Request) -> String {
    req.extensions()
        .get::<TraceId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| "-".to_string())
}

fn new_trace_id() -> TraceId {
    TraceId(format!("{:016x}", rand::thread_rng().gen::<u64>()))
}

/// `250µs`, `12ms` or `2.5s`.
fn human_elapsed(elapsed: Duration) -> String {
    match elapsed.as_micros() {
        us @ 0..=999 => format!("{us}µs"),
        us @ 1_000..=999_999 => format!("{}ms", us / 1_000),
        _ => format!("{:.1}s", elapsed.as_secs_f64()),
    }
}

fn header_str<'a>(req: &'a Request, name: &str) -> &'a str {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

/// Logs one line per request and one per response, tagged with a fresh
/// trace ID that is also returned in `x-trace-id`.
///
/// Bodies are gzipped and possibly encrypted, so only their declared sizes
/// are logged.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = new_trace_id();
    tracing::info!(
        trace_id = %trace_id.0,
        method = %req.method(),
        path = %req.uri().path(),
        real_ip = header_str(&req, REAL_IP_HEADER),
        encoding = header_str(&req, header::CONTENT_ENCODING.as_str()),
        length = header_str(&req, header::CONTENT_LENGTH.as_str()),
        "--> request"
    );
    let header_value = HeaderValue::from_str(&trace_id).ok();
    let id = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let started = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = human_elapsed(started.elapsed());

    match response.status().as_u16() {
        code @ 500.. => tracing::error!(trace_id = %id, status = code, elapsed = %elapsed, "<-- response"),
        code @ 400..=499 => tracing::warn!(trace_id = %id, status = code, elapsed = %elapsed, "<-- response"),
        code => tracing::info!(trace_id = %id, status = code, elapsed = %elapsed, "<-- response"),
    }

    if let Some(value) = header_value {
        response.headers_mut().insert("x-trace-id", value);
    }
    response
}
