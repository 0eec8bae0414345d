use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use metrix_common::types::{Metric, MetricKey, MetricKind, MetricValue};
use metrix_storage::error::StorageError;
use std::fmt::Write;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed input: unknown type, unparsable value, bad JSON, empty batch.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(
                StorageError::KindMismatch { .. } | StorageError::CounterOverflow { .. },
            ) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// `POST /update/`: applies one JSON metric and returns the stored result.
pub async fn update_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let metric: Metric = parse_json(&body)?;
    let stored = state.storage.update(metric)?;
    Ok(Json(stored))
}

/// `POST /update/{type}/{name}/{value}`.
pub async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, raw)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let kind: MetricKind = kind.parse().map_err(ApiError::BadRequest)?;
    let value = MetricValue::parse(kind, &raw).map_err(ApiError::BadRequest)?;
    if name.trim().is_empty() {
        return Err(ApiError::NotFound("metric name is required".to_string()));
    }
    state.storage.update(Metric { id: name, value })?;
    Ok(StatusCode::OK)
}

/// `POST /updates/`: applies a JSON array of metrics atomically.
pub async fn update_batch(State(state): State<AppState>, body: Bytes) -> ApiResult<StatusCode> {
    let metrics: Vec<Metric> = parse_json(&body)?;
    if metrics.is_empty() {
        return Err(ApiError::BadRequest("empty batch".to_string()));
    }
    let count = metrics.len();
    state.storage.bulk_update(metrics)?;
    tracing::debug!(count, "Batch applied");
    Ok(StatusCode::OK)
}

fn lookup(state: &AppState, name: &str, kind: MetricKind) -> ApiResult<Metric> {
    match state.storage.get(name)? {
        Some(metric) if metric.kind() == kind => Ok(metric),
        _ => Err(ApiError::NotFound(format!("{kind} '{name}' not found"))),
    }
}

/// `POST /value/`: looks up `{"id", "type"}` and returns the stored metric.
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let key: MetricKey = parse_json(&body)?;
    Ok(Json(lookup(&state, &key.id, key.kind)?))
}

/// `GET /value/{type}/{name}`: the stored value as plain text. An unknown
/// type is reported as not found.
pub async fn value_text(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind: MetricKind = kind.parse().map_err(ApiError::NotFound)?;
    Ok(lookup(&state, &name, kind)?.value.to_string())
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// `GET /`: every stored metric as an HTML table, sorted by name.
pub async fn list_metrics(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let mut metrics = state.storage.get_all()?;
    metrics.sort_by(|a, b| a.id.cmp(&b.id));

    let mut page = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Metrics</title></head><body>\n\
         <table>\n<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n",
    );
    for metric in &metrics {
        let _ = writeln!(
            page,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&metric.id),
            metric.kind(),
            metric.value
        );
    }
    page.push_str("</table>\n</body></html>\n");
    Ok(Html(page))
}

/// `GET /ping`: 200 when storage answers, 500 otherwise.
pub async fn ping(State(state): State<AppState>) -> Response {
    match state.storage.ping() {
        Ok(()) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], "OK").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Storage ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable").into_response()
        }
    }
}
