use crate::logging::trace_id_of;
use crate::state::AppState;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrix_common::signature::HashSigner;
use std::net::{IpAddr, SocketAddr};

/// Lowercase form of [`metrix_common::HASH_HEADER`].
pub static HASH_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");

/// Lowercase form of [`metrix_common::REAL_IP_HEADER`].
pub static REAL_IP_HEADER_NAME: HeaderName = HeaderName::from_static("x-real-ip");

/// Largest request body accepted before decoding.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

fn reject(status: StatusCode, message: &'static str) -> Response {
    (status, message).into_response()
}

async fn read_body(body: Body, trace_id: &str) -> Result<Bytes, Response> {
    to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        tracing::warn!(trace_id = %trace_id, error = %e, "Failed to read request body");
        reject(StatusCode::BAD_REQUEST, "failed to read request body")
    })
}

fn parse_real_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim();
    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Rejects requests whose `X-Real-IP` is missing, malformed or outside the
/// trusted subnet with 403. A no-op when no subnet is configured.
pub async fn trusted_subnet(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(subnet) = state.trusted_subnet else {
        return next.run(req).await;
    };
    let real_ip = req
        .headers()
        .get(&REAL_IP_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_real_ip);
    match real_ip {
        Some(ip) if subnet.contains(ip) => next.run(req).await,
        other => {
            tracing::warn!(
                trace_id = %trace_id_of(&req),
                real_ip = ?other,
                subnet = %subnet,
                "Request rejected: address not trusted"
            );
            reject(StatusCode::FORBIDDEN, "address not trusted")
        }
    }
}

/// Checks the `HashSHA256` header against the request body and signs the
/// response body.
///
/// A request without the header passes unchecked; a mismatch is 400. A
/// no-op when no key is configured.
pub async fn verify_signature(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.signer.is_enabled() {
        return next.run(req).await;
    }
    let trace_id = trace_id_of(&req);

    let req = match req.headers().get(&HASH_HEADER_NAME).cloned() {
        Some(signature) => {
            let (parts, body) = req.into_parts();
            let bytes = match read_body(body, &trace_id).await {
                Ok(bytes) => bytes,
                Err(response) => return response,
            };
            let valid = signature
                .to_str()
                .map(|sig| state.signer.verify(&bytes, sig))
                .unwrap_or(false);
            if !valid {
                tracing::warn!(trace_id = %trace_id, "Request rejected: signature mismatch");
                return reject(StatusCode::BAD_REQUEST, "signature mismatch");
            }
            Request::from_parts(parts, Body::from(bytes))
        }
        None => req,
    };

    let response = next.run(req).await;
    sign_response(&state.signer, response, &trace_id).await
}

async fn sign_response(signer: &HashSigner, response: Response, trace_id: &str) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Failed to buffer response for signing");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Some(signature) = signer.sign(&bytes) {
        if let Ok(value) = HeaderValue::from_str(&signature) {
            parts.headers.insert(HASH_HEADER_NAME.clone(), value);
        }
    }
    Response::from_parts(parts, Body::from(bytes))
}

/// Decrypts non-empty POST bodies with the configured private key.
///
/// A body that fails to decrypt is 400. A no-op when no key is loaded.
pub async fn decrypt_body(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(decryptor) = state.decryptor.clone() else {
        return next.run(req).await;
    };
    if req.method() != Method::POST {
        return next.run(req).await;
    }
    let trace_id = trace_id_of(&req);
    let (mut parts, body) = req.into_parts();
    let bytes = match read_body(body, &trace_id).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };
    if bytes.is_empty() {
        return next.run(Request::from_parts(parts, Body::empty())).await;
    }
    match decryptor.decrypt(&bytes) {
        Ok(plain) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            next.run(Request::from_parts(parts, Body::from(plain))).await
        }
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Request rejected: payload decryption failed");
            reject(StatusCode::BAD_REQUEST, "failed to decrypt payload")
        }
    }
}
