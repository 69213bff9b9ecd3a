use std::io::{Cursor, Read};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::info;

use crate::error::Error;
use crate::AppState;

const HDR_VERSION: &str = "x-wisp-version";
const HDR_NONCE: &str = "x-wisp-nonce";
const HDR_TTL: &str = "x-wisp-ttl";

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

struct CreateParams {
    version: u8,
    nonce: String,
    ttl: Duration,
}

fn parse_create_headers(headers: &HeaderMap) -> Result<CreateParams, &'static str> {
    let version = headers
        .get(HDR_VERSION)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing x-wisp-version header")?
        .parse::<u8>()
        .map_err(|_| "invalid x-wisp-version header")?;

    let nonce = headers
        .get(HDR_NONCE)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing x-wisp-nonce header")?;
    if nonce.is_empty() {
        return Err("x-wisp-nonce must not be empty");
    }

    let ttl_secs = headers
        .get(HDR_TTL)
        .and_then(|v| v.to_str().ok())
        .ok_or("missing x-wisp-ttl header")?
        .parse::<u64>()
        .map_err(|_| "invalid x-wisp-ttl header")?;

    Ok(CreateParams {
        version,
        nonce: nonce.to_owned(),
        ttl: Duration::from_secs(ttl_secs),
    })
}

/// `POST /api/secrets`: body is the raw ciphertext; version, nonce, and
/// TTL arrive as headers.
pub async fn create_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = match parse_create_headers(&headers) {
        Ok(p) => p,
        Err(msg) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response();
        }
    };

    let size = body.len() as u64;
    let mut reader = Cursor::new(body.as_ref());
    match state
        .service
        .create_secret(&mut reader, size, params.version, &params.nonce, params.ttl)
    {
        Ok((id, expires_at)) => {
            info!(size, ttl_secs = params.ttl.as_secs(), "secret created");
            (
                StatusCode::CREATED,
                Json(json!({"id": id.as_str(), "expires_at": expires_at})),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ── Consume ───────────────────────────────────────────────────────────────────

/// `GET /api/secrets/{id}`: the one-time read. Success streams the
/// ciphertext back with the client's version and nonce echoed in headers.
pub async fn consume_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let mut consumed = match state.service.consume(&id) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };

    let mut payload = Vec::with_capacity(consumed.size as usize);
    if let Err(e) = consumed.reader.read_to_end(&mut payload) {
        // The record is already destroyed; all we can do is log. The id
        // is not logged: it is the bearer capability.
        tracing::error!(error = %e, "stream consumed payload");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "internal error"})),
        )
            .into_response();
    }

    info!(size = consumed.size, "secret consumed");
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                "application/octet-stream".to_owned(),
            ),
            (
                HeaderName::from_static(HDR_VERSION),
                consumed.meta.version.to_string(),
            ),
            (
                HeaderName::from_static(HDR_NONCE),
                consumed.meta.nonce_b64u.clone(),
            ),
        ],
        payload,
    )
        .into_response()
}

// ── Error mapping ─────────────────────────────────────────────────────────────

/// Maps error kinds to responses. Internal causes stay in the logs; the
/// body never carries storage paths, ids, or payload fragments.
fn error_response(err: &Error) -> Response {
    let (status, msg) = match err {
        Error::InvalidId => (StatusCode::BAD_REQUEST, "invalid id"),
        Error::TtlInvalid => (StatusCode::BAD_REQUEST, "ttl invalid"),
        Error::SizeExceeded => (StatusCode::PAYLOAD_TOO_LARGE, "size exceeded"),
        Error::NotFound => (StatusCode::NOT_FOUND, "not found"),
        Error::Internal(cause) => {
            tracing::error!(error = %cause, "internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    };
    (status, Json(json!({"error": msg}))).into_response()
}
