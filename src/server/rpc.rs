//! `POST /rpc/:procedure` handler and the response envelope.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{Instrument, error, info_span};
use uuid::Uuid;

use super::AppState;
use crate::commands::{self, PROCEDURES};
use crate::{Error, ErrorCode, Result};

/// Header carrying the caller identity set by the upstream auth layer.
pub const USER_HEADER: &str = "x-user-id";

/// Header echoing the id assigned to each call.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = self.code();
        if code == ErrorCode::InternalServerError {
            error!("internal error: {}", self);
        }
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": {
                "code": code.as_str(),
                "message": self.public_message(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Read the caller id. A malformed header counts as no identity.
fn caller_id(headers: &HeaderMap) -> Result<Option<i64>> {
    let Some(value) = headers.get(USER_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| Error::Unauthorized(format!("malformed {} header", USER_HEADER)))
}

fn parse_body(body: &Bytes) -> Result<Value> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| Error::BadRequest(format!("Invalid JSON body: {}", e)))
}

async fn dispatch(state: &AppState, procedure: &str, headers: &HeaderMap, body: &Bytes) -> Result<Value> {
    let user_id = caller_id(headers)?;
    let params = parse_body(body)?;
    let mut ws = state.workspace.lock().await;
    let caller = ws.authenticate(user_id)?;
    commands::call(&mut ws, &caller, procedure, params)
}

pub async fn handle(
    State(state): State<AppState>,
    Path(procedure): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("rpc", %request_id, %procedure);
    let result = dispatch(&state, &procedure, &headers, &body)
        .instrument(span)
        .await;

    let mut response = match result {
        Ok(value) => Json(json!({ "result": value })).into_response(),
        Err(e) => e.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// `GET /rpc`: the procedure catalogue.
pub async fn list_procedures() -> Json<Value> {
    Json(json!({ "procedures": PROCEDURES }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_id_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller_id(&headers).unwrap(), None);

        headers.insert(USER_HEADER, HeaderValue::from_static(" 42 "));
        assert_eq!(caller_id(&headers).unwrap(), Some(42));

        headers.insert(USER_HEADER, HeaderValue::from_static("admin"));
        assert!(matches!(caller_id(&headers), Err(Error::Unauthorized(_))));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(&Bytes::from_static(b"  ")).unwrap(), Value::Null);
        assert_eq!(parse_body(&Bytes::from_static(br#"{"id":1}"#)).unwrap()["id"], 1);
        assert!(matches!(
            parse_body(&Bytes::from_static(b"{oops")),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_error_response_status() {
        let response = Error::Forbidden("role viewer cannot manage tasks".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = Error::Other("disk".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
