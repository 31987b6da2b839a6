use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

use pcb_cas_storage::StoreError;

pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, data: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
    let mut resp = Response::new(Full::new(Bytes::from(json)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let error = serde_json::json!({
        "error": message,
        "status": status.as_u16()
    });
    json_response(status, &error)
}

pub fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

pub fn bad_request(message: &str) -> Response<Full<Bytes>> {
    error_response(StatusCode::BAD_REQUEST, message)
}

pub fn status_for(err: &StoreError) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub fn store_error(err: &StoreError) -> Response<Full<Bytes>> {
    let status = status_for(err);
    if status.is_server_error() {
        error!(error = %err, "Storage operation failed");
    }
    error_response(status, &err.to_string())
}
