use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pcb_cas_storage::{Digest, Page, PutOutcome};

use super::responses;
use super::AppState;

/// Upper bound for JSON request bodies (annotations).
const MAX_JSON_BODY: usize = 16 * 1024 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query
        .unwrap_or("")
        .split('&')
        .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
        .and_then(|v| {
            // form encoding sends spaces as '+'
            let v = v.replace('+', " ");
            let decoded = urlencoding::decode(&v).ok().map(|d| d.into_owned());
            decoded
        })
}

fn parse_page(query: Option<&str>) -> Result<Page, String> {
    let offset = match query_param(query, "offset") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| format!("invalid offset '{v}'"))?,
        None => 0,
    };
    let limit = match query_param(query, "limit") {
        Some(v) => Some(
            v.parse::<usize>()
                .map_err(|_| format!("invalid limit '{v}'"))?,
        ),
        None => None,
    };
    Ok(Page::new(offset, limit))
}

pub async fn health() -> Response<Full<Bytes>> {
    let health = serde_json::json!({
        "status": "healthy",
        "storage": "operational"
    });
    responses::json_response(StatusCode::OK, &health)
}

#[derive(Serialize)]
struct UploadResponse<'a> {
    status: &'static str,
    #[serde(flatten)]
    outcome: &'a PutOutcome,
}

/// `POST /api/v1/upload?filename=<name>`: the request body is the image.
pub async fn upload<B>(state: &Arc<AppState>, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let Some(filename) = query_param(req.uri().query(), "filename") else {
        return responses::bad_request("missing 'filename' query parameter");
    };

    let stream = std::pin::pin!(req.into_body().into_data_stream());
    let outcome = match state.store.put_stream(stream, &filename).await {
        Ok(outcome) => outcome,
        Err(e) => return responses::store_error(&e),
    };

    if outcome.is_duplicate {
        let body = UploadResponse {
            status: "already_stored",
            outcome: &outcome,
        };
        return responses::json_response(StatusCode::OK, &body);
    }

    if let Some(notifier) = &state.notifier {
        notifier.spawn(outcome.object.clone());
    }
    let body = UploadResponse {
        status: "stored",
        outcome: &outcome,
    };
    responses::json_response(StatusCode::CREATED, &body)
}

#[derive(Debug, Deserialize)]
struct PromoteRequest {
    sha256: String,
    filename: String,
    annotation: serde_json::Value,
}

/// `POST /api/v1/labeled` with `{sha256, filename, annotation}`.
pub async fn promote<B>(state: &Arc<AppState>, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body = match Limited::new(req.into_body(), MAX_JSON_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Failed to read promotion request body");
            return responses::bad_request("failed to read request body");
        }
    };
    let request: PromoteRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return responses::bad_request(&format!("invalid request body: {e}")),
    };
    let digest = match Digest::parse(&request.sha256) {
        Ok(digest) => digest,
        Err(e) => return responses::store_error(&e),
    };

    match state
        .store
        .promote_to_labeled(&digest, &request.filename, &request.annotation)
        .await
    {
        Ok(outcome) => {
            let status = if outcome.updated {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            responses::json_response(status, &outcome)
        }
        Err(e) => responses::store_error(&e),
    }
}

/// `GET /api/v1/objects/<sha256>`
pub async fn locate(state: &Arc<AppState>, sha256: &str) -> Response<Full<Bytes>> {
    let digest = match Digest::parse(sha256) {
        Ok(digest) => digest,
        Err(e) => return responses::store_error(&e),
    };
    match state.store.locate(&digest).await {
        Ok(Some(object)) => responses::json_response(StatusCode::OK, &object),
        Ok(None) => {
            debug!(digest = %digest, "Object not found");
            responses::error_response(StatusCode::NOT_FOUND, "Object not found")
        }
        Err(e) => responses::store_error(&e),
    }
}

pub async fn list_unlabeled(state: &Arc<AppState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let page = match parse_page(query) {
        Ok(page) => page,
        Err(msg) => return responses::bad_request(&msg),
    };
    match state.store.list_unlabeled(page).await {
        Ok(items) => {
            let body = serde_json::json!({
                "offset": page.offset,
                "count": items.len(),
                "items": items,
            });
            responses::json_response(StatusCode::OK, &body)
        }
        Err(e) => responses::store_error(&e),
    }
}

pub async fn list_labeled(state: &Arc<AppState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let page = match parse_page(query) {
        Ok(page) => page,
        Err(msg) => return responses::bad_request(&msg),
    };
    match state.store.list_labeled(page).await {
        Ok(items) => {
            let body = serde_json::json!({
                "offset": page.offset,
                "count": items.len(),
                "items": items,
            });
            responses::json_response(StatusCode::OK, &body)
        }
        Err(e) => responses::store_error(&e),
    }
}

pub async fn stats(state: &Arc<AppState>) -> Response<Full<Bytes>> {
    match state.store.statistics().await {
        Ok(stats) => {
            state.metrics.record_stats(&stats);
            responses::json_response(StatusCode::OK, &stats)
        }
        Err(e) => responses::store_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        let q = Some("filename=pcb%201.jpg&limit=5");
        assert_eq!(query_param(q, "filename").as_deref(), Some("pcb 1.jpg"));
        assert_eq!(query_param(q, "limit").as_deref(), Some("5"));
        assert_eq!(query_param(q, "offset"), None);
        assert_eq!(query_param(None, "filename"), None);
        // prefix of another key does not match
        assert_eq!(query_param(Some("filenames=x"), "filename"), None);
    }

    #[test]
    fn test_query_param_plus_is_space() {
        assert_eq!(
            query_param(Some("filename=pcb+1.jpg"), "filename").as_deref(),
            Some("pcb 1.jpg")
        );
        assert_eq!(
            query_param(Some("filename=pcb%2B1.jpg"), "filename").as_deref(),
            Some("pcb+1.jpg")
        );
    }

    #[test]
    fn test_parse_page() {
        assert_eq!(parse_page(None).unwrap(), Page::default());
        assert_eq!(
            parse_page(Some("offset=10&limit=20")).unwrap(),
            Page::new(10, Some(20))
        );
        assert!(parse_page(Some("limit=-1")).is_err());
        assert!(parse_page(Some("offset=abc")).is_err());
    }
}
