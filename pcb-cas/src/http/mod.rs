mod handlers;
mod responses;

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Body;
use hyper::{Method, Request, Response};

use pcb_cas_storage::ContentStore;

use crate::metrics::SharedMetrics;
use crate::notify::TaskNotifier;

/// Everything a request handler needs, built once at start-up.
pub struct AppState {
    pub store: Arc<ContentStore>,
    pub metrics: SharedMetrics,
    pub notifier: Option<Arc<TaskNotifier>>,
}

/// Ingestion, promotion and query API.
#[derive(Clone)]
pub struct ApiService {
    state: Arc<AppState>,
}

impl ApiService {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Main request handler
    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (route, response) = self.route_request(req).await;
        self.state
            .metrics
            .http_request(route, response.status().as_u16());
        Ok(response)
    }

    async fn route_request<B>(&self, req: Request<B>) -> (&'static str, Response<Full<Bytes>>)
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let state = &self.state;
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let query = query.as_deref();

        match (req.method().clone(), path.as_str()) {
            (Method::GET, "/health") => ("health", handlers::health().await),
            (Method::POST, "/api/v1/upload") => ("upload", handlers::upload(state, req).await),
            (Method::POST, "/api/v1/labeled") => ("labeled", handlers::promote(state, req).await),
            (Method::GET, "/api/v1/images/unlabeled") => {
                ("list_unlabeled", handlers::list_unlabeled(state, query).await)
            }
            (Method::GET, "/api/v1/images/labeled") => {
                ("list_labeled", handlers::list_labeled(state, query).await)
            }
            (Method::GET, "/api/v1/stats") => ("stats", handlers::stats(state).await),
            (Method::GET, p) if p.starts_with("/api/v1/objects/") => {
                let sha256 = p.trim_start_matches("/api/v1/objects/").trim_end_matches('/');
                ("locate", handlers::locate(state, sha256).await)
            }
            _ => ("unknown", responses::not_found()),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use hyper::StatusCode;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use pcb_cas_storage::{Durability, StoreConfig};

    use super::*;

    const JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00\x01\x01\x00\x00\x01\x00\x01\x00\x00\xff\xd9";

    async fn service(dir: &TempDir) -> ApiService {
        let metrics = SharedMetrics::new();
        let config = StoreConfig::from_data_root(dir.path()).with_durability(Durability::Buffer);
        let store = ContentStore::open(config, metrics.to_store_metrics())
            .await
            .unwrap();
        ApiService::new(AppState {
            store: Arc::new(store),
            metrics,
            notifier: None,
        })
    }

    async fn call(
        service: &ApiService,
        method: Method,
        uri: &str,
        body: impl Into<Bytes>,
    ) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(body.into()))
            .unwrap();
        let resp = service.handle_request(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_upload_then_duplicate() {
        let dir = TempDir::new().unwrap();
        let api = service(&dir).await;

        let (status, body) = call(
            &api,
            Method::POST,
            "/api/v1/upload?filename=pcb_1.jpg",
            JPEG,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "stored");
        assert_eq!(body["is_duplicate"], false);
        assert_eq!(body["filename"], "pcb_1.jpg");
        let sha256 = body["sha256"].as_str().unwrap().to_string();
        assert_eq!(sha256.len(), 64);

        let (status, body) = call(
            &api,
            Method::POST,
            "/api/v1/upload?filename=pcb_2.jpg",
            JPEG,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "already_stored");
        assert_eq!(body["filename"], "pcb_1.jpg");
        assert_eq!(body["sha256"], sha256.as_str());

        let (status, body) = call(&api, Method::GET, &format!("/api/v1/objects/{sha256}"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["size_bytes"], JPEG.len() as u64);
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let dir = TempDir::new().unwrap();
        let api = service(&dir).await;

        let (status, _) = call(&api, Method::POST, "/api/v1/upload", JPEG).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &api,
            Method::POST,
            "/api/v1/upload?filename=notes.txt",
            JPEG,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_promote_flow() {
        let dir = TempDir::new().unwrap();
        let api = service(&dir).await;

        let (_, uploaded) = call(
            &api,
            Method::POST,
            "/api/v1/upload?filename=pcb_1.jpg",
            JPEG,
        )
        .await;
        let sha256 = uploaded["sha256"].as_str().unwrap();

        let request = json!({
            "sha256": sha256,
            "filename": "pcb_1.jpg",
            "annotation": {"result": [{"value": {"choices": ["good"]}}]}
        });
        let (status, body) = call(
            &api,
            Method::POST,
            "/api/v1/labeled",
            serde_json::to_vec(&request).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["updated"], false);

        let (status, body) = call(
            &api,
            Method::POST,
            "/api/v1/labeled",
            serde_json::to_vec(&request).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], true);

        let (status, body) = call(&api, Method::GET, "/api/v1/stats", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unlabeled"]["count"], 1);
        assert_eq!(body["labeled"]["count"], 1);
        assert_eq!(body["labeled"]["with_annotations"], 1);
        assert_eq!(body["total_images"], 2);

        let (status, body) = call(&api, Method::GET, "/api/v1/images/labeled?limit=10", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn test_promote_errors() {
        let dir = TempDir::new().unwrap();
        let api = service(&dir).await;

        let unknown = json!({
            "sha256": "ab".repeat(32),
            "filename": "pcb_1.jpg",
            "annotation": {}
        });
        let (status, _) = call(
            &api,
            Method::POST,
            "/api/v1/labeled",
            serde_json::to_vec(&unknown).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let malformed = json!({"sha256": "xyz", "filename": "pcb_1.jpg", "annotation": {}});
        let (status, _) = call(
            &api,
            Method::POST,
            "/api/v1/labeled",
            serde_json::to_vec(&malformed).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&api, Method::POST, "/api/v1/labeled", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_lookup_and_routing() {
        let dir = TempDir::new().unwrap();
        let api = service(&dir).await;

        let (status, _) = call(&api, Method::GET, "/api/v1/objects/not-a-digest", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = format!("/api/v1/objects/{}", "0".repeat(64));
        let (status, _) = call(&api, Method::GET, &missing, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&api, Method::GET, "/api/v1/images/unlabeled?offset=x", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&api, Method::GET, "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, _) = call(&api, Method::DELETE, "/api/v1/stats", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
