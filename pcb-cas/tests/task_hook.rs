use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::AUTHORIZATION;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

use pcb_cas::config::NotifierConfig;
use pcb_cas::metrics::SharedMetrics;
use pcb_cas::notify::TaskNotifier;
use pcb_cas::retry::RetryPolicy;
use pcb_cas_storage::{ContentStore, Durability, StoreConfig};

#[derive(Default)]
struct Recorded {
    calls: AtomicU32,
    auth: Mutex<Vec<Option<String>>>,
    bodies: Mutex<Vec<Value>>,
}

/// Annotation tool stand-in: answers 503 until `fail_first` calls were made.
async fn spawn_hook(fail_first: u32) -> (SocketAddr, Arc<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorded = Arc::new(Recorded::default());

    let state = recorded.clone();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let state = state.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<Incoming>| {
                    let state = state.clone();
                    async move {
                        let auth = req
                            .headers()
                            .get(AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        state.auth.lock().unwrap().push(auth);
                        state
                            .bodies
                            .lock()
                            .unwrap()
                            .push(serde_json::from_slice(&body).unwrap());

                        let n = state.calls.fetch_add(1, Ordering::SeqCst) + 1;
                        let mut resp = if n <= fail_first {
                            let mut resp = Response::new(Full::new(Bytes::from("busy")));
                            *resp.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                            resp
                        } else {
                            let mut resp = Response::new(Full::new(Bytes::from(
                                r#"{"task_count": 1, "task_ids": [77]}"#,
                            )));
                            *resp.status_mut() = StatusCode::CREATED;
                            resp
                        };
                        resp.headers_mut().insert(
                            hyper::header::CONTENT_TYPE,
                            hyper::header::HeaderValue::from_static("application/json"),
                        );
                        Ok::<_, Infallible>(resp)
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(socket), svc)
                    .await;
            });
        }
    });

    (addr, recorded)
}

async fn ingest(dir: &TempDir) -> pcb_cas_storage::StoredObject {
    let config = StoreConfig::from_data_root(dir.path()).with_durability(Durability::Buffer);
    let store = ContentStore::open(config, SharedMetrics::new().to_store_metrics())
        .await
        .unwrap();
    store
        .put(&mut &b"\xff\xd8joint\xff\xd9"[..], "pcb_1.jpg")
        .await
        .unwrap()
        .object
}

fn notifier(addr: SocketAddr, dir: &TempDir, max_attempts: u32) -> TaskNotifier {
    TaskNotifier::new(
        NotifierConfig {
            url: format!("http://{addr}/api/projects/1/import"),
            token: Some("secret".to_string()),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
        },
        dir.path().to_path_buf(),
        SharedMetrics::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn creates_task_after_transient_failures() {
    let dir = TempDir::new().unwrap();
    let object = ingest(&dir).await;
    let (addr, recorded) = spawn_hook(2).await;

    let task = notifier(addr, &dir, 5).notify(&object).await.unwrap();
    assert_eq!(task.id, 77);
    assert_eq!(recorded.calls.load(Ordering::SeqCst), 3);

    let auth = recorded.auth.lock().unwrap();
    assert!(auth.iter().all(|a| a.as_deref() == Some("Token secret")));

    let bodies = recorded.bodies.lock().unwrap();
    let data = &bodies[0]["data"];
    assert_eq!(data["sha256"], object.digest.as_str());
    assert_eq!(data["filename"], "pcb_1.jpg");
    let digest = object.digest.as_str();
    assert_eq!(
        data["image"],
        format!(
            "/data/local-files/?d=images/unlabeled/{}/{}/{}/pcb_1.jpg",
            &digest[..2],
            &digest[2..4],
            digest
        )
    );
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let dir = TempDir::new().unwrap();
    let object = ingest(&dir).await;
    let (addr, recorded) = spawn_hook(u32::MAX).await;

    let err = notifier(addr, &dir, 3).notify(&object).await.unwrap_err();
    assert!(err.to_string().contains("503"), "{err}");
    assert_eq!(recorded.calls.load(Ordering::SeqCst), 3);
}
