//! Task creation in the annotation tool for freshly ingested images.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pcb_cas_storage::StoredObject;

use crate::config::NotifierConfig;
use crate::metrics::SharedMetrics;
use crate::retry::RetryPolicy;

const LOCAL_FILES_PREFIX: &str = "/data/local-files/?d=";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reference the annotation tool resolves against its local-files document root.
///
/// Each path component is percent-encoded and the components are joined with `/`.
pub fn local_files_url(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => {
                Some(urlencoding::encode(&part.to_string_lossy()).into_owned())
            }
            _ => None,
        })
        .collect();
    format!("{LOCAL_FILES_PREFIX}{}", parts.join("/"))
}

#[derive(Debug, Serialize)]
struct TaskData<'a> {
    image: String,
    sha256: &'a str,
    filename: &'a str,
}

#[derive(Debug, Serialize)]
struct TaskRequest<'a> {
    data: TaskData<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedTask {
    pub id: u64,
}

/// Shapes the annotation tool answers task creation with, depending on endpoint and version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskResponse {
    Single(CreatedTask),
    Paged { results: Vec<CreatedTask> },
    Imported { task_ids: Vec<u64> },
    List(Vec<CreatedTask>),
}

impl TaskResponse {
    fn into_created(self) -> Option<CreatedTask> {
        match self {
            TaskResponse::Single(task) => Some(task),
            TaskResponse::Paged { results } | TaskResponse::List(results) => {
                results.into_iter().next()
            }
            TaskResponse::Imported { task_ids } => {
                task_ids.into_iter().next().map(|id| CreatedTask { id })
            }
        }
    }
}

/// Normalize a task creation response body into the first created task.
pub fn parse_task_response(body: &[u8]) -> Result<CreatedTask> {
    let response: TaskResponse =
        serde_json::from_slice(body).context("Unrecognized task creation response")?;
    response
        .into_created()
        .ok_or_else(|| anyhow!("Task creation response contained no task"))
}

pub struct TaskNotifier {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    retry: RetryPolicy,
    document_root: PathBuf,
    metrics: SharedMetrics,
}

impl TaskNotifier {
    pub fn new(
        config: NotifierConfig,
        document_root: PathBuf,
        metrics: SharedMetrics,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: config.url,
            token: config.token,
            retry: config.retry,
            document_root,
            metrics,
        })
    }

    pub fn image_url(&self, object: &StoredObject) -> Result<String> {
        let relative = object.relative_path(&self.document_root).with_context(|| {
            format!(
                "{} is outside document root {}",
                object.path.display(),
                self.document_root.display()
            )
        })?;
        Ok(local_files_url(relative))
    }

    /// Create one labeling task for `object`, retrying per the configured policy.
    pub async fn notify(&self, object: &StoredObject) -> Result<CreatedTask> {
        let request = TaskRequest {
            data: TaskData {
                image: self.image_url(object)?,
                sha256: object.digest.as_str(),
                filename: &object.filename,
            },
        };

        let result = self
            .retry
            .run("create labeling task", |_| self.post(&request))
            .await;
        self.metrics.task_notified(result.is_ok());
        result
    }

    async fn post(&self, request: &TaskRequest<'_>) -> Result<CreatedTask> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Token {token}"));
        }

        let response = builder.send().await.context("Task hook request failed")?;
        let status = response.status();
        let body = response.bytes().await.context("Failed to read task hook response")?;
        if !status.is_success() {
            bail!(
                "Task hook returned {status}: {}",
                String::from_utf8_lossy(&body)
            );
        }
        parse_task_response(&body)
    }

    /// Fire-and-forget notification; failures are logged, never propagated.
    pub fn spawn(self: &Arc<Self>, object: StoredObject) {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            match notifier.notify(&object).await {
                Ok(task) => {
                    info!(digest = %object.digest, task_id = task.id, "Created labeling task")
                }
                Err(e) => warn!(
                    digest = %object.digest,
                    path = %object.path.display(),
                    error = %e,
                    "Failed to create labeling task"
                ),
            }
        });
    }
}
