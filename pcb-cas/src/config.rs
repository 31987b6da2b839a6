use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;

use pcb_cas_storage::{ContentStore, Durability, SharedMetrics, StoreConfig};

use crate::retry::RetryPolicy;

pub const DEFAULT_DATA_ROOT: &str = "/data";

/// Optional TOML configuration file. Every value can be overridden by a CLI flag or
/// the matching `PCB_CAS_*` environment variable.
///
/// ```toml
/// data_root = "/data"
/// allowed_extensions = [".jpg", ".png"]
/// max_upload_size_mb = 50
/// durability = "fdatasync"
///
/// [task_hook]
/// url = "http://label-studio:8080/api/projects/1/import"
/// token = "secret"
/// max_attempts = 5
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub data_root: Option<PathBuf>,
    pub unlabeled_root: Option<PathBuf>,
    pub labeled_root: Option<PathBuf>,
    pub staging_root: Option<PathBuf>,
    pub document_root: Option<PathBuf>,
    pub allowed_extensions: Option<Vec<String>>,
    pub max_upload_size_mb: Option<u64>,
    pub durability: Option<String>,
    pub task_hook: Option<TaskHookFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskHookFileConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Where the store lives and how it ingests.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    #[arg(long, env = "PCB_CAS_CONFIG", help = "Path to a TOML config file")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "PCB_CAS_DATA_ROOT",
        help = "Base directory; the trees default to images/unlabeled, images/labeled and __incoming__ below it [default: /data]"
    )]
    pub data_root: Option<PathBuf>,

    #[arg(long, env = "PCB_CAS_UNLABELED_ROOT")]
    pub unlabeled_root: Option<PathBuf>,

    #[arg(long, env = "PCB_CAS_LABELED_ROOT")]
    pub labeled_root: Option<PathBuf>,

    #[arg(
        long,
        env = "PCB_CAS_STAGING_ROOT",
        help = "Staging directory, must be on the same filesystem as the unlabeled root"
    )]
    pub staging_root: Option<PathBuf>,

    #[arg(
        long,
        env = "PCB_CAS_ALLOWED_EXTENSIONS",
        value_delimiter = ',',
        help = "Accepted file extensions [default: .jpg,.jpeg,.png,.bmp]"
    )]
    pub allowed_extensions: Option<Vec<String>>,

    #[arg(long, env = "PCB_CAS_MAX_UPLOAD_SIZE_MB", help = "Reject larger uploads")]
    pub max_upload_size_mb: Option<u64>,

    #[arg(
        long,
        env = "PCB_CAS_DURABILITY",
        help = "Durability level (buffer, fsync, fdatasync) [default: fdatasync]"
    )]
    pub durability: Option<Durability>,
}

/// Store settings after merging CLI/env, the config file and defaults.
#[derive(Debug, Clone)]
pub struct ResolvedStore {
    pub data_root: PathBuf,
    pub store: StoreConfig,
    pub file: FileConfig,
}

impl StoreArgs {
    pub fn resolve(&self) -> Result<ResolvedStore> {
        let file = match &self.config {
            Some(path) => FileConfig::load_from_file(path)?,
            None => FileConfig::default(),
        };

        let data_root = self
            .data_root
            .clone()
            .or_else(|| file.data_root.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT));

        let durability = match (&self.durability, &file.durability) {
            (Some(d), _) => *d,
            (None, Some(s)) => s.parse::<Durability>().map_err(anyhow::Error::msg)?,
            (None, None) => Durability::default(),
        };

        let mut store = StoreConfig::from_data_root(&data_root)
            .with_durability(durability)
            .with_max_object_size(
                self.max_upload_size_mb
                    .or(file.max_upload_size_mb)
                    .map(|mb| mb.saturating_mul(1024 * 1024)),
            );
        if let Some(extensions) = self
            .allowed_extensions
            .as_ref()
            .or(file.allowed_extensions.as_ref())
        {
            store = store.with_allowed_extensions(extensions);
        }
        if let Some(root) = self.unlabeled_root.clone().or(file.unlabeled_root.clone()) {
            store.unlabeled_root = root;
        }
        if let Some(root) = self.labeled_root.clone().or(file.labeled_root.clone()) {
            store.labeled_root = root;
        }
        if let Some(root) = self.staging_root.clone().or(file.staging_root.clone()) {
            store.staging_root = root;
        }

        Ok(ResolvedStore {
            data_root,
            store,
            file,
        })
    }
}

impl ResolvedStore {
    pub async fn open(&self, metrics: SharedMetrics) -> Result<ContentStore> {
        ContentStore::open(self.store.clone(), metrics)
            .await
            .context("Failed to open content store")
    }
}

/// Outbound task creation in the annotation tool.
#[derive(Args, Debug, Clone, Default)]
pub struct NotifierArgs {
    #[arg(
        long,
        env = "PCB_CAS_TASK_HOOK_URL",
        help = "POST a labeling task here for every newly stored image"
    )]
    pub task_hook_url: Option<String>,

    #[arg(long, env = "PCB_CAS_TASK_HOOK_TOKEN", hide_env_values = true)]
    pub task_hook_token: Option<String>,

    #[arg(long, env = "PCB_CAS_TASK_HOOK_MAX_ATTEMPTS")]
    pub task_hook_max_attempts: Option<u32>,

    #[arg(long, env = "PCB_CAS_TASK_HOOK_BASE_DELAY_MS")]
    pub task_hook_base_delay_ms: Option<u64>,

    #[arg(long, env = "PCB_CAS_TASK_HOOK_MULTIPLIER")]
    pub task_hook_multiplier: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifierConfig {
    pub url: String,
    pub token: Option<String>,
    pub retry: RetryPolicy,
}

impl NotifierArgs {
    /// `None` when no hook URL is configured anywhere.
    pub fn resolve(&self, file: &FileConfig) -> Option<NotifierConfig> {
        let hook = file.task_hook.clone().unwrap_or_default();
        let url = self.task_hook_url.clone().or(hook.url)?;
        let defaults = RetryPolicy::default();

        Some(NotifierConfig {
            url,
            token: self.task_hook_token.clone().or(hook.token),
            retry: RetryPolicy {
                max_attempts: self
                    .task_hook_max_attempts
                    .or(hook.max_attempts)
                    .unwrap_or(defaults.max_attempts),
                base_delay: self
                    .task_hook_base_delay_ms
                    .or(hook.base_delay_ms)
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.base_delay),
                multiplier: self
                    .task_hook_multiplier
                    .or(hook.multiplier)
                    .unwrap_or(defaults.multiplier),
            },
        })
    }
}
