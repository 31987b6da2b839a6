//! One-shot ingestion commands run against the store without the server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use pcb_cas_storage::Digest;

use crate::config::StoreArgs;
use crate::metrics::SharedMetrics;

#[derive(Parser, Debug)]
pub struct PutConfig {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(required = true, help = "Image file to ingest")]
    pub file: PathBuf,

    #[arg(long, help = "Store under this filename instead of the file's own name")]
    pub filename: Option<String>,
}

#[tokio::main]
pub async fn put(args: PutConfig) -> Result<()> {
    let filename = match args.filename {
        Some(name) => name,
        None => args
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", args.file.display()))?,
    };

    let store = args
        .store
        .resolve()?
        .open(SharedMetrics::new().to_store_metrics())
        .await?;
    let mut source = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("Failed to open {}", args.file.display()))?;

    let outcome = store.put(&mut source, &filename).await?;
    let status = if outcome.is_duplicate {
        "already stored"
    } else {
        "stored"
    };
    println!("{status}: {}", outcome.object.digest);
    println!("Path: {}", outcome.object.path.display());
    println!("Size: {} bytes", outcome.object.size_bytes);
    Ok(())
}

#[derive(Parser, Debug)]
pub struct PromoteConfig {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(required = true, help = "SHA-256 of the ingested object")]
    pub sha256: String,

    #[arg(required = true, help = "Filename the object was ingested under")]
    pub filename: String,

    #[arg(required = true, help = "JSON file written verbatim as the sidecar")]
    pub metadata: PathBuf,
}

#[tokio::main]
pub async fn promote(args: PromoteConfig) -> Result<()> {
    let digest = Digest::parse(&args.sha256)?;
    let raw = tokio::fs::read(&args.metadata)
        .await
        .with_context(|| format!("Failed to read {}", args.metadata.display()))?;
    let metadata: serde_json::Value = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not valid JSON", args.metadata.display()))?;

    let store = args
        .store
        .resolve()?
        .open(SharedMetrics::new().to_store_metrics())
        .await?;
    let outcome = store
        .promote_to_labeled(&digest, &args.filename, &metadata)
        .await?;

    println!(
        "{}: {}",
        if outcome.updated { "updated" } else { "labeled" },
        outcome.image_path.display()
    );
    println!("Sidecar: {}", outcome.sidecar_path.display());
    Ok(())
}

#[derive(Parser, Debug)]
pub struct CleanupConfig {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(
        long,
        default_value = "3600",
        help = "Only remove staging entries at least this old; use 0 only while no server is running"
    )]
    pub min_age_secs: u64,
}

#[tokio::main]
pub async fn cleanup_staging(args: CleanupConfig) -> Result<()> {
    let store = args
        .store
        .resolve()?
        .open(SharedMetrics::new().to_store_metrics())
        .await?;
    let removed = store
        .cleanup_staging(Duration::from_secs(args.min_age_secs))
        .await?;
    println!("Removed {removed} staging entries");
    Ok(())
}
