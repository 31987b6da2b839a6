use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;

use pcb_cas_storage::Digest;

use crate::config::StoreArgs;
use crate::metrics::SharedMetrics;

#[derive(Parser, Debug)]
pub struct RetrieveConfig {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(required = true, help = "SHA-256 of the object")]
    pub sha256: String,

    #[arg(required = true, help = "Destination file path")]
    pub dest: PathBuf,
}

#[tokio::main]
pub async fn retrieve(args: RetrieveConfig) -> Result<()> {
    let digest = Digest::parse(&args.sha256)?;
    let metrics = SharedMetrics::new();
    let store = args.store.resolve()?.open(metrics.to_store_metrics()).await?;

    let object = match store.locate(&digest).await? {
        Some(object) => object,
        None => {
            eprintln!("Object not found");
            return Ok(());
        }
    };

    let mut source = tokio::fs::File::open(&object.path)
        .await
        .with_context(|| format!("Failed to open {}", object.path.display()))?;
    let mut file = tokio::fs::File::create(&args.dest)
        .await
        .with_context(|| format!("Failed to create {}", args.dest.display()))?;

    let copied = tokio::io::copy(&mut source, &mut file).await?;
    file.flush().await?;

    println!(
        "Retrieved {} ({} bytes, stored as {}) to {}",
        digest,
        copied,
        object.filename,
        args.dest.display()
    );
    Ok(())
}
