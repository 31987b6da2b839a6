use anyhow::Result;

use pcb_cas_storage::{ContentStore, Digest, Page};

pub async fn stats(store: &ContentStore) -> Result<()> {
    let stats = store.statistics().await?;

    println!("Unlabeled images: {}", stats.unlabeled.count);
    println!(
        "  Size: {} ({} bytes)",
        format_bytes(stats.unlabeled.total_size_bytes),
        stats.unlabeled.total_size_bytes
    );
    println!("Labeled images: {}", stats.labeled.count);
    println!(
        "  Size: {} ({} bytes)",
        format_bytes(stats.labeled.total_size_bytes),
        stats.labeled.total_size_bytes
    );
    println!("  With annotations: {}", stats.labeled.with_annotations);
    println!("Total images: {}", stats.total_images);
    println!(
        "Total size: {} ({} bytes)",
        format_bytes(stats.total_size_bytes),
        stats.total_size_bytes
    );
    Ok(())
}

pub async fn list_unlabeled(store: &ContentStore, page: Page) -> Result<()> {
    let entries = store.list_unlabeled(page).await?;
    if entries.is_empty() {
        println!("No unlabeled images found");
        return Ok(());
    }

    println!("{:<66} {:<30} {:<12} {:<20}", "SHA256", "Filename", "Size", "Modified");
    println!("{:-<130}", "");
    for entry in entries {
        println!(
            "{:<66} {:<30} {:<12} {:<20}",
            entry.sha256,
            entry.filename,
            format_bytes(entry.size_bytes),
            entry.modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn list_labeled(store: &ContentStore, page: Page) -> Result<()> {
    let entries = store.list_labeled(page).await?;
    if entries.is_empty() {
        println!("No labeled images found");
        return Ok(());
    }

    println!("{:<40} {:<12} {:<12} {:<20}", "Filename", "Size", "Annotated", "Modified");
    println!("{:-<85}", "");
    for entry in entries {
        println!(
            "{:<40} {:<12} {:<12} {:<20}",
            entry.filename,
            format_bytes(entry.size_bytes),
            if entry.has_sidecar() { "yes" } else { "no" },
            entry.modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub async fn locate(store: &ContentStore, sha256: &str) -> Result<()> {
    let digest = Digest::parse(sha256)?;
    match store.locate(&digest).await? {
        Some(object) => {
            println!("Object: {}", object.digest);
            println!("Filename: {}", object.filename);
            println!(
                "Size: {} ({} bytes)",
                format_bytes(object.size_bytes),
                object.size_bytes
            );
            println!("Path: {}", object.path.display());
        }
        None => println!("Object not found"),
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", size, UNITS[unit])
}
