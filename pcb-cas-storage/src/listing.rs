//! Read-only scans of both trees.
//!
//! Scans see whatever the write paths have committed at the time of the scan; there
//! is no snapshot isolation.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;

use crate::error::Result;
use crate::shard::SIDECAR_EXTENSION;
use crate::store::ContentStore;

/// Offset/limit window over a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectEntry {
    /// Name of the digest directory the file sits in.
    pub sha256: String,
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabeledEntry {
    pub filename: String,
    pub image_path: PathBuf,
    pub sidecar_path: Option<PathBuf>,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl LabeledEntry {
    pub fn has_sidecar(&self) -> bool {
        self.sidecar_path.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub count: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabeledStats {
    pub count: u64,
    pub total_size_bytes: u64,
    pub with_annotations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub unlabeled: TreeStats,
    pub labeled: LabeledStats,
    pub total_images: u64,
    pub total_size_bytes: u64,
}

fn modified_at(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

impl ContentStore {
    fn is_image(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| !name.starts_with('.') && self.config().extension_allowed(name))
            .unwrap_or(false)
    }

    async fn scan_unlabeled(&self) -> Result<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![self.config().unlabeled_root.clone()];

        while let Some(dir) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = reader.next_entry().await? {
                let path = entry.path();
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    // Removed between readdir and stat.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !meta.is_file() || !self.is_image(&path) {
                    continue;
                }
                let sha256 = path
                    .parent()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                entries.push(ObjectEntry {
                    sha256,
                    filename: entry.file_name().to_string_lossy().into_owned(),
                    size_bytes: meta.len(),
                    modified: modified_at(&meta),
                    path,
                });
            }
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(entries)
    }

    async fn scan_labeled(&self) -> Result<Vec<LabeledEntry>> {
        let mut entries = Vec::new();
        let mut reader = match fs::read_dir(&self.config().labeled_root).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !meta.is_file() || !self.is_image(&path) {
                continue;
            }
            let sidecar = path.with_extension(SIDECAR_EXTENSION);
            let sidecar_path = fs::metadata(&sidecar).await.ok().map(|_| sidecar);
            entries.push(LabeledEntry {
                filename: entry.file_name().to_string_lossy().into_owned(),
                sidecar_path,
                size_bytes: meta.len(),
                modified: modified_at(&meta),
                image_path: path,
            });
        }

        entries.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.image_path.cmp(&b.image_path))
        });
        Ok(entries)
    }

    /// Every allowed image in the unlabeled tree, newest first.
    pub async fn list_unlabeled(&self, page: Page) -> Result<Vec<ObjectEntry>> {
        Ok(page.apply(self.scan_unlabeled().await?))
    }

    /// Every allowed image directly in the labeled root, newest first.
    pub async fn list_labeled(&self, page: Page) -> Result<Vec<LabeledEntry>> {
        Ok(page.apply(self.scan_labeled().await?))
    }

    pub async fn statistics(&self) -> Result<StoreStats> {
        let (unlabeled, labeled) = tokio::try_join!(self.scan_unlabeled(), self.scan_labeled())?;

        let unlabeled = TreeStats {
            count: unlabeled.len() as u64,
            total_size_bytes: unlabeled.iter().map(|e| e.size_bytes).sum(),
        };
        let labeled = LabeledStats {
            count: labeled.len() as u64,
            total_size_bytes: labeled.iter().map(|e| e.size_bytes).sum(),
            with_annotations: labeled.iter().filter(|e| e.has_sidecar()).count() as u64,
        };

        Ok(StoreStats {
            total_images: unlabeled.count + labeled.count,
            total_size_bytes: unlabeled.total_size_bytes + labeled.total_size_bytes,
            unlabeled,
            labeled,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::config::{Durability, StoreConfig};
    use crate::metrics::SharedMetrics;

    async fn open_store(dir: &TempDir) -> ContentStore {
        let config = StoreConfig::from_data_root(dir.path()).with_durability(Durability::Buffer);
        ContentStore::open(config, SharedMetrics::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_page_apply() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(Page::default().apply(items.clone()).len(), 10);
        assert_eq!(Page::new(2, Some(3)).apply(items.clone()), vec![2, 3, 4]);
        assert_eq!(Page::new(8, Some(5)).apply(items.clone()), vec![8, 9]);
        assert!(Page::new(20, None).apply(items).is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_statistics() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert_eq!(store.statistics().await.unwrap(), StoreStats::default());
    }

    #[tokio::test]
    async fn test_listing_and_statistics() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let a = store.put(&mut &b"joint-a"[..], "a.jpg").await.unwrap().object;
        let b = store.put(&mut &b"joint-bb"[..], "b.png").await.unwrap().object;
        store.put(&mut &b"joint-ccc"[..], "c.bmp").await.unwrap();
        // Files that are not images are never listed.
        tokio::fs::write(store.config().unlabeled_root.join("README.txt"), b"x")
            .await
            .unwrap();

        store
            .promote_to_labeled(&a.digest, "a.jpg", &json!({"result": []}))
            .await
            .unwrap();
        store
            .promote_to_labeled(&b.digest, "b.png", &json!({"result": []}))
            .await
            .unwrap();
        // Labeled image whose sidecar went missing.
        tokio::fs::remove_file(crate::shard::sidecar_path(
            &store.config().labeled_root,
            b.digest.as_str(),
            "b.png",
        ))
        .await
        .unwrap();

        let unlabeled = store.list_unlabeled(Page::default()).await.unwrap();
        assert_eq!(unlabeled.len(), 3);
        let a_entry = unlabeled.iter().find(|e| e.filename == "a.jpg").unwrap();
        assert_eq!(a_entry.sha256, a.digest.as_str());
        assert_eq!(a_entry.size_bytes, 7);
        for pair in unlabeled.windows(2) {
            assert!(pair[0].modified >= pair[1].modified);
        }
        assert_eq!(
            store.list_unlabeled(Page::new(1, Some(1))).await.unwrap().len(),
            1
        );

        let labeled = store.list_labeled(Page::default()).await.unwrap();
        assert_eq!(labeled.len(), 2);
        assert_eq!(labeled.iter().filter(|e| e.has_sidecar()).count(), 1);

        let stats = store.statistics().await.unwrap();
        assert_eq!(
            stats.unlabeled,
            TreeStats {
                count: 3,
                total_size_bytes: 7 + 8 + 9
            }
        );
        assert_eq!(
            stats.labeled,
            LabeledStats {
                count: 2,
                total_size_bytes: 7 + 8,
                with_annotations: 1
            }
        );
        assert_eq!(stats.total_images, 5);
        assert_eq!(stats.total_size_bytes, 24 + 15);
    }
}
