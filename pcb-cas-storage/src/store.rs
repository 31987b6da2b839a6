//! Content-addressed ingestion and labeled promotion.
//!
//! Uploads are written into a private staging directory, hashed, and committed by
//! renaming that directory onto `root/ab/cd/<digest>`. Renaming a directory onto an
//! existing non-empty directory fails, so the rename is a move-if-absent keyed by
//! digest: of several concurrent uploads of the same bytes exactly one commits and
//! the others come back as duplicates. No in-process locking is involved.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Durability, StoreConfig};
use crate::digest::Digest;
use crate::error::{Result, StoreError};
use crate::hasher::hash_file;
use crate::metrics::SharedMetrics;
use crate::shard;

/// Copy buffer used while staging an upload.
const STAGING_BUFFER_SIZE: usize = 256 * 1024;

/// An object committed to the unlabeled tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    #[serde(rename = "sha256")]
    pub digest: Digest,
    /// Filename of the first successful commit of this digest.
    pub filename: String,
    pub size_bytes: u64,
    pub path: PathBuf,
}

impl StoredObject {
    /// Path below `root`, e.g. `images/unlabeled/ab/cd/<digest>/pcb_1.jpg` for a data root.
    pub fn relative_path(&self, root: &Path) -> Option<&Path> {
        self.path.strip_prefix(root).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutOutcome {
    #[serde(flatten)]
    pub object: StoredObject,
    pub is_duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromoteOutcome {
    #[serde(rename = "sha256")]
    pub digest: Digest,
    pub image_path: PathBuf,
    pub sidecar_path: PathBuf,
    /// `true` when the labeled image already existed and only the sidecar was replaced.
    pub updated: bool,
}

/// Per-call staging directory holding exactly one file.
struct Staging {
    dir: PathBuf,
    file: PathBuf,
}

impl Staging {
    async fn create(staging_root: &Path, filename: &str) -> Result<(Self, File)> {
        let dir = staging_root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::read_failure(dir.display().to_string(), e))?;
        let file_path = dir.join(filename);
        let file = match File::create(&file_path).await {
            Ok(file) => file,
            Err(e) => {
                let _ = fs::remove_dir_all(&dir).await;
                return Err(StoreError::read_failure(file_path.display().to_string(), e));
            }
        };
        Ok((
            Self {
                dir,
                file: file_path,
            },
            file,
        ))
    }

    async fn discard(self) {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.dir.display(), error = %e, "failed to remove staging directory"),
        }
    }
}

async fn flush(file: &mut File, durability: Durability) -> io::Result<()> {
    file.flush().await?;
    match durability {
        Durability::Buffer => Ok(()),
        Durability::Fsync => file.sync_all().await,
        Durability::Fdatasync => file.sync_data().await,
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Newest modification time of a staging entry and, for a directory, of the files in
/// it. Writing into a staged file does not touch its directory's mtime.
async fn last_activity(path: &Path, meta: &std::fs::Metadata) -> Option<SystemTime> {
    let mut newest = meta.modified().ok();
    if !meta.is_dir() {
        return newest;
    }
    let Ok(mut entries) = fs::read_dir(path).await else {
        return newest;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Some(modified) = entry.metadata().await.ok().and_then(|m| m.modified().ok()) {
            newest = newest.max(Some(modified));
        }
    }
    newest
}

/// Where a labeled write stopped.
struct LabeledWriteFailure {
    source: io::Error,
    /// The sidecar rename succeeded before the failure.
    sidecar_written: bool,
}

/// Owner of the unlabeled and labeled trees.
///
/// Build one at start-up and share it (e.g. behind an `Arc`); every operation is
/// safe to call concurrently.
pub struct ContentStore {
    config: StoreConfig,
    metrics: SharedMetrics,
}

impl ContentStore {
    /// Open the store, creating its three root directories if needed.
    pub async fn open(config: StoreConfig, metrics: SharedMetrics) -> Result<Self> {
        for dir in [
            &config.unlabeled_root,
            &config.labeled_root,
            &config.staging_root,
        ] {
            fs::create_dir_all(dir).await?;
        }

        info!(
            unlabeled = %config.unlabeled_root.display(),
            labeled = %config.labeled_root.display(),
            staging = %config.staging_root.display(),
            "Initialized content store"
        );

        Ok(Self { config, metrics })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Where `filename` stored under `digest` lives in the unlabeled tree.
    pub fn location(&self, digest: &Digest, filename: &str) -> PathBuf {
        shard::resolve(&self.config.unlabeled_root, digest.as_str(), filename)
    }

    fn validate_filename(&self, filename: &str) -> Result<()> {
        if filename.is_empty()
            || filename == "."
            || filename == ".."
            || filename.contains(['/', '\\', '\0'])
        {
            return Err(StoreError::Validation(format!(
                "invalid filename '{filename}': must be a single path component"
            )));
        }
        if !self.config.extension_allowed(filename) {
            return Err(StoreError::Validation(format!(
                "file extension of '{filename}' not allowed, allowed: {}",
                self.config.allowed_extensions.join(" ")
            )));
        }
        Ok(())
    }

    fn check_size(&self, written: u64) -> Result<()> {
        match self.config.max_object_size {
            Some(max) if written > max => Err(StoreError::Validation(format!(
                "object exceeds maximum size of {max} bytes"
            ))),
            _ => Ok(()),
        }
    }

    /// Ingest everything `reader` yields under `filename`.
    pub async fn put<R>(&self, reader: &mut R, filename: &str) -> Result<PutOutcome>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.validate_filename(filename)?;
        let (staging, mut file) = Staging::create(&self.config.staging_root, filename).await?;

        let mut buf = vec![0u8; STAGING_BUFFER_SIZE];
        let mut written = 0u64;
        let copied: Result<()> = async {
            loop {
                let n = reader
                    .read(&mut buf)
                    .await
                    .map_err(|e| StoreError::read_failure("input stream", e))?;
                if n == 0 {
                    return Ok::<(), StoreError>(());
                }
                written += n as u64;
                self.check_size(written)?;
                file.write_all(&buf[..n])
                    .await
                    .map_err(|e| StoreError::read_failure(staging.file.display().to_string(), e))?;
            }
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            staging.discard().await;
            self.metrics.put_failed();
            return Err(e);
        }
        self.commit(staging, file, filename, written).await
    }

    /// Ingest a stream of byte chunks, e.g. an HTTP request body.
    pub async fn put_stream<S, E>(&self, mut stream: S, filename: &str) -> Result<PutOutcome>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.validate_filename(filename)?;
        let (staging, mut file) = Staging::create(&self.config.staging_root, filename).await?;

        let mut written = 0u64;
        let copied: Result<()> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk
                    .map_err(|e| StoreError::read_failure("input stream", io::Error::other(e)))?;
                written += chunk.len() as u64;
                self.check_size(written)?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| StoreError::read_failure(staging.file.display().to_string(), e))?;
            }
            Ok::<(), StoreError>(())
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            staging.discard().await;
            self.metrics.put_failed();
            return Err(e);
        }
        self.commit(staging, file, filename, written).await
    }

    async fn commit(
        &self,
        staging: Staging,
        mut file: File,
        filename: &str,
        size: u64,
    ) -> Result<PutOutcome> {
        self.metrics.bytes_received(size);

        if let Err(e) = flush(&mut file, self.config.durability).await {
            drop(file);
            let target = staging.file.display().to_string();
            staging.discard().await;
            self.metrics.put_failed();
            return Err(StoreError::read_failure(target, e));
        }
        drop(file);

        let digest = match hash_file(&staging.file).await {
            Ok(digest) => digest,
            Err(e) => {
                staging.discard().await;
                self.metrics.put_failed();
                return Err(e);
            }
        };

        match self.locate(&digest).await {
            Ok(Some(existing)) => {
                staging.discard().await;
                return Ok(self.duplicate(existing, filename));
            }
            Ok(None) => {}
            Err(e) => {
                staging.discard().await;
                self.metrics.put_failed();
                return Err(e);
            }
        }

        let target = shard::digest_dir(&self.config.unlabeled_root, digest.as_str());
        if let Some(parent) = target.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                staging.discard().await;
                self.metrics.put_failed();
                return Err(e.into());
            }
        }

        match fs::rename(&staging.dir, &target).await {
            Ok(()) => {
                let path = target.join(filename);
                info!(digest = %digest, path = %path.display(), size, "Stored object");
                self.metrics.object_stored(size);
                Ok(PutOutcome {
                    object: StoredObject {
                        digest,
                        filename: filename.to_string(),
                        size_bytes: size,
                        path,
                    },
                    is_duplicate: false,
                })
            }
            Err(e) => {
                staging.discard().await;
                // Lost the race against a concurrent commit of the same digest.
                if fs::metadata(&target).await.is_ok() {
                    if let Some(existing) = self.locate(&digest).await? {
                        return Ok(self.duplicate(existing, filename));
                    }
                }
                self.metrics.put_failed();
                Err(e.into())
            }
        }
    }

    fn duplicate(&self, existing: StoredObject, filename: &str) -> PutOutcome {
        debug!(
            digest = %existing.digest,
            stored_as = %existing.filename,
            uploaded_as = %filename,
            "Duplicate object"
        );
        self.metrics.object_duplicate();
        PutOutcome {
            object: existing,
            is_duplicate: true,
        }
    }

    /// Find the committed object for `digest` without knowing its filename.
    pub async fn locate(&self, digest: &Digest) -> Result<Option<StoredObject>> {
        let dir = shard::digest_dir(&self.config.unlabeled_root, digest.as_str());
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut found: Option<(String, u64)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if found.as_ref().map_or(true, |(current, _)| name < *current) {
                found = Some((name, meta.len()));
            }
        }

        Ok(found.map(|(filename, size_bytes)| StoredObject {
            digest: digest.clone(),
            path: dir.join(&filename),
            filename,
            size_bytes,
        }))
    }

    /// Copy an ingested object into the labeled tree next to a JSON sidecar holding
    /// `metadata` verbatim. A second call for the same object only replaces the sidecar.
    pub async fn promote_to_labeled<M>(
        &self,
        digest: &Digest,
        filename: &str,
        metadata: &M,
    ) -> Result<PromoteOutcome>
    where
        M: Serialize + ?Sized,
    {
        self.validate_filename(filename)?;

        let source = self.location(digest, filename);
        if fs::metadata(&source).await.is_err() {
            return Err(StoreError::NotFound {
                digest: digest.to_string(),
                path: source,
            });
        }

        let document = serde_json::to_vec_pretty(metadata)?;
        let labeled_root = &self.config.labeled_root;
        let image_path = shard::labeled_image_path(labeled_root, digest.as_str(), filename);
        let sidecar_path = shard::sidecar_path(labeled_root, digest.as_str(), filename);
        fs::create_dir_all(labeled_root).await?;

        if fs::metadata(&image_path).await.is_ok() {
            if let Err(e) = self.write_sidecar(&sidecar_path, &document).await {
                self.metrics.promote_failed();
                return Err(StoreError::PartialWrite {
                    path: sidecar_path,
                    source: e,
                });
            }
            info!(digest = %digest, sidecar = %sidecar_path.display(), "Updated labeled metadata");
            self.metrics.labeled_updated();
            return Ok(PromoteOutcome {
                digest: digest.clone(),
                image_path,
                sidecar_path,
                updated: true,
            });
        }

        let temp_image = labeled_root.join(format!(".{}.image.tmp", Uuid::new_v4()));
        if let Err(failure) = self
            .write_labeled(&source, &temp_image, &image_path, &sidecar_path, &document)
            .await
        {
            self.rollback_labeled(&temp_image, &image_path, &sidecar_path, failure.sidecar_written)
                .await;
            self.metrics.promote_failed();
            return Err(StoreError::PartialWrite {
                path: image_path,
                source: failure.source,
            });
        }

        info!(
            digest = %digest,
            image = %image_path.display(),
            sidecar = %sidecar_path.display(),
            "Stored labeled image"
        );
        self.metrics.labeled_stored();
        Ok(PromoteOutcome {
            digest: digest.clone(),
            image_path,
            sidecar_path,
            updated: false,
        })
    }

    /// The image is renamed into place last, so it never exists without a sidecar.
    async fn write_labeled(
        &self,
        source: &Path,
        temp_image: &Path,
        image_path: &Path,
        sidecar_path: &Path,
        document: &[u8],
    ) -> std::result::Result<(), LabeledWriteFailure> {
        let copied: io::Result<()> = async {
            fs::copy(source, temp_image).await?;
            if self.config.durability != Durability::Buffer {
                let mut file = fs::OpenOptions::new().write(true).open(temp_image).await?;
                flush(&mut file, self.config.durability).await?;
            }
            self.write_sidecar(sidecar_path, document).await
        }
        .await;
        copied.map_err(|source| LabeledWriteFailure {
            source,
            sidecar_written: false,
        })?;

        fs::rename(temp_image, image_path)
            .await
            .map_err(|source| LabeledWriteFailure {
                source,
                sidecar_written: true,
            })
    }

    /// Only a sidecar this call put in place is removed; one written by a concurrent
    /// promotion belongs to that promotion's image.
    async fn rollback_labeled(
        &self,
        temp_image: &Path,
        image_path: &Path,
        sidecar_path: &Path,
        sidecar_written: bool,
    ) {
        if let Err(e) = remove_if_present(temp_image).await {
            warn!(path = %temp_image.display(), error = %e, "failed to remove partial labeled image");
        }
        if !sidecar_written {
            return;
        }
        // A concurrent promotion may have completed the pair in the meantime.
        if fs::metadata(image_path).await.is_ok() {
            return;
        }
        if let Err(e) = remove_if_present(sidecar_path).await {
            warn!(path = %sidecar_path.display(), error = %e, "failed to remove partial sidecar");
        }
    }

    /// Replace the sidecar through a temporary file so readers never see a torn document.
    async fn write_sidecar(&self, sidecar_path: &Path, document: &[u8]) -> io::Result<()> {
        let temp = self
            .config
            .labeled_root
            .join(format!(".{}.sidecar.tmp", Uuid::new_v4()));
        let written: io::Result<()> = async {
            let mut file = File::create(&temp).await?;
            file.write_all(document).await?;
            flush(&mut file, self.config.durability).await?;
            drop(file);
            fs::rename(&temp, sidecar_path).await
        }
        .await;
        if written.is_err() {
            let _ = remove_if_present(&temp).await;
        }
        written
    }

    /// Remove staging leftovers older than `min_age`. Returns how many were removed.
    ///
    /// Uploads in flight own their staging directories, so a non-zero `min_age` is
    /// needed while the store is serving requests.
    pub async fn cleanup_staging(&self, min_age: Duration) -> Result<usize> {
        let mut entries = match fs::read_dir(&self.config.staging_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let age = last_activity(&path, &meta)
                .await
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < min_age {
                continue;
            }

            let result = if meta.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staging entry"),
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up staging area");
            self.metrics.staging_removed(removed as u64);
        }
        Ok(removed)
    }
}
