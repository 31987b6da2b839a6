//! On-disk naming for both trees.
//!
//! Unlabeled objects: `root/<d[0:2]>/<d[2:4]>/<d>/<filename>`.
//! Labeled images:    `labeled_root/<d[0:8]>_<filename>`.
//! Sidecars:          `labeled_root/<d[0:8]>_<stem>.json`.
//!
//! These layouts are shared with other tools and must not change.

use std::path::{Path, PathBuf};

/// Extension of labeled sidecar documents.
pub const SIDECAR_EXTENSION: &str = "json";

/// Directory holding every file of one digest: `root/<d[0:2]>/<d[2:4]>/<d>`.
pub fn digest_dir(root: &Path, digest: &str) -> PathBuf {
    debug_assert!(digest.len() >= 4, "digest too short to shard: {digest}");
    root.join(&digest[..2]).join(&digest[2..4]).join(digest)
}

/// Location of `filename` stored under `digest`. `filename` is used verbatim.
pub fn resolve(root: &Path, digest: &str, filename: &str) -> PathBuf {
    digest_dir(root, digest).join(filename)
}

fn labeled_prefix(digest: &str) -> &str {
    &digest[..digest.len().min(8)]
}

pub fn labeled_image_path(labeled_root: &Path, digest: &str, filename: &str) -> PathBuf {
    labeled_root.join(format!("{}_{}", labeled_prefix(digest), filename))
}

pub fn sidecar_path(labeled_root: &Path, digest: &str, filename: &str) -> PathBuf {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    labeled_root.join(format!(
        "{}_{}.{}",
        labeled_prefix(digest),
        stem,
        SIDECAR_EXTENSION
    ))
}
