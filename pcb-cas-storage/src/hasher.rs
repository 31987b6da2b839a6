//! Streaming SHA-256 content hashing.
//!
//! Inputs are consumed through a fixed 1 MiB buffer so memory use does not depend
//! on the object size.

use std::path::Path;

use sha2::{Digest as _, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::digest::Digest;
use crate::error::{Result, StoreError};

/// Read buffer size used while hashing.
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Hash everything `reader` yields until EOF.
///
/// Any read error aborts the hash; a partial digest is never returned.
pub async fn hash_reader<R>(reader: &mut R) -> Result<Digest>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| StoreError::read_failure("input stream", e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Digest::from_hash(&hasher.finalize()))
}

pub async fn hash_file(path: &Path) -> Result<Digest> {
    let mut file = File::open(path)
        .await
        .map_err(|e| StoreError::read_failure(path.display().to_string(), e))?;
    hash_reader(&mut file).await.map_err(|e| match e {
        StoreError::ReadFailure { source, .. } => {
            StoreError::read_failure(path.display().to_string(), source)
        }
        other => other,
    })
}

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> Digest {
    Digest::from_hash(&Sha256::digest(data))
}
