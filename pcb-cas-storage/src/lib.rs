//! # PCB CAS Storage Library
//!
//! Content-addressed storage for board joint images, with deduplication by SHA-256
//! and a separate tree of labeled copies.
//!
//! ## Features
//!
//! - **Streaming hashing**: inputs are hashed through a fixed 1 MiB buffer
//! - **Sharded layout**: `root/ab/cd/<sha256>/<filename>`, at most 256 entries per shard level
//! - **Race-safe ingestion**: staged writes committed by a single atomic rename keyed by digest
//! - **Labeled promotion**: copy into a flat labeled tree with a JSON sidecar, rolled back on failure
//! - **Listings and statistics** over both trees
//!
//! ## Example
//!
//! ```no_run
//! use pcb_cas_storage::{ContentStore, StoreConfig, SharedMetrics};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ContentStore::open(
//!     StoreConfig::from_data_root("/data"),
//!     SharedMetrics::default(),
//! )
//! .await?;
//!
//! let image = tokio::fs::read("pcb_1.jpg").await?;
//! let outcome = store.put(&mut &image[..], "pcb_1.jpg").await?;
//! println!("{} duplicate={}", outcome.object.path.display(), outcome.is_duplicate);
//!
//! let annotation = serde_json::json!({ "result": [] });
//! store
//!     .promote_to_labeled(&outcome.object.digest, "pcb_1.jpg", &annotation)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod digest;
pub mod error;
pub mod hasher;
pub mod listing;
pub mod metrics;
pub mod shard;
pub mod store;

pub use config::{Durability, StoreConfig, DEFAULT_ALLOWED_EXTENSIONS};
pub use digest::Digest;
pub use error::StoreError;
pub use listing::{LabeledEntry, LabeledStats, ObjectEntry, Page, StoreStats, TreeStats};
pub use metrics::{MetricsCollector, NoOpMetrics, SharedMetrics};
pub use store::{ContentStore, PromoteOutcome, PutOutcome, StoredObject};
