//! # donorsync-sync
//!
//! The sync engine: pulls donors, projects and donations from a CRM adapter
//! into the local store, and pushes local records the CRM has never seen.
//!
//! ## Components
//!
//! - [`BatchUpserter`] - Diff a page against the store and write only what changed
//! - [`BucketHandle`] - Per-run fallback project for unlinked donations
//! - [`SyncOrchestrator`] - Single-flight runs, page loops and status transitions
//! - [`IntegrationManager`] - Integration lookup, token refresh and sweeps
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use donorsync_sync::{IntegrationManager, SyncConfig, SyncMode, SyncOrchestrator};
//!
//! let store = Arc::new(PgStore::new(pool));
//! let orchestrator = SyncOrchestrator::new(store.clone(), store.clone(), config.clone());
//! let manager = IntegrationManager::new(Arc::new(registry), store, orchestrator, config);
//!
//! let result = manager
//!     .sync_now(org, &provider, SyncMode::Separate, &CancellationToken::new())
//!     .await?;
//! println!("{} records, {} failed", result.total_records(), result.total_failed());
//! ```

pub mod bucket;
pub mod config;
pub mod diff;
pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod push;
pub mod types;
pub mod upserter;

pub use bucket::{bucket_name, BucketHandle};
pub use config::{SyncConfig, MAX_UPDATE_CHUNK_SIZE};
pub use error::{SyncError, SyncOutcome};
pub use manager::IntegrationManager;
pub use orchestrator::SyncOrchestrator;
pub use types::{EntityKind, IntegrationRun, SyncMode};
pub use upserter::{BatchUpserter, PageOutcome, RecordOutcome};

pub use tokio_util::sync::CancellationToken;
