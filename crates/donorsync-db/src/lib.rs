//! # donorsync-db
//!
//! Local storage for synchronized CRM data.
//!
//! - [`store`] - The store port used by the sync engine ([`RecordStore`], [`IntegrationStore`])
//! - [`PgStore`] - PostgreSQL implementation on `sqlx`
//! - [`models`] - Row types for donors, donations, projects and integrations
//! - `MemoryStore` - In-memory implementation (feature `test-utils`)
//!
//! Migrations live in `migrations/` and are embedded with `sqlx::migrate!`;
//! run them with [`run_migrations`].

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use error::{DbError, DbResult};
pub use migrations::run_migrations;
pub use models::{
    merge_metadata, DonationFields, DonationRow, DonationUpdate, DonorFields, DonorRow,
    DonorUpdate, Integration, NewDonation, NewDonor, NewIntegration, NewProject, ProjectFields,
    ProjectRow, ProjectUpdate, RecordKind, SyncState, EXTERNAL_BUCKET_NAME,
};
pub use pool::DbPool;
pub use postgres::PgStore;
pub use store::{IntegrationStore, RecordStore, STALE_SYNC_MESSAGE};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
