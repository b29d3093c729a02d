//! # Database Crate
//!
//! This crate acts as a high-level, application-specific interface to the
//! PostgreSQL database: the raw capture store (`raw` schema), the normalized
//! projection (`sleeper` schema) and the sync run ledger.
//!
//! ## Public API
//!
//! - `connect` / `run_migrations`: pool construction and embedded migrations.
//! - `RawStore`, `EntityStore`, `RunLedger`: the storage seams the pipeline is
//!   written against.
//! - `DbRepository`: the Postgres implementation of all three traits.
//! - `StorageError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod entities;
pub mod error;
pub mod hashing;
pub mod raw;
pub mod repository;
pub mod runs;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use entities::EntityStore;
pub use error::StorageError;
pub use hashing::content_hash;
pub use raw::{EMPTY_PAYLOAD_NOTE, RawStore, Snapshot, StatusCounts, StoredSnapshot};
pub use repository::DbRepository;
pub use runs::{RunLedger, RunRecord};
