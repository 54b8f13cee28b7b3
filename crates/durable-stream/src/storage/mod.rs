//! Storage backends: durable append + ordered range read per path.
//!
//! Three variants are provided, all implementing the same [`Storage`]
//! trait so the rest of the crate is backend-agnostic: [`memory::MemoryStore`]
//! (no durability, tests only), [`file::FileStore`] (one append-only log per
//! path), and, behind the `sql-storage` feature, [`sql::SqlStore`] (a single
//! SQLite table).

pub mod memory;

#[cfg(feature = "file-storage")]
pub mod file;

#[cfg(feature = "sql-storage")]
pub mod sql;

use crate::error::StorageError;
use crate::types::Event;

/// Durable append + ordered range read per stream path.
///
/// Implementations must be linearisable per path: under concurrent
/// `append` calls on the same path, offset allocation is gap-free and each
/// offset is assigned exactly once. Methods are synchronous — callers that
/// need to avoid blocking the async runtime (the per-path stream and the
/// manager) invoke them through `tokio::task::spawn_blocking`.
pub trait Storage: Send + Sync {
    /// Allocate the next offset for `path`, stamp `created_at`, persist the
    /// event durably, and return the stored [`Event`].
    fn append(&self, path: &str, input: crate::types::EventInput) -> Result<Event, StorageError>;

    /// Events with `offset > after` (or from the start if `after` is `None`
    /// or the `-1` sentinel) and `offset <= up_to` (or up to the current
    /// tail if `up_to` is `None`), in ascending offset order.
    fn read(
        &self,
        path: &str,
        after: Option<&str>,
        up_to: Option<&str>,
    ) -> Result<Vec<Event>, StorageError>;

    /// Paths that have at least one stored event.
    fn list_paths(&self) -> Result<Vec<String>, StorageError>;
}
