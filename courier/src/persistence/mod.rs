/// SQLite persistence for the upload queue.
///
/// This module provides `SqliteRecordStore`, a SQLite-backed implementation
/// of the [`RecordStore`](crate::RecordStore) trait for durable item storage.
pub mod sqlite;

pub use sqlite::SqliteRecordStore;
