//! SQLite implementation of the hub's [`Storage`](storehub_core::Storage) collaborator.
//!
//! Holds the hub's own records (apps, plugins) next to a small JSON object
//! store whose collections are registered by app schemas.

pub mod operations;
pub mod sqlite_store;

pub use operations::Operation;
pub use sqlite_store::SqliteStorage;
