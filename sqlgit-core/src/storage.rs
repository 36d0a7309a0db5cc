//! Storage abstraction layer for sqlgit
//!
//! Both sides of a transfer (the SQL repository and a local git
//! repository) are reached through [`ObjectDatabase`], so the walk and copy
//! logic never needs to know which backend it is talking to.

use crate::object::{ObjectId, ObjectKind, RawObject};

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    MissingObject(ObjectId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt object: {0}")]
    Corrupt(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Generic object database interface
pub trait ObjectDatabase {
    /// Check if object exists
    fn has_object(&self, id: &ObjectId) -> Result<bool>;

    /// Read object kind and content
    fn read_object(&self, id: &ObjectId) -> Result<RawObject>;

    /// Store an object and return its id
    ///
    /// Writes may be buffered until [`ObjectDatabase::flush`].
    fn insert_object(&mut self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId>;

    /// Number of stored objects, when the backend can count cheaply
    fn object_count(&self) -> Result<Option<u64>> {
        Ok(None)
    }

    /// Make buffered writes durable
    fn flush(&mut self) -> Result<()>;
}
