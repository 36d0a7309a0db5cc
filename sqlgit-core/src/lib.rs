//! sqlgit Core Library
//!
//! Git object and ref storage on relational databases:
//! - Object model (ids, kinds, tree/commit/tag link parsing)
//! - Storage abstraction shared by SQL and local repositories
//! - SQL dialects for SQLite, MySQL, MySQL-like servers and PostgreSQL
//! - Generic SQL driver contract with a rusqlite implementation
//! - Object and ref stores over a driver plus dialect
//! - SqlRepository owning the connection and both stores

pub mod object;
pub mod storage;
pub mod driver;
pub mod dialect;
pub mod object_store;
pub mod ref_store;
pub mod repository;

pub use object::{Commit, ObjectId, ObjectKind, RawObject, Tag, Tree, TreeEntry};
pub use storage::{ObjectDatabase, Result, StorageError};
pub use driver::{Engine, SqlDriver, SqlRow, SqlValue, SqliteDriver};
pub use dialect::{Dialect, Statement};
pub use object_store::ObjectStore;
pub use ref_store::{Ref, RefStore, RefTarget, RefUpdate, RefUpdateResult, DEFAULT_BRANCH, HEAD};
pub use repository::SqlRepository;
