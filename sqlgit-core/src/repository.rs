//! SQL-backed git repository
//!
//! [`SqlRepository`] owns the connection and hands it to the object and
//! ref stores per call. It lays out the schema on first use and releases
//! the connection exactly once.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::dialect::Dialect;
use crate::driver::{SqlDriver, SqliteDriver};
use crate::object::{ObjectId, ObjectKind, RawObject};
use crate::object_store::ObjectStore;
use crate::ref_store::{Ref, RefStore, RefUpdate, RefUpdateResult, DEFAULT_BRANCH, HEAD};
use crate::storage::{ObjectDatabase, Result, StorageError};

fn closed() -> StorageError {
    StorageError::Backend("repository is closed".to_string())
}

/// Git object and ref database stored in two SQL tables
pub struct SqlRepository {
    driver: Option<Box<dyn SqlDriver>>,
    dialect: Dialect,
    objects: ObjectStore,
    refs: RefStore,
}

impl SqlRepository {
    /// Wrap an open connection, applying the dialect's commit mode
    pub fn open(mut driver: Box<dyn SqlDriver>, dialect: Dialect) -> Result<Self> {
        driver.set_auto_commit(dialect.auto_commit)?;
        debug!(
            "opened {:?} repository (tables {}, {})",
            dialect.engine(),
            dialect.objects_table,
            dialect.refs_table
        );
        Ok(Self {
            driver: Some(driver),
            objects: ObjectStore::new(dialect.clone()),
            refs: RefStore::new(dialect.clone()),
            dialect,
        })
    }

    /// Wrap an open connection using the dialect matching its engine
    pub fn open_detected(driver: Box<dyn SqlDriver>) -> Result<Self> {
        let dialect = Dialect::for_engine(driver.engine());
        Self::open(driver, dialect)
    }

    /// Open a SQLite database file, creating the schema if missing
    pub fn open_sqlite(path: impl AsRef<Path>) -> Result<Self> {
        let mut repo = Self::open(Box::new(SqliteDriver::open(path)?), Dialect::sqlite())?;
        repo.create_if_not_exists()?;
        Ok(repo)
    }

    /// Fresh in-memory SQLite repository with the schema in place
    pub fn open_in_memory() -> Result<Self> {
        let mut repo = Self::open(Box::new(SqliteDriver::open_in_memory()?), Dialect::sqlite())?;
        repo.create()?;
        Ok(repo)
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    fn driver(&self) -> Result<&dyn SqlDriver> {
        self.driver.as_deref().ok_or_else(closed)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let stmt = self.dialect.list_tables(table);
        let rows = self.driver()?.query(&stmt.sql, &stmt.params)?;
        Ok(rows.iter().any(|row| {
            row.first()
                .and_then(|v| v.as_str())
                .is_some_and(|name| name.eq_ignore_ascii_case(table))
        }))
    }

    /// Whether both tables are present
    pub fn exists(&self) -> Result<bool> {
        Ok(self.table_exists(&self.dialect.objects_table)? && self.table_exists(&self.dialect.refs_table)?)
    }

    /// (Re)create both tables and point HEAD at the default branch
    ///
    /// Existing tables are dropped first.
    pub fn create(&mut self) -> Result<()> {
        let objects_exist = self.table_exists(&self.dialect.objects_table)?;
        let refs_exist = self.table_exists(&self.dialect.refs_table)?;
        let driver = self.driver.as_deref_mut().ok_or_else(closed)?;

        let mut statements = Vec::new();
        if objects_exist {
            warn!("dropping existing table {}", self.dialect.objects_table);
            statements.push(self.dialect.drop_objects_table());
        }
        statements.push(self.dialect.create_objects_table());
        if refs_exist {
            warn!("dropping existing table {}", self.dialect.refs_table);
            statements.push(self.dialect.drop_refs_table());
        }
        statements.push(self.dialect.create_refs_table());
        for stmt in statements {
            driver.execute(&stmt.sql, &stmt.params)?;
        }

        self.refs.link(driver, HEAD, DEFAULT_BRANCH)?;
        if !driver.is_auto_commit() {
            driver.commit()?;
        }
        info!(
            "created repository tables {} and {}",
            self.dialect.objects_table, self.dialect.refs_table
        );
        Ok(())
    }

    /// Create the schema unless it is already there; returns whether it was created
    pub fn create_if_not_exists(&mut self) -> Result<bool> {
        if self.exists()? {
            return Ok(false);
        }
        self.create()?;
        Ok(true)
    }

    pub fn find_ref(&self, name: &str) -> Result<Option<Ref>> {
        self.refs.get(self.driver()?, name)
    }

    /// Refs whose name starts with `prefix`
    pub fn refs(&self, prefix: &str) -> Result<BTreeMap<String, Ref>> {
        self.refs.list_by_prefix(self.driver()?, prefix)
    }

    pub fn all_refs(&self) -> Result<BTreeMap<String, Ref>> {
        self.refs.list(self.driver()?)
    }

    pub fn update_ref(&mut self, update: &RefUpdate) -> Result<RefUpdateResult> {
        let result = self.refs.update(self.driver()?, update)?;
        debug!("update {} -> {}", update.name, result);
        Ok(result)
    }

    pub fn delete_ref(&mut self, name: &str) -> Result<RefUpdateResult> {
        let result = self.refs.delete(self.driver()?, name)?;
        debug!("delete {} -> {}", name, result);
        Ok(result)
    }

    pub fn link_ref(&mut self, name: &str, target: &str) -> Result<RefUpdateResult> {
        self.refs.link(self.driver()?, name, target)
    }

    /// Store an object streamed from `reader`, which must yield exactly `length` bytes
    pub fn insert_stream<R: Read>(&mut self, kind: ObjectKind, length: u64, reader: R) -> Result<ObjectId> {
        let driver = self.driver.as_deref().ok_or_else(closed)?;
        self.objects.insert(driver, kind, length, reader)
    }

    /// Read kind and size of an object
    pub fn read_header(&self, id: &ObjectId) -> Result<(ObjectKind, u64)> {
        self.objects.read_header(self.driver()?, id)
    }

    pub fn resolve_abbreviated(&self, prefix: &str) -> Result<BTreeSet<ObjectId>> {
        self.objects.resolve_abbreviated(self.driver()?, prefix)
    }

    /// Commit the open transaction when in manual-commit mode
    pub fn commit(&mut self) -> Result<()> {
        let driver = self.driver.as_deref_mut().ok_or_else(closed)?;
        if !driver.is_auto_commit() {
            driver.commit()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.driver.is_none()
    }

    /// Flush queued objects, commit and release the connection
    ///
    /// Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut driver) = self.driver.take() else {
            return Ok(());
        };
        debug!(
            "closing repository connection, {} queued objects",
            self.objects.pending_count()
        );
        self.objects.flush(driver.as_mut())?;
        driver.close()
    }
}

impl ObjectDatabase for SqlRepository {
    fn has_object(&self, id: &ObjectId) -> Result<bool> {
        self.objects.exists(self.driver()?, id)
    }

    fn read_object(&self, id: &ObjectId) -> Result<RawObject> {
        self.objects.read(self.driver()?, id)
    }

    fn insert_object(&mut self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId> {
        let driver = self.driver.as_deref().ok_or_else(closed)?;
        self.objects.insert_bytes(driver, kind, data.to_vec())
    }

    fn object_count(&self) -> Result<Option<u64>> {
        Ok(Some(self.objects.object_count(self.driver()?)?))
    }

    fn flush(&mut self) -> Result<()> {
        let driver = self.driver.as_deref_mut().ok_or_else(closed)?;
        self.objects.flush(driver)
    }
}

impl Drop for SqlRepository {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close repository: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_links_head() {
        let repo = SqlRepository::open_in_memory().unwrap();
        assert!(repo.exists().unwrap());
        let head = repo.find_ref(HEAD).unwrap().unwrap();
        assert_eq!(head.target_name(), Some(DEFAULT_BRANCH));
        assert_eq!(head.object_id(), None);
    }

    #[test]
    fn test_create_drops_existing_tables() {
        let mut repo = SqlRepository::open_in_memory().unwrap();
        repo.insert_object(ObjectKind::Blob, b"data").unwrap();
        repo.create().unwrap();
        assert_eq!(repo.object_count().unwrap(), Some(0));
    }

    #[test]
    fn test_open_sqlite_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.sqlite");
        let id = {
            let mut repo = SqlRepository::open_sqlite(&path).unwrap();
            let id = repo.insert_object(ObjectKind::Blob, b"persisted").unwrap();
            repo.update_ref(&RefUpdate::new("refs/heads/master", id)).unwrap();
            repo.close().unwrap();
            id
        };

        let mut repo = SqlRepository::open_sqlite(&path).unwrap();
        assert!(!repo.create_if_not_exists().unwrap());
        assert!(repo.has_object(&id).unwrap());
        assert_eq!(repo.find_ref(HEAD).unwrap().unwrap().object_id(), Some(id));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut repo = SqlRepository::open_in_memory().unwrap();
        repo.close().unwrap();
        repo.close().unwrap();
        assert!(repo.is_closed());
        assert!(matches!(repo.find_ref(HEAD), Err(StorageError::Backend(_))));
    }

    #[test]
    fn test_manual_commit_dialect() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manual.sqlite");
        let mut dialect = Dialect::sqlite();
        dialect.auto_commit = false;
        dialect.batch_insert = true;

        let id = {
            let driver = Box::new(SqliteDriver::open(&path).unwrap());
            let mut repo = SqlRepository::open(driver, dialect).unwrap();
            repo.create().unwrap();
            let id = repo.insert_object(ObjectKind::Blob, b"batched").unwrap();
            repo.flush().unwrap();
            id
        };

        let repo = SqlRepository::open_sqlite(&path).unwrap();
        assert_eq!(repo.read_object(&id).unwrap().data.as_ref(), b"batched");
    }
}
