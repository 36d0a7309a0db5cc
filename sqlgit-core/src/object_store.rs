//! Content-addressed object storage on top of a SQL table
//!
//! Objects are stored without their header; the `hash` column holds the id
//! computed over header plus content. Rows are written once and never
//! updated. Dialects with batch support queue inserts until [`ObjectStore::flush`].

use std::collections::{BTreeSet, HashMap};
use std::io::Read;

use tracing::debug;

use crate::dialect::Dialect;
use crate::driver::{SqlDriver, SqlRow};
use crate::object::{ObjectId, ObjectKind, RawObject, OBJECT_ID_HEX_LEN};
use crate::storage::{Result, StorageError};

/// Object table access for one dialect
#[derive(Debug)]
pub struct ObjectStore {
    dialect: Dialect,
    /// Objects queued for the next batch insert, in insertion order
    pending: Vec<(ObjectId, RawObject)>,
    pending_index: HashMap<ObjectId, usize>,
}

impl ObjectStore {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            pending: Vec::new(),
            pending_index: HashMap::new(),
        }
    }

    /// Hash and store an object read from `reader`
    ///
    /// `length` must equal the number of bytes the reader yields.
    pub fn insert<R: Read>(
        &mut self,
        driver: &dyn SqlDriver,
        kind: ObjectKind,
        length: u64,
        mut reader: R,
    ) -> Result<ObjectId> {
        let mut data = Vec::with_capacity(length.min(1 << 20) as usize);
        reader.read_to_end(&mut data)?;
        if data.len() as u64 != length {
            return Err(StorageError::Corrupt(format!(
                "declared length {} but read {} bytes",
                length,
                data.len()
            )));
        }
        self.insert_bytes(driver, kind, data)
    }

    /// Hash and store an in-memory object
    pub fn insert_bytes(&mut self, driver: &dyn SqlDriver, kind: ObjectKind, data: Vec<u8>) -> Result<ObjectId> {
        let id = ObjectId::compute(kind, &data);
        if self.exists(driver, &id)? {
            debug!("object {} already stored", id);
            return Ok(id);
        }

        if self.dialect.batch_insert {
            self.pending_index.insert(id, self.pending.len());
            self.pending.push((id, RawObject::new(kind, data)));
        } else {
            let stmt = self.dialect.insert_object(&id.to_hex(), kind, data);
            driver.execute(&stmt.sql, &stmt.params)?;
        }
        debug!("inserted {} {}", kind, id);
        Ok(id)
    }

    pub fn exists(&self, driver: &dyn SqlDriver, id: &ObjectId) -> Result<bool> {
        if self.pending_index.contains_key(id) {
            return Ok(true);
        }
        let stmt = self.dialect.read_object_meta(&id.to_hex());
        Ok(!driver.query(&stmt.sql, &stmt.params)?.is_empty())
    }

    /// Read kind and content
    pub fn read(&self, driver: &dyn SqlDriver, id: &ObjectId) -> Result<RawObject> {
        if let Some(&index) = self.pending_index.get(id) {
            return Ok(self.pending[index].1.clone());
        }
        let stmt = self.dialect.read_object(&id.to_hex());
        let rows = driver.query(&stmt.sql, &stmt.params)?;
        let row = rows.first().ok_or(StorageError::MissingObject(*id))?;
        let kind = row_kind(row, id)?;
        let data = row
            .get(2)
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| StorageError::Corrupt(format!("object {} has no content", id)))?;
        Ok(RawObject::new(kind, data.to_vec()))
    }

    /// Read kind and size without fetching content
    pub fn read_header(&self, driver: &dyn SqlDriver, id: &ObjectId) -> Result<(ObjectKind, u64)> {
        if let Some(&index) = self.pending_index.get(id) {
            let object = &self.pending[index].1;
            return Ok((object.kind, object.size()));
        }
        let stmt = self.dialect.read_object_meta(&id.to_hex());
        let rows = driver.query(&stmt.sql, &stmt.params)?;
        let row = rows.first().ok_or(StorageError::MissingObject(*id))?;
        let kind = row_kind(row, id)?;
        let size = row
            .get(1)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| StorageError::Corrupt(format!("object {} has no size", id)))?;
        Ok((kind, size as u64))
    }

    /// All ids whose hex form starts with `prefix`
    ///
    /// Prefixes that are not hex digits, or longer than a full id, match nothing.
    pub fn resolve_abbreviated(&self, driver: &dyn SqlDriver, prefix: &str) -> Result<BTreeSet<ObjectId>> {
        let mut found = BTreeSet::new();
        if prefix.len() > OBJECT_ID_HEX_LEN || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(found);
        }
        let prefix = prefix.to_ascii_lowercase();

        let stmt = self.dialect.find_abbreviated(&prefix);
        for row in driver.query(&stmt.sql, &stmt.params)? {
            let hash = row.first().and_then(|v| v.as_str()).unwrap_or_default();
            match ObjectId::from_hex(hash) {
                Ok(id) => {
                    found.insert(id);
                }
                Err(_) => debug!("skipping malformed hash {:?}", hash),
            }
        }
        found.extend(
            self.pending_index
                .keys()
                .filter(|id| id.to_hex().starts_with(&prefix))
                .copied(),
        );
        Ok(found)
    }

    /// Stored plus queued objects
    pub fn object_count(&self, driver: &dyn SqlDriver) -> Result<u64> {
        let stmt = self.dialect.object_count();
        let rows = driver.query(&stmt.sql, &stmt.params)?;
        let stored = rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(stored as u64 + self.pending.len() as u64)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Execute the queued batch, then commit when the connection is in manual mode
    pub fn flush(&mut self, driver: &mut dyn SqlDriver) -> Result<()> {
        if !self.pending.is_empty() {
            let rows: Vec<_> = self
                .pending
                .iter()
                .map(|(id, object)| {
                    self.dialect
                        .insert_object_params(&id.to_hex(), object.kind, object.data.to_vec())
                })
                .collect();
            debug!("flushing {} queued objects", rows.len());
            driver.execute_batch(&self.dialect.insert_object_sql(), &rows)?;
            self.pending.clear();
            self.pending_index.clear();
        }
        if !driver.is_auto_commit() {
            driver.commit()?;
        }
        Ok(())
    }
}

fn row_kind(row: &SqlRow, id: &ObjectId) -> Result<ObjectKind> {
    row.first()
        .and_then(|v| v.as_i64())
        .and_then(ObjectKind::from_type_code)
        .ok_or_else(|| StorageError::Corrupt(format!("object {} has an unknown type", id)))
}
