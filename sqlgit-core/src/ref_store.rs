//! Ref storage on top of a SQL table
//!
//! Each row maps a ref name either to an object id (hex) or, when the
//! `symbolic` flag is set, to the name of another ref.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::dialect::Dialect;
use crate::driver::{SqlDriver, SqlValue};
use crate::object::ObjectId;
use crate::storage::{Result, StorageError};

/// Symbolic chains longer than this resolve to [`Ref::Unborn`]
pub const MAX_SYMREF_DEPTH: usize = 5;

pub const HEAD: &str = "HEAD";
pub const DEFAULT_BRANCH: &str = "refs/heads/master";

/// A resolved ref
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ref {
    Direct { name: String, id: ObjectId },
    Symbolic { name: String, target: Box<Ref> },
    /// Named by a symbolic ref but not stored (an unborn branch)
    Unborn { name: String },
}

impl Ref {
    pub fn name(&self) -> &str {
        match self {
            Ref::Direct { name, .. } | Ref::Symbolic { name, .. } | Ref::Unborn { name } => name,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Ref::Symbolic { .. })
    }

    /// The ref at the end of the symbolic chain
    pub fn leaf(&self) -> &Ref {
        match self {
            Ref::Symbolic { target, .. } => target.leaf(),
            other => other,
        }
    }

    /// Object id after following symbolic links, if the chain ends in an object
    pub fn object_id(&self) -> Option<ObjectId> {
        match self.leaf() {
            Ref::Direct { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Name of the ref this one points at, for symbolic refs
    pub fn target_name(&self) -> Option<&str> {
        match self {
            Ref::Symbolic { target, .. } => Some(target.name()),
            _ => None,
        }
    }
}

/// The value stored in a ref row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Object(ObjectId),
    Symbolic(String),
}

impl RefTarget {
    pub fn is_symbolic(&self) -> bool {
        matches!(self, RefTarget::Symbolic(_))
    }

    fn value(&self) -> String {
        match self {
            RefTarget::Object(id) => id.to_hex(),
            RefTarget::Symbolic(name) => name.clone(),
        }
    }
}

/// Outcome of a ref update, named like git's ref update results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefUpdateResult {
    New,
    NoChange,
    FastForward,
    Forced,
    Rejected,
}

impl RefUpdateResult {
    pub fn name(self) -> &'static str {
        match self {
            RefUpdateResult::New => "NEW",
            RefUpdateResult::NoChange => "NO_CHANGE",
            RefUpdateResult::FastForward => "FAST_FORWARD",
            RefUpdateResult::Forced => "FORCED",
            RefUpdateResult::Rejected => "REJECTED",
        }
    }

    /// Whether the ref now holds the requested value because of this update
    pub fn is_success(self) -> bool {
        matches!(
            self,
            RefUpdateResult::New | RefUpdateResult::FastForward | RefUpdateResult::Forced
        )
    }
}

impl fmt::Display for RefUpdateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A requested change to one ref
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    pub target: RefTarget,
    /// Compare-and-set guard; the null id means the ref must not exist
    pub expected_old: Option<ObjectId>,
    /// Result reported when an existing row is changed
    pub status: RefUpdateResult,
}

impl RefUpdate {
    pub fn new(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Object(id),
            expected_old: None,
            status: RefUpdateResult::FastForward,
        }
    }

    pub fn symbolic(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Symbolic(target.into()),
            expected_old: None,
            status: RefUpdateResult::Forced,
        }
    }

    pub fn expect_old(mut self, old: Option<ObjectId>) -> Self {
        self.expected_old = old;
        self
    }

    pub fn with_status(mut self, status: RefUpdateResult) -> Self {
        self.status = status;
        self
    }
}

/// Ref table access for one dialect
#[derive(Debug)]
pub struct RefStore {
    dialect: Dialect,
}

impl RefStore {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn read_row(&self, driver: &dyn SqlDriver, name: &str) -> Result<Option<RefTarget>> {
        let stmt = self.dialect.read_ref(name);
        let rows = driver.query(&stmt.sql, &stmt.params)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let target = row
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| StorageError::Corrupt(format!("ref {} has no target", name)))?;
        let symbolic = row.get(1).and_then(|v| v.as_bool()).unwrap_or(false);
        if symbolic {
            Ok(Some(RefTarget::Symbolic(target.to_string())))
        } else {
            let id = ObjectId::from_hex(target)
                .map_err(|_| StorageError::Corrupt(format!("ref {} has invalid target {:?}", name, target)))?;
            Ok(Some(RefTarget::Object(id)))
        }
    }

    /// Look up a ref, following symbolic links
    pub fn get(&self, driver: &dyn SqlDriver, name: &str) -> Result<Option<Ref>> {
        self.resolve(driver, name, 0)
    }

    fn resolve(&self, driver: &dyn SqlDriver, name: &str, depth: usize) -> Result<Option<Ref>> {
        match self.read_row(driver, name)? {
            None => Ok(None),
            Some(RefTarget::Object(id)) => Ok(Some(Ref::Direct {
                name: name.to_string(),
                id,
            })),
            Some(RefTarget::Symbolic(target)) => {
                let resolved = if depth >= MAX_SYMREF_DEPTH {
                    debug!("symbolic ref chain at {} too deep", name);
                    None
                } else {
                    self.resolve(driver, &target, depth + 1)?
                };
                Ok(Some(Ref::Symbolic {
                    name: name.to_string(),
                    target: Box::new(resolved.unwrap_or(Ref::Unborn { name: target })),
                }))
            }
        }
    }

    /// All refs whose name starts with `prefix`, resolved
    pub fn list_by_prefix(&self, driver: &dyn SqlDriver, prefix: &str) -> Result<BTreeMap<String, Ref>> {
        let stmt = self.dialect.read_refs(prefix);
        let mut refs = self.collect(driver, &stmt.sql, &stmt.params)?;
        // LIKE is case-insensitive on some engines
        refs.retain(|name, _| name.starts_with(prefix));
        Ok(refs)
    }

    pub fn list(&self, driver: &dyn SqlDriver) -> Result<BTreeMap<String, Ref>> {
        let stmt = self.dialect.list_refs();
        self.collect(driver, &stmt.sql, &stmt.params)
    }

    fn collect(
        &self,
        driver: &dyn SqlDriver,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<BTreeMap<String, Ref>> {
        let mut refs = BTreeMap::new();
        for row in driver.query(sql, params)? {
            let Some(name) = row.first().and_then(|v| v.as_str()) else {
                continue;
            };
            if let Some(r) = self.get(driver, name)? {
                refs.insert(name.to_string(), r);
            }
        }
        Ok(refs)
    }

    /// Create or change a ref, honouring the compare-and-set guard
    pub fn update(&self, driver: &dyn SqlDriver, update: &RefUpdate) -> Result<RefUpdateResult> {
        let current = self.read_row(driver, &update.name)?;

        if let Some(expected) = update.expected_old {
            let actual = match &current {
                None => None,
                Some(RefTarget::Object(id)) => Some(*id),
                Some(RefTarget::Symbolic(_)) => self
                    .get(driver, &update.name)?
                    .and_then(|r| r.object_id()),
            };
            let matches = if expected.is_zero() {
                current.is_none()
            } else {
                actual == Some(expected)
            };
            if !matches {
                debug!(
                    "rejecting update of {}: expected {}, found {:?}",
                    update.name, expected, actual
                );
                return Ok(RefUpdateResult::Rejected);
            }
        }

        let symbolic = update.target.is_symbolic();
        let value = update.target.value();
        match current {
            None => {
                let stmt = self.dialect.insert_ref(&update.name, symbolic, &value);
                if driver.execute(&stmt.sql, &stmt.params)? == 0 {
                    Ok(RefUpdateResult::Rejected)
                } else {
                    Ok(RefUpdateResult::New)
                }
            }
            Some(existing) if existing == update.target => Ok(RefUpdateResult::NoChange),
            Some(_) => {
                let stmt = self.dialect.update_ref(&update.name, symbolic, &value);
                if driver.execute(&stmt.sql, &stmt.params)? == 0 {
                    Ok(RefUpdateResult::NoChange)
                } else {
                    Ok(update.status)
                }
            }
        }
    }

    pub fn delete(&self, driver: &dyn SqlDriver, name: &str) -> Result<RefUpdateResult> {
        let stmt = self.dialect.delete_ref(name);
        if driver.execute(&stmt.sql, &stmt.params)? == 0 {
            Ok(RefUpdateResult::Rejected)
        } else {
            Ok(RefUpdateResult::Forced)
        }
    }

    /// Point `name` at another ref
    pub fn link(&self, driver: &dyn SqlDriver, name: &str, target: &str) -> Result<RefUpdateResult> {
        let stmt = if self.read_row(driver, name)?.is_some() {
            self.dialect.update_ref(name, true, target)
        } else {
            self.dialect.insert_ref(name, true, target)
        };
        if driver.execute(&stmt.sql, &stmt.params)? == 0 {
            Ok(RefUpdateResult::Rejected)
        } else {
            Ok(RefUpdateResult::New)
        }
    }
}
