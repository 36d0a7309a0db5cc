//! The local git repository, reached through libgit2.

use std::path::Path;

use git2::{ErrorCode, ObjectType, Oid, Repository};
use sqlgit_core::{ObjectDatabase, ObjectId, ObjectKind, RawObject, StorageError};
use tracing::debug;

use crate::error::Result;
use crate::transport::LocalGraph;

fn backend(e: git2::Error) -> StorageError {
    StorageError::Backend(e.message().to_string())
}

fn to_oid(id: &ObjectId) -> std::result::Result<Oid, StorageError> {
    Oid::from_bytes(id.as_bytes()).map_err(backend)
}

fn from_oid(oid: Oid) -> std::result::Result<ObjectId, StorageError> {
    ObjectId::from_slice(oid.as_bytes())
        .ok_or_else(|| StorageError::Corrupt(format!("unexpected object id length for {}", oid)))
}

fn to_object_type(kind: ObjectKind) -> ObjectType {
    match kind {
        ObjectKind::Commit => ObjectType::Commit,
        ObjectKind::Tree => ObjectType::Tree,
        ObjectKind::Blob => ObjectType::Blob,
        ObjectKind::Tag => ObjectType::Tag,
    }
}

fn from_object_type(kind: ObjectType) -> Option<ObjectKind> {
    match kind {
        ObjectType::Commit => Some(ObjectKind::Commit),
        ObjectType::Tree => Some(ObjectKind::Tree),
        ObjectType::Blob => Some(ObjectKind::Blob),
        ObjectType::Tag => Some(ObjectKind::Tag),
        _ => None,
    }
}

/// A git repository on disk
pub struct LocalRepository {
    repo: Repository,
}

impl LocalRepository {
    /// Open the repository at `git_dir` (a `.git` directory or a work tree)
    pub fn open(git_dir: impl AsRef<Path>) -> Result<Self> {
        let git_dir = git_dir.as_ref();
        debug!("opening local repository at {:?}", git_dir);
        Ok(Self {
            repo: Repository::open(git_dir)?,
        })
    }

    pub fn from_repository(repo: Repository) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// The repository's merged configuration
    pub fn config(&self) -> Result<git2::Config> {
        Ok(self.repo.config()?)
    }
}

impl ObjectDatabase for LocalRepository {
    fn has_object(&self, id: &ObjectId) -> sqlgit_core::Result<bool> {
        let odb = self.repo.odb().map_err(backend)?;
        Ok(odb.exists(to_oid(id)?))
    }

    fn read_object(&self, id: &ObjectId) -> sqlgit_core::Result<RawObject> {
        let odb = self.repo.odb().map_err(backend)?;
        let object = match odb.read(to_oid(id)?) {
            Ok(object) => object,
            Err(e) if e.code() == ErrorCode::NotFound => return Err(StorageError::MissingObject(*id)),
            Err(e) => return Err(backend(e)),
        };
        let kind = from_object_type(object.kind())
            .ok_or_else(|| StorageError::Corrupt(format!("object {} has type {}", id, object.kind())))?;
        Ok(RawObject::new(kind, object.data().to_vec()))
    }

    fn insert_object(&mut self, kind: ObjectKind, data: &[u8]) -> sqlgit_core::Result<ObjectId> {
        let odb = self.repo.odb().map_err(backend)?;
        let oid = odb.write(to_object_type(kind), data).map_err(backend)?;
        from_oid(oid)
    }

    fn object_count(&self) -> sqlgit_core::Result<Option<u64>> {
        let odb = self.repo.odb().map_err(backend)?;
        let mut count = 0u64;
        odb.foreach(|_| {
            count += 1;
            true
        })
        .map_err(backend)?;
        Ok(Some(count))
    }

    // libgit2 writes loose objects immediately
    fn flush(&mut self) -> sqlgit_core::Result<()> {
        Ok(())
    }
}

impl LocalGraph for LocalRepository {
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        match self.repo.find_reference(name) {
            Ok(reference) => match reference.resolve() {
                Ok(resolved) => Ok(resolved.target().map(from_oid).transpose()?),
                Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
            Err(e) if e.code() == ErrorCode::NotFound || e.code() == ErrorCode::InvalidSpec => {
                match self.repo.revparse_single(name) {
                    Ok(object) => Ok(Some(from_oid(object.id())?)),
                    Err(_) => Ok(None),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init() -> (TempDir, LocalRepository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, LocalRepository::from_repository(repo))
    }

    #[test]
    fn test_blob_roundtrip_matches_sql_hash() {
        let (_dir, mut local) = init();
        let id = local.insert_object(ObjectKind::Blob, b"hello world\n").unwrap();
        assert_eq!(id, ObjectId::compute(ObjectKind::Blob, b"hello world\n"));
        assert!(local.has_object(&id).unwrap());
        let object = local.read_object(&id).unwrap();
        assert_eq!(object.kind, ObjectKind::Blob);
        assert_eq!(object.data.as_ref(), b"hello world\n");
        assert_eq!(local.object_count().unwrap(), Some(1));
    }

    #[test]
    fn test_missing_object() {
        let (_dir, local) = init();
        let id = ObjectId::new([1u8; 20]);
        assert!(!local.has_object(&id).unwrap());
        assert!(matches!(local.read_object(&id), Err(StorageError::MissingObject(_))));
    }

    #[test]
    fn test_resolve_refs() {
        let (_dir, local) = init();
        let repo = local.repository();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
        let expected = ObjectId::from_slice(oid.as_bytes()).unwrap();

        let head_branch = repo.head().unwrap().name().unwrap().to_string();
        assert_eq!(local.resolve_ref(&head_branch).unwrap(), Some(expected));
        assert_eq!(local.resolve_ref("HEAD").unwrap(), Some(expected));
        assert_eq!(local.resolve_ref("refs/heads/nope").unwrap(), None);
    }
}
