//! SqlRepository integration tests

use proptest::prelude::*;
use sqlgit_core::{
    Commit, Dialect, ObjectDatabase, ObjectId, ObjectKind, RefUpdate, RefUpdateResult, SqlRepository,
    SqliteDriver, Tree, TreeEntry, HEAD,
};
use tempfile::TempDir;

#[test]
fn test_commit_graph_roundtrip() {
    let mut repo = SqlRepository::open_in_memory().unwrap();
    let blob = repo.insert_object(ObjectKind::Blob, b"fn main() {}\n").unwrap();
    let tree = Tree::new(vec![TreeEntry::new(0o100644, "main.rs", blob)]);
    let tree_id = repo.insert_object(ObjectKind::Tree, &tree.encode()).unwrap();
    let commit = Commit::new(tree_id, vec![], "Dev <dev@example.com>", 1_700_000_000, "init\n");
    let commit_id = repo.insert_object(ObjectKind::Commit, &commit.encode()).unwrap();
    repo.flush().unwrap();

    let stored = repo.read_object(&commit_id).unwrap();
    assert_eq!(stored.kind, ObjectKind::Commit);
    assert_eq!(stored.links().unwrap(), vec![(tree_id, ObjectKind::Tree)]);
    assert_eq!(repo.read_object(&tree_id).unwrap().links().unwrap(), vec![(blob, ObjectKind::Blob)]);
    assert_eq!(repo.object_count().unwrap(), Some(3));
}

#[test]
fn test_head_follows_default_branch() {
    let mut repo = SqlRepository::open_in_memory().unwrap();
    let id = repo.insert_object(ObjectKind::Blob, b"x").unwrap();
    assert_eq!(
        repo.update_ref(&RefUpdate::new("refs/heads/master", id)).unwrap(),
        RefUpdateResult::New
    );
    let refs = repo.all_refs().unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[HEAD].object_id(), Some(id));
}

#[test]
fn test_batched_dialect_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("batched.sqlite");
    let mut dialect = Dialect::sqlite().with_tables("objects", "refs");
    dialect.batch_insert = true;

    let driver = Box::new(SqliteDriver::open(&path).unwrap());
    let mut repo = SqlRepository::open(driver, dialect).unwrap();
    repo.create().unwrap();
    let ids: Vec<ObjectId> = (0..10)
        .map(|i| repo.insert_object(ObjectKind::Blob, format!("blob {}", i).as_bytes()).unwrap())
        .collect();
    repo.close().unwrap();

    let driver = Box::new(SqliteDriver::open(&path).unwrap());
    let repo = SqlRepository::open(driver, Dialect::sqlite().with_tables("objects", "refs")).unwrap();
    assert!(repo.exists().unwrap());
    for id in &ids {
        assert!(repo.has_object(id).unwrap());
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn insert_is_idempotent(content in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut repo = SqlRepository::open_in_memory().unwrap();
        let first = repo.insert_object(ObjectKind::Blob, &content).unwrap();
        let second = repo.insert_object(ObjectKind::Blob, &content).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(first, ObjectId::compute(ObjectKind::Blob, &content));
        let stored = repo.read_object(&first).unwrap();
        prop_assert_eq!(stored.data.as_ref(), content.as_slice());
        prop_assert_eq!(repo.object_count().unwrap(), Some(1));
    }

    #[test]
    fn abbreviated_prefix_resolution(
        contents in prop::collection::hash_set(prop::collection::vec(any::<u8>(), 1..64), 1..8),
        len in 2usize..=40,
    ) {
        let mut repo = SqlRepository::open_in_memory().unwrap();
        let ids: Vec<ObjectId> = contents
            .iter()
            .map(|c| repo.insert_object(ObjectKind::Blob, c).unwrap())
            .collect();

        for id in &ids {
            let prefix = &id.to_hex()[..len];
            let found = repo.resolve_abbreviated(prefix).unwrap();
            let expected: std::collections::BTreeSet<ObjectId> = ids
                .iter()
                .filter(|other| other.to_hex().starts_with(prefix))
                .copied()
                .collect();
            prop_assert_eq!(found, expected);
        }
    }
}
