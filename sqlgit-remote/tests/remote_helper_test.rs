//! End-to-end helper sessions between a git repository and a SQLite remote.

use std::path::Path;

use git2::{Repository, Signature};
use sqlgit_core::{ObjectDatabase, ObjectId};
use sqlgit_remote::{ConnectionConfig, LocalRepository, LocalGraph, ProtocolDriver, SqlProvider, Transport};
use tempfile::TempDir;

fn commit_file(repo: &Repository, name: &str, content: &str) -> ObjectId {
    let workdir = repo.workdir().unwrap();
    std::fs::write(workdir.join(name), content).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let oid = repo.commit(Some("HEAD"), &sig, &sig, "change", &tree, &parents).unwrap();
    ObjectId::from_slice(oid.as_bytes()).unwrap()
}

fn session(url: &str, git_dir: &Path, input: &str) -> String {
    let config = ConnectionConfig::parse(url).unwrap();
    let remote = config.connect().unwrap();
    let local = LocalRepository::open(git_dir).unwrap();
    let transport = Transport::new(remote, local).read_only(config.read_only);
    let mut driver = ProtocolDriver::new(SqlProvider::new(transport), Vec::new());
    driver.run(input.as_bytes()).unwrap();
    String::from_utf8(driver.output().clone()).unwrap()
}

#[test]
fn test_push_then_clone() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlgit::sqlite:{}", dir.path().join("remote.db").display());

    let source_dir = dir.path().join("source");
    let source = Repository::init(&source_dir).unwrap();
    commit_file(&source, "README", "hello\n");
    let head = commit_file(&source, "README", "hello again\n");
    let branch = source.head().unwrap().name().unwrap().to_string();

    let out = session(
        &url,
        &source_dir,
        &format!("capabilities\nlist for-push\npush {b}:{b}\n\n", b = branch),
    );
    assert!(out.starts_with("fetch\npush\n\n"));
    assert!(out.ends_with(&format!("ok {}\n\n", branch)));

    let clone_dir = dir.path().join("clone");
    Repository::init(&clone_dir).unwrap();
    let listing = session(&url, &clone_dir, "list\n");
    assert!(listing.contains(&format!("{} {}\n", head, branch)));

    let out = session(&url, &clone_dir, &format!("fetch {} {}\n\n", head, branch));
    assert_eq!(out, "\n");

    let clone = LocalRepository::open(&clone_dir).unwrap();
    assert!(clone.has_object(&head).unwrap());
    let commit = clone.repository().find_commit(git2::Oid::from_bytes(head.as_bytes()).unwrap()).unwrap();
    assert_eq!(commit.parent_count(), 1);
    assert!(clone.has_object(&ObjectId::from_slice(commit.parent_id(0).unwrap().as_bytes()).unwrap()).unwrap());
}

#[test]
fn test_non_fast_forward_is_rejected() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("remote.db").display());

    let first_dir = dir.path().join("first");
    let first = Repository::init(&first_dir).unwrap();
    commit_file(&first, "a", "one\n");
    let branch = first.head().unwrap().name().unwrap().to_string();
    session(&url, &first_dir, &format!("push {b}:{b}\n\n", b = branch));

    let second_dir = dir.path().join("second");
    let second = Repository::init(&second_dir).unwrap();
    commit_file(&second, "a", "unrelated\n");
    let second_branch = second.head().unwrap().name().unwrap().to_string();

    let out = session(&url, &second_dir, &format!("push {}:{}\n\n", second_branch, branch));
    assert_eq!(out, format!("error {} REJECTED\n\n", branch));

    let out = session(&url, &second_dir, &format!("push +{}:{}\n\n", second_branch, branch));
    assert_eq!(out, format!("ok {}\n\n", branch));

    let local = LocalRepository::open(&second_dir).unwrap();
    let remote = ConnectionConfig::parse(&url).unwrap().connect().unwrap();
    assert_eq!(
        remote.find_ref(&branch).unwrap().unwrap().object_id(),
        local.resolve_ref(&second_branch).unwrap()
    );
}

#[test]
fn test_read_only_remote() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("remote.db");
    ConnectionConfig::parse(&format!("sqlite:{}", path.display()))
        .unwrap()
        .connect()
        .unwrap();

    let repo_dir = dir.path().join("repo");
    Repository::init(&repo_dir).unwrap();
    let out = session(&format!("sqlite:{}?readonly=true", path.display()), &repo_dir, "capabilities\n");
    assert_eq!(out, "fetch\n\n");
}
