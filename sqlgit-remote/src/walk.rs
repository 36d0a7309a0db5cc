//! Object graph walking and copying between object databases.
//!
//! The walk starts at wanted ids and follows commit parents, trees and tag
//! targets. Every reachable object is checked against the destination on
//! its own; only ids in the caller's `have` set stop the descent.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlgit_core::{Commit, ObjectDatabase, ObjectId, ObjectKind, StorageError, Tag};
use tracing::debug;

use crate::error::{HelperError, Result};

/// Cooperative cancellation flag checked before each walk or copy step
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(HelperError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Objects found by [`collect_missing`]
#[derive(Debug, Default)]
pub struct Walk {
    /// Ids to transfer, in discovery order (referrers before referents)
    pub objects: Vec<ObjectId>,
    pub walked: u64,
    pub skipped: u64,
}

/// Find every object reachable from `starts` that the destination lacks.
///
/// Ids in `have` are treated as present without asking the destination.
/// With `check_destination` off, only `have` is consulted.
pub fn collect_missing<S, D>(
    source: &S,
    dest: &D,
    starts: &[ObjectId],
    have: &HashSet<ObjectId>,
    check_destination: bool,
    cancel: &Cancellation,
) -> Result<Walk>
where
    S: ObjectDatabase + ?Sized,
    D: ObjectDatabase + ?Sized,
{
    let mut walk = Walk::default();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<(ObjectId, Option<ObjectKind>)> =
        starts.iter().map(|id| (*id, None)).collect();

    while let Some((id, hint)) = queue.pop_front() {
        cancel.check()?;
        if !visited.insert(id) {
            continue;
        }
        walk.walked += 1;

        // Boundary: the caller knows everything below this id is present
        if have.contains(&id) {
            walk.skipped += 1;
            continue;
        }
        if check_destination && dest.has_object(&id)? {
            walk.skipped += 1;
        } else {
            walk.objects.push(id);
        }

        // Blob content is only needed at copy time
        if hint == Some(ObjectKind::Blob) {
            continue;
        }
        let object = source.read_object(&id)?;
        queue.extend(object.links()?.into_iter().map(|(link, kind)| (link, Some(kind))));
    }

    debug!(
        "walk visited {} objects, {} missing, {} skipped",
        walk.walked,
        walk.objects.len(),
        walk.skipped
    );
    Ok(walk)
}

/// Whether `ancestor` is reachable from `descendant` through parents
/// (tags are peeled)
pub fn is_ancestor<S>(source: &S, ancestor: &ObjectId, descendant: &ObjectId, cancel: &Cancellation) -> Result<bool>
where
    S: ObjectDatabase + ?Sized,
{
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([*descendant]);
    while let Some(id) = queue.pop_front() {
        cancel.check()?;
        if id == *ancestor {
            return Ok(true);
        }
        if !visited.insert(id) || !source.has_object(&id)? {
            continue;
        }
        let object = source.read_object(&id)?;
        match object.kind {
            ObjectKind::Commit => queue.extend(Commit::parse(&object.data)?.parents),
            ObjectKind::Tag => queue.push_back(Tag::parse(&object.data)?.object),
            _ => {}
        }
    }
    Ok(false)
}

/// Copy objects byte-for-byte, referents first, then flush the destination.
///
/// Returns the number of bytes copied.
pub fn copy_objects<S, D>(source: &S, dest: &mut D, ids: &[ObjectId], cancel: &Cancellation) -> Result<u64>
where
    S: ObjectDatabase + ?Sized,
    D: ObjectDatabase + ?Sized,
{
    let mut bytes = 0u64;
    for id in ids.iter().rev() {
        cancel.check()?;
        let object = source.read_object(id)?;
        let stored = dest.insert_object(object.kind, &object.data)?;
        if stored != *id {
            return Err(StorageError::Corrupt(format!("object {} was stored as {}", id, stored)).into());
        }
        bytes += object.size();
    }
    dest.flush()?;
    Ok(bytes)
}
