//! Fetch and push between a local repository and a SQL remote.
//!
//! A [`Transport`] owns both repositories. Fetch and push connections
//! borrow it for the duration of one batch.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use sqlgit_core::{ObjectDatabase, ObjectId, Ref, RefUpdate, RefUpdateResult, SqlRepository};
use tracing::debug;

use crate::error::{HelperError, Result};
use crate::walk::{collect_missing, copy_objects, is_ancestor, Cancellation};

/// The local side of a transfer: an object database plus ref lookup
pub trait LocalGraph: ObjectDatabase {
    /// Resolve a ref name (or full hex id) to an object id
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>>;
}

impl LocalGraph for SqlRepository {
    fn resolve_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        if let Some(r) = self.find_ref(name)? {
            return Ok(r.object_id());
        }
        Ok(ObjectId::from_hex(name).ok().filter(|id| !id.is_zero()))
    }
}

/// Knobs for a transfer
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Skip per-object existence checks when the destination reports no objects
    pub assume_empty_destination: bool,
}

/// Statistics from a transfer operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Objects visited by the walk.
    pub objects_walked: u64,
    /// Objects copied to the destination.
    pub objects_transferred: u64,
    /// Objects skipped (already present).
    pub objects_skipped: u64,
    /// Content bytes copied.
    pub bytes: u64,
    /// Time spent in milliseconds.
    pub duration_ms: u64,
}

impl TransferStats {
    /// Throughput in bytes per second.
    pub fn throughput_bps(&self) -> f64 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        (self.bytes as f64 / self.duration_ms as f64) * 1000.0
    }

    /// Format a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Transferred {} objects ({} skipped, {} walked), {} in {}ms ({}/s)",
            self.objects_transferred,
            self.objects_skipped,
            self.objects_walked,
            format_size(self.bytes),
            self.duration_ms,
            format_size(self.throughput_bps() as u64),
        )
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// One `fetch <id> <name>` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWant {
    pub id: ObjectId,
    pub name: String,
}

/// One ref to push. A null `new_id` deletes `dst`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushUpdate {
    pub src: String,
    pub dst: String,
    pub new_id: ObjectId,
    /// The value `dst` must currently hold; `None` means it must not exist
    pub expected_old: Option<ObjectId>,
    pub force: bool,
}

/// Result of pushing one ref
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub dst: String,
    pub result: RefUpdateResult,
}

impl PushOutcome {
    pub fn new(dst: impl Into<String>, result: RefUpdateResult) -> Self {
        Self {
            dst: dst.into(),
            result,
        }
    }

    /// `ok <dst>` or `error <dst> <STATUS>`
    pub fn reply_line(&self) -> String {
        if self.result.is_success() {
            format!("ok {}", self.dst)
        } else {
            format!("error {} {}", self.dst, self.result.name())
        }
    }
}

/// Owns both sides of the transfer
pub struct Transport<L: LocalGraph> {
    remote: SqlRepository,
    local: L,
    read_only: bool,
    options: TransferOptions,
    cancel: Cancellation,
}

impl<L: LocalGraph> Transport<L> {
    pub fn new(remote: SqlRepository, local: L) -> Self {
        Self {
            remote,
            local,
            read_only: false,
            options: TransferOptions::default(),
            cancel: Cancellation::new(),
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    /// Handle that cancels in-flight walks
    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    pub fn remote(&self) -> &SqlRepository {
        &self.remote
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn open_fetch(&mut self) -> Result<FetchConnection<'_, L>> {
        Ok(FetchConnection { transport: self })
    }

    pub fn open_push(&mut self) -> Result<PushConnection<'_, L>> {
        if self.read_only {
            return Err(HelperError::NotSupported("remote is read-only".to_string()));
        }
        Ok(PushConnection { transport: self })
    }

    /// Flush, commit and close the remote repository
    pub fn close(&mut self) -> Result<()> {
        self.local.flush()?;
        self.remote.close()?;
        Ok(())
    }
}

/// Fetch side: remote objects into the local repository
pub struct FetchConnection<'a, L: LocalGraph> {
    transport: &'a mut Transport<L>,
}

impl<L: LocalGraph> FetchConnection<'_, L> {
    pub fn refs(&self) -> Result<BTreeMap<String, Ref>> {
        Ok(self.transport.remote.all_refs()?)
    }

    pub fn find_ref(&self, name: &str) -> Result<Option<Ref>> {
        Ok(self.transport.remote.find_ref(name)?)
    }

    /// Copy everything reachable from `wants` that the local side lacks
    pub fn fetch(&mut self, wants: &[FetchWant], have: &HashSet<ObjectId>) -> Result<TransferStats> {
        let start = Instant::now();
        let t = &mut *self.transport;

        let check_destination = !(t.options.assume_empty_destination
            && t.local.object_count()? == Some(0));
        if !check_destination {
            debug!("local repository is empty, skipping existence checks");
        }

        let starts: Vec<ObjectId> = wants.iter().map(|w| w.id).collect();
        let walk = collect_missing(&t.remote, &t.local, &starts, have, check_destination, &t.cancel)?;
        let bytes = copy_objects(&t.remote, &mut t.local, &walk.objects, &t.cancel)?;

        let stats = TransferStats {
            objects_walked: walk.walked,
            objects_transferred: walk.objects.len() as u64,
            objects_skipped: walk.skipped,
            bytes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!("fetch: {}", stats.summary());
        Ok(stats)
    }
}

/// Push side: local objects into the remote, then ref updates
pub struct PushConnection<'a, L: LocalGraph> {
    transport: &'a mut Transport<L>,
}

enum Planned {
    Delete,
    Update(RefUpdateResult),
}

impl<L: LocalGraph> PushConnection<'_, L> {
    pub fn refs(&self) -> Result<BTreeMap<String, Ref>> {
        Ok(self.transport.remote.all_refs()?)
    }

    /// The local repository push sources are resolved against
    pub fn local(&self) -> &L {
        &self.transport.local
    }

    /// Copy the objects behind `updates`, then apply each ref update
    ///
    /// Refs are only touched once every object is stored. Returns one
    /// outcome per update, in order.
    pub fn push(&mut self, updates: &[PushUpdate]) -> Result<(Vec<PushOutcome>, TransferStats)> {
        let start = Instant::now();
        let t = &mut *self.transport;

        let mut plans = Vec::with_capacity(updates.len());
        let mut to_copy = Vec::new();
        let mut queued = HashSet::new();
        let mut stats = TransferStats::default();

        for update in updates {
            if update.new_id.is_zero() {
                plans.push(Planned::Delete);
                continue;
            }

            let status = match update.expected_old.filter(|old| !old.is_zero()) {
                None => RefUpdateResult::FastForward,
                Some(old) if is_ancestor(&t.local, &old, &update.new_id, &t.cancel)? => {
                    RefUpdateResult::FastForward
                }
                Some(_) if update.force => RefUpdateResult::Forced,
                Some(_) => RefUpdateResult::Rejected,
            };
            debug!("push {} -> {}: {}", update.src, update.dst, status);
            plans.push(Planned::Update(status));
            if status == RefUpdateResult::Rejected {
                continue;
            }

            let have: HashSet<ObjectId> = update.expected_old.into_iter().collect();
            let walk = collect_missing(&t.local, &t.remote, &[update.new_id], &have, true, &t.cancel)?;
            stats.objects_walked += walk.walked;
            stats.objects_skipped += walk.skipped;
            for id in walk.objects {
                if queued.insert(id) {
                    to_copy.push(id);
                }
            }
        }

        stats.bytes = copy_objects(&t.local, &mut t.remote, &to_copy, &t.cancel)?;
        stats.objects_transferred = to_copy.len() as u64;

        let mut outcomes = Vec::with_capacity(updates.len());
        for (update, plan) in updates.iter().zip(plans) {
            let result = match plan {
                Planned::Delete => t.remote.delete_ref(&update.dst)?,
                Planned::Update(RefUpdateResult::Rejected) => RefUpdateResult::Rejected,
                Planned::Update(status) => {
                    let ref_update = RefUpdate::new(update.dst.clone(), update.new_id)
                        .expect_old(Some(update.expected_old.unwrap_or_else(ObjectId::zero)))
                        .with_status(status);
                    t.remote.update_ref(&ref_update)?
                }
            };
            outcomes.push(PushOutcome::new(update.dst.clone(), result));
        }
        t.remote.commit()?;

        stats.duration_ms = start.elapsed().as_millis() as u64;
        debug!("push: {}", stats.summary());
        Ok((outcomes, stats))
    }
}
