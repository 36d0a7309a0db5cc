//! Protocol commands backed by a SQL remote.

use std::collections::HashSet;

use sqlgit_core::{ObjectId, Ref, RefUpdateResult};
use tracing::{debug, info};

use crate::error::{HelperError, Result};
use crate::protocol::{Capability, Command, CommandProvider, Reply};
use crate::transport::{FetchWant, LocalGraph, PushOutcome, PushUpdate, TransferStats, Transport};

/// Values set through `option`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperOptions {
    pub verbosity: i32,
    pub progress: bool,
}

impl HelperOptions {
    /// Whether transfer summaries are reported at info level
    pub fn is_verbose(&self) -> bool {
        self.progress || self.verbosity > 1
    }

    fn report(&self, what: &str, stats: &TransferStats) {
        if self.is_verbose() {
            info!("{}: {}", what, stats.summary());
        } else {
            debug!("{}: {}", what, stats.summary());
        }
    }
}

impl Default for HelperOptions {
    fn default() -> Self {
        Self {
            verbosity: 1,
            progress: false,
        }
    }
}

/// Command provider serving `list`, `fetch`, `push` and `option`
pub struct SqlProvider<L: LocalGraph> {
    transport: Option<Transport<L>>,
    options: HelperOptions,
}

impl<L: LocalGraph> SqlProvider<L> {
    pub fn new(transport: Transport<L>) -> Self {
        Self {
            transport: Some(transport),
            options: HelperOptions::default(),
        }
    }

    pub fn options(&self) -> &HelperOptions {
        &self.options
    }

    pub fn transport(&self) -> Option<&Transport<L>> {
        self.transport.as_ref()
    }

    fn transport_mut(&mut self) -> Result<&mut Transport<L>> {
        self.transport
            .as_mut()
            .ok_or_else(|| HelperError::protocol("transport already closed"))
    }
}

impl<L: LocalGraph + 'static> CommandProvider for SqlProvider<L> {
    fn command(&self, name: &str) -> Option<Box<dyn Command<Self>>> {
        match name {
            "list" => Some(Box::new(ListCommand)),
            "fetch" => Some(Box::new(FetchCommand::default())),
            "push" => Some(Box::new(PushCommand::default())),
            "option" => Some(Box::new(OptionCommand)),
            _ => None,
        }
    }

    fn capabilities(&mut self) -> Result<Vec<Capability>> {
        let transport = self.transport_mut()?;
        let mut capabilities = Vec::new();
        if transport.open_fetch().is_ok() {
            capabilities.push(Capability::new("fetch"));
        }
        if transport.open_push().is_ok() {
            capabilities.push(Capability::new("push"));
        }
        Ok(capabilities)
    }

    fn close(&mut self) -> Result<()> {
        match self.transport.take() {
            Some(mut transport) => {
                debug!("closing transport");
                transport.close()
            }
            None => Ok(()),
        }
    }
}

/// `list [for-push]`
struct ListCommand;

impl<L: LocalGraph> Command<SqlProvider<L>> for ListCommand {
    fn handle(&mut self, provider: &mut SqlProvider<L>, reply: &mut Reply<'_>, _args: &[&str]) -> Result<()> {
        let refs = provider.transport_mut()?.open_fetch()?.refs()?;
        let (direct, other): (Vec<_>, Vec<_>) = refs.values().partition(|r| !r.is_symbolic());
        for r in direct.into_iter().chain(other) {
            let line = match r {
                Ref::Direct { name, id } => format!("{} {}", id, name),
                Ref::Symbolic { name, target } => format!("@{} {}", target.name(), name),
                Ref::Unborn { name } => format!("? {}", name),
            };
            reply.line(&line)?;
        }
        Ok(())
    }

    fn complete(&mut self, _provider: &mut SqlProvider<L>, reply: &mut Reply<'_>) -> Result<()> {
        reply.end()
    }
}

/// `fetch <id> <name>`, batched
#[derive(Default)]
struct FetchCommand {
    wants: Vec<FetchWant>,
}

impl<L: LocalGraph> Command<SqlProvider<L>> for FetchCommand {
    fn is_batched(&self) -> bool {
        true
    }

    fn handle(&mut self, _provider: &mut SqlProvider<L>, _reply: &mut Reply<'_>, args: &[&str]) -> Result<()> {
        let [hex, name] = args else {
            return Err(HelperError::protocol(format!("fetch expects <id> <name>, got {:?}", args)));
        };
        let id = ObjectId::from_hex(hex)
            .map_err(|_| HelperError::protocol(format!("invalid object id {:?}", hex)))?;
        self.wants.push(FetchWant {
            id,
            name: name.to_string(),
        });
        Ok(())
    }

    fn complete(&mut self, provider: &mut SqlProvider<L>, reply: &mut Reply<'_>) -> Result<()> {
        let wants = std::mem::take(&mut self.wants);
        let stats = provider
            .transport_mut()?
            .open_fetch()?
            .fetch(&wants, &HashSet::new())?;
        provider.options.report(&format!("fetched {} refs", wants.len()), &stats);
        reply.end()
    }
}

struct PushSpec {
    src: String,
    dst: String,
    force: bool,
}

/// `push [+]<src>:<dst>`, batched
#[derive(Default)]
struct PushCommand {
    specs: Vec<PushSpec>,
}

impl<L: LocalGraph> Command<SqlProvider<L>> for PushCommand {
    fn is_batched(&self) -> bool {
        true
    }

    fn handle(&mut self, _provider: &mut SqlProvider<L>, _reply: &mut Reply<'_>, args: &[&str]) -> Result<()> {
        let [spec] = args else {
            return Err(HelperError::protocol(format!("push expects one refspec, got {:?}", args)));
        };
        let (force, spec) = match spec.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, *spec),
        };
        let (src, dst) = spec
            .split_once(':')
            .filter(|(_, dst)| !dst.is_empty())
            .ok_or_else(|| HelperError::protocol(format!("invalid refspec {:?}", spec)))?;
        self.specs.push(PushSpec {
            src: src.to_string(),
            dst: dst.to_string(),
            force,
        });
        Ok(())
    }

    fn complete(&mut self, provider: &mut SqlProvider<L>, reply: &mut Reply<'_>) -> Result<()> {
        let specs = std::mem::take(&mut self.specs);
        let transport = provider.transport_mut()?;
        let mut push = transport.open_push()?;
        let remote_refs = push.refs()?;

        let mut results: Vec<Option<PushOutcome>> = Vec::with_capacity(specs.len());
        let mut updates = Vec::new();
        for spec in &specs {
            let new_id = if spec.src.is_empty() {
                ObjectId::zero()
            } else {
                match push.local().resolve_ref(&spec.src)? {
                    Some(id) => id,
                    None => {
                        info!("cannot resolve {} locally", spec.src);
                        results.push(Some(PushOutcome::new(spec.dst.clone(), RefUpdateResult::Rejected)));
                        continue;
                    }
                }
            };
            results.push(None);
            updates.push(PushUpdate {
                src: spec.src.clone(),
                dst: spec.dst.clone(),
                new_id,
                expected_old: remote_refs.get(&spec.dst).and_then(|r| r.object_id()),
                force: spec.force,
            });
        }

        let (outcomes, stats) = push.push(&updates)?;
        provider.options.report(&format!("pushed {} refs", updates.len()), &stats);
        for outcome in merge_outcomes(results, outcomes)? {
            reply.line(&outcome.reply_line())?;
        }
        reply.end()
    }
}

/// Fill the unresolved slots, in order, with the transport's outcomes
fn merge_outcomes(slots: Vec<Option<PushOutcome>>, pushed: Vec<PushOutcome>) -> Result<Vec<PushOutcome>> {
    let expected = slots.iter().filter(|s| s.is_none()).count();
    if expected != pushed.len() {
        return Err(HelperError::protocol(format!(
            "push returned {} results for {} ref updates",
            pushed.len(),
            expected
        )));
    }
    let mut pushed = pushed.into_iter();
    Ok(slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| pushed.next()))
        .collect())
}

/// `option <name> <value>`
struct OptionCommand;

impl<L: LocalGraph> Command<SqlProvider<L>> for OptionCommand {
    fn handle(&mut self, provider: &mut SqlProvider<L>, reply: &mut Reply<'_>, args: &[&str]) -> Result<()> {
        let Some((name, value)) = args.split_first() else {
            return Err(HelperError::protocol("option without a name"));
        };
        let value = value.join(" ");
        let supported = match *name {
            "verbosity" => match value.parse() {
                Ok(level) => {
                    provider.options.verbosity = level;
                    true
                }
                Err(_) => false,
            },
            "progress" => {
                provider.options.progress = value == "true";
                true
            }
            _ => false,
        };
        debug!("option {} {:?}: {}", name, value, supported);
        reply.line(if supported { "ok" } else { "unsupported" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolDriver;
    use sqlgit_core::{
        Commit, ObjectDatabase, ObjectKind, RefUpdate, SqlRepository, Tree, TreeEntry,
    };

    type Driver = ProtocolDriver<SqlProvider<SqlRepository>, Vec<u8>>;

    fn commit_with_blobs(repo: &mut SqlRepository, names: &[&str]) -> ObjectId {
        let entries = names
            .iter()
            .map(|n| {
                let blob = repo.insert_object(ObjectKind::Blob, n.as_bytes()).unwrap();
                TreeEntry::new(0o100644, *n, blob)
            })
            .collect();
        let tree = repo.insert_object(ObjectKind::Tree, &Tree::new(entries).encode()).unwrap();
        let commit = Commit::new(tree, vec![], "T <t@example.com>", 1, "msg\n");
        repo.insert_object(ObjectKind::Commit, &commit.encode()).unwrap()
    }

    fn driver(remote: SqlRepository, local: SqlRepository, read_only: bool) -> Driver {
        let transport = Transport::new(remote, local).read_only(read_only);
        ProtocolDriver::new(SqlProvider::new(transport), Vec::new())
    }

    fn send(driver: &mut Driver, lines: &[&str]) -> String {
        let before = driver.output().len();
        for line in lines {
            driver.handle_line(line).unwrap();
        }
        String::from_utf8(driver.output()[before..].to_vec()).unwrap()
    }

    fn transport(driver: &Driver) -> &Transport<SqlRepository> {
        driver.provider().unwrap().transport().unwrap()
    }

    #[test]
    fn test_capabilities() {
        let mut d = driver(SqlRepository::open_in_memory().unwrap(), SqlRepository::open_in_memory().unwrap(), false);
        assert_eq!(send(&mut d, &["capabilities"]), "fetch\npush\n\n");

        let mut d = driver(SqlRepository::open_in_memory().unwrap(), SqlRepository::open_in_memory().unwrap(), true);
        assert_eq!(send(&mut d, &["capabilities"]), "fetch\n\n");
    }

    #[test]
    fn test_list_direct_then_symbolic() {
        let mut remote = SqlRepository::open_in_memory().unwrap();
        let c = commit_with_blobs(&mut remote, &["a"]);
        remote.update_ref(&RefUpdate::new("refs/heads/main", c)).unwrap();
        remote.link_ref("HEAD", "refs/heads/main").unwrap();

        let mut d = driver(remote, SqlRepository::open_in_memory().unwrap(), false);
        let out = send(&mut d, &["list"]);
        assert_eq!(out, format!("{} refs/heads/main\n@refs/heads/main HEAD\n\n", c));
        assert_eq!(send(&mut d, &["list for-push"]), out);
    }

    #[test]
    fn test_list_unborn_head() {
        let mut d = driver(SqlRepository::open_in_memory().unwrap(), SqlRepository::open_in_memory().unwrap(), false);
        assert_eq!(send(&mut d, &["list"]), "@refs/heads/master HEAD\n\n");
    }

    #[test]
    fn test_fetch_batch() {
        let mut remote = SqlRepository::open_in_memory().unwrap();
        let c = commit_with_blobs(&mut remote, &["a", "b", "c"]);
        let mut d = driver(remote, SqlRepository::open_in_memory().unwrap(), false);

        let fetch = format!("fetch {} refs/heads/master", c);
        assert_eq!(send(&mut d, &[&fetch, &fetch]), "");
        assert_eq!(send(&mut d, &[""]), "\n");
        assert_eq!(transport(&d).local().object_count().unwrap(), Some(5));
    }

    #[test]
    fn test_malformed_fetch() {
        let mut d = driver(SqlRepository::open_in_memory().unwrap(), SqlRepository::open_in_memory().unwrap(), false);
        assert!(matches!(d.handle_line("fetch nothex refs/heads/x"), Err(HelperError::Protocol(_))));
        assert!(matches!(d.handle_line("push no-colon"), Err(HelperError::Protocol(_))));
    }

    #[test]
    fn test_push_batch() {
        let mut local = SqlRepository::open_in_memory().unwrap();
        let c = commit_with_blobs(&mut local, &["x"]);
        local.update_ref(&RefUpdate::new("refs/heads/master", c)).unwrap();
        let mut d = driver(SqlRepository::open_in_memory().unwrap(), local, false);

        let out = send(
            &mut d,
            &[
                "push refs/heads/master:refs/heads/master",
                "push refs/heads/missing:refs/heads/other",
                "",
            ],
        );
        assert_eq!(out, "ok refs/heads/master\nerror refs/heads/other REJECTED\n\n");
        let remote = transport(&d).remote();
        assert!(remote.has_object(&c).unwrap());
        assert_eq!(remote.find_ref("HEAD").unwrap().unwrap().object_id(), Some(c));
    }

    #[test]
    fn test_push_delete() {
        let mut remote = SqlRepository::open_in_memory().unwrap();
        let c = commit_with_blobs(&mut remote, &["x"]);
        remote.update_ref(&RefUpdate::new("refs/heads/topic", c)).unwrap();
        let mut d = driver(remote, SqlRepository::open_in_memory().unwrap(), false);

        assert_eq!(send(&mut d, &["push :refs/heads/topic", ""]), "ok refs/heads/topic\n\n");
        assert!(transport(&d).remote().find_ref("refs/heads/topic").unwrap().is_none());
    }

    #[test]
    fn test_push_to_read_only() {
        let mut local = SqlRepository::open_in_memory().unwrap();
        let c = commit_with_blobs(&mut local, &["x"]);
        local.update_ref(&RefUpdate::new("refs/heads/master", c)).unwrap();
        let mut d = driver(SqlRepository::open_in_memory().unwrap(), local, true);

        d.handle_line("push refs/heads/master:refs/heads/master").unwrap();
        assert!(matches!(d.handle_line(""), Err(HelperError::NotSupported(_))));
    }

    #[test]
    fn test_merge_outcomes_keeps_order() {
        let slots = vec![None, Some(PushOutcome::new("b", RefUpdateResult::Rejected)), None];
        let pushed = vec![
            PushOutcome::new("a", RefUpdateResult::New),
            PushOutcome::new("c", RefUpdateResult::Forced),
        ];
        let merged: Vec<String> = merge_outcomes(slots, pushed).unwrap().iter().map(|o| o.reply_line()).collect();
        assert_eq!(merged, vec!["ok a", "error b REJECTED", "ok c"]);
    }

    #[test]
    fn test_merge_outcomes_count_mismatch() {
        let slots = vec![None, None];
        let pushed = vec![PushOutcome::new("a", RefUpdateResult::New)];
        assert!(matches!(merge_outcomes(slots, pushed), Err(HelperError::Protocol(_))));
    }

    #[test]
    fn test_options() {
        let mut d = driver(SqlRepository::open_in_memory().unwrap(), SqlRepository::open_in_memory().unwrap(), false);
        assert_eq!(send(&mut d, &["option verbosity 2"]), "ok\n");
        assert_eq!(send(&mut d, &["option progress true"]), "ok\n");
        assert_eq!(send(&mut d, &["option dry-run true"]), "unsupported\n");
        let options = d.provider().unwrap().options();
        assert_eq!(options.verbosity, 2);
        assert!(options.progress);
        assert!(options.is_verbose());
        assert!(!HelperOptions::default().is_verbose());
    }
}
