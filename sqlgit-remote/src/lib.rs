//! Git remote helper for SQL-backed repositories.
//!
//! git runs `git-remote-sqlgit <remote> <url>` for `sqlgit::<url>` remotes
//! and talks to it over stdin/stdout. [`ProtocolDriver`] parses that
//! conversation, [`SqlProvider`] implements its commands, and
//! [`Transport`] moves objects and refs between the local repository and
//! a [`sqlgit_core::SqlRepository`].

pub mod config;
pub mod error;
pub mod local;
pub mod protocol;
pub mod provider;
pub mod transport;
pub mod walk;

pub use config::{ConnectionConfig, Location};
pub use error::{HelperError, Result};
pub use local::LocalRepository;
pub use protocol::{Capability, Command, CommandProvider, ProtocolDriver, Reply};
pub use provider::{HelperOptions, SqlProvider};
pub use transport::{
    FetchConnection, FetchWant, LocalGraph, PushConnection, PushOutcome, PushUpdate, TransferOptions,
    TransferStats, Transport,
};
pub use walk::{collect_missing, copy_objects, is_ancestor, Cancellation, Walk};
