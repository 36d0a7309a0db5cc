//! git-remote-sqlgit - git remote helper for SQL-backed repositories.
//!
//! # Usage
//!
//! ```bash
//! # Clone from a SQLite file
//! git clone sqlgit::sqlite:/srv/git/project.db project
//!
//! # Push to it
//! git push origin master
//! ```
//!
//! git invokes the helper as `git-remote-sqlgit <remote> <url>` with
//! `GIT_DIR` set; the protocol runs over stdin and stdout, logs go to
//! stderr.

use std::io::{self, BufWriter};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sqlgit_remote::{ConnectionConfig, LocalRepository, ProtocolDriver, SqlProvider, Transport};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "git-remote-sqlgit")]
#[command(version)]
#[command(about = "Git remote helper for SQL-backed repositories")]
struct Cli {
    /// Remote name, or the URL when given alone
    remote: String,

    /// Repository URL, e.g. sqlite:/path/to/repo.db
    url: Option<String>,

    /// Local git directory (defaults to $GIT_DIR, then the current directory)
    #[arg(long)]
    git_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// `(remote, url)`; a lone argument is the URL of an unnamed remote
    fn remote_and_url(&self) -> (&str, &str) {
        match &self.url {
            Some(url) => (self.remote.as_str(), url.as_str()),
            None => ("", self.remote.as_str()),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("sqlgit={}", level).parse()?)
                .add_directive(format!("git_remote_sqlgit={}", level).parse()?),
        )
        .init();

    let git_dir = cli
        .git_dir
        .clone()
        .or_else(|| std::env::var_os("GIT_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    if !git_dir.exists() {
        bail!("git directory {:?} does not exist", git_dir);
    }
    let local = LocalRepository::open(&git_dir)
        .with_context(|| format!("failed to open git repository at {:?}", git_dir))?;

    let (remote, url) = cli.remote_and_url();
    let mut config = ConnectionConfig::parse(url).with_context(|| format!("invalid remote URL {:?}", url))?;
    config.apply_remote_config(&local.config()?, remote);
    debug!("connecting to {:?} ({:?})", config.location, config.engine);

    let repo = config
        .connect()
        .with_context(|| format!("failed to connect to {}", url))?;
    info!("connected to {}", url);

    let transport = Transport::new(repo, local).read_only(config.read_only);
    let stdout = io::stdout();
    let mut driver = ProtocolDriver::new(SqlProvider::new(transport), BufWriter::new(stdout.lock()));
    driver.run(io::stdin().lock()).context("remote helper session failed")?;
    Ok(())
}
