//! Git remote helper protocol engine.
//!
//! Implements the line protocol described in git-remote-helpers(7): one
//! command per line, arguments separated by whitespace, a blank line ending
//! a batch. Command semantics live behind [`CommandProvider`]; this module
//! only dispatches, batches and writes replies.

use std::io::{BufRead, Write};

use tracing::{debug, warn};

use crate::error::{HelperError, Result};

/// One advertised capability, written as `name` or `name data`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
    pub data: Option<String>,
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
        }
    }

    pub fn with_data(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Some(data.into()),
        }
    }

    fn line(&self) -> String {
        match &self.data {
            Some(data) => format!("{} {}", self.name, data),
            None => self.name.clone(),
        }
    }
}

/// Reply channel handed to commands; every line is flushed immediately
pub struct Reply<'a> {
    out: &'a mut dyn Write,
}

impl<'a> Reply<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }

    pub fn line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        Ok(())
    }

    /// Blank line terminating a data block
    pub fn end(&mut self) -> Result<()> {
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

/// A protocol command bound to a provider type
pub trait Command<P> {
    /// Batched commands receive every consecutive line with their name and
    /// complete on the next blank line
    fn is_batched(&self) -> bool {
        false
    }

    fn handle(&mut self, provider: &mut P, reply: &mut Reply<'_>, args: &[&str]) -> Result<()>;

    fn complete(&mut self, _provider: &mut P, _reply: &mut Reply<'_>) -> Result<()> {
        Ok(())
    }
}

/// Supplies capabilities and commands to the [`ProtocolDriver`]
pub trait CommandProvider: Sized {
    /// Handler for `name`, or `None` when the provider does not implement it
    fn command(&self, name: &str) -> Option<Box<dyn Command<Self>>>;

    /// Capabilities in advertisement order
    fn capabilities(&mut self) -> Result<Vec<Capability>>;

    /// Release the provider's resources
    fn close(&mut self) -> Result<()>;
}

/// Built-in `capabilities` handler
struct CapabilitiesCommand;

impl<P: CommandProvider> Command<P> for CapabilitiesCommand {
    fn handle(&mut self, provider: &mut P, reply: &mut Reply<'_>, _args: &[&str]) -> Result<()> {
        for capability in provider.capabilities()? {
            reply.line(&capability.line())?;
        }
        Ok(())
    }

    fn complete(&mut self, _provider: &mut P, reply: &mut Reply<'_>) -> Result<()> {
        reply.end()
    }
}

fn default_command<P: CommandProvider>(name: &str) -> Option<Box<dyn Command<P>>> {
    match name {
        "capabilities" => Some(Box::new(CapabilitiesCommand)),
        _ => None,
    }
}

struct ActiveCommand<P> {
    name: String,
    command: Box<dyn Command<P>>,
}

/// Reads protocol lines and dispatches them to a provider
pub struct ProtocolDriver<P: CommandProvider, W: Write> {
    provider: Option<P>,
    out: W,
    active: Option<ActiveCommand<P>>,
}

impl<P: CommandProvider, W: Write> ProtocolDriver<P, W> {
    pub fn new(provider: P, out: W) -> Self {
        Self {
            provider: Some(provider),
            out,
            active: None,
        }
    }

    /// Whether a batched command is waiting for its terminating blank line
    pub fn is_batching(&self) -> bool {
        self.active.is_some()
    }

    pub fn provider(&self) -> Option<&P> {
        self.provider.as_ref()
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Process one input line
    pub fn handle_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        let provider = self
            .provider
            .as_mut()
            .ok_or_else(|| HelperError::protocol("session already closed"))?;
        let mut reply = Reply::new(&mut self.out);

        if line.is_empty() {
            if let Some(mut active) = self.active.take() {
                debug!("completing batched {}", active.name);
                active.command.complete(provider, &mut reply)?;
            }
            return Ok(());
        }

        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        if let Some(active) = self.active.as_mut() {
            if active.name != name {
                return Err(HelperError::protocol(format!(
                    "'{}' received while a '{}' batch is open",
                    name, active.name
                )));
            }
            return active.command.handle(provider, &mut reply, &args);
        }

        let mut command = provider
            .command(name)
            .or_else(|| default_command(name))
            .ok_or_else(|| HelperError::protocol(format!("Unknown Command: {}", name)))?;
        debug!("dispatching {} {:?}", name, args);
        command.handle(provider, &mut reply, &args)?;
        if command.is_batched() {
            self.active = Some(ActiveCommand {
                name: name.to_string(),
                command,
            });
        } else {
            command.complete(provider, &mut reply)?;
        }
        Ok(())
    }

    /// Read lines until end of input, then release the provider
    pub fn run<R: BufRead>(&mut self, input: R) -> Result<()> {
        let result = self.read_loop(input);
        let closed = self.close();
        result.and(closed)
    }

    fn read_loop<R: BufRead>(&mut self, input: R) -> Result<()> {
        for line in input.lines() {
            self.handle_line(&line?)?;
        }
        if let Some(active) = &self.active {
            debug!("input ended inside a '{}' batch", active.name);
        }
        Ok(())
    }

    /// Release the provider; later calls do nothing
    pub fn close(&mut self) -> Result<()> {
        self.active = None;
        match self.provider.take() {
            Some(mut provider) => provider.close(),
            None => Ok(()),
        }
    }
}

impl<P: CommandProvider, W: Write> Drop for ProtocolDriver<P, W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close provider: {}", e);
        }
    }
}
