//! Per-command lifecycle tracking.
//!
//! Every inbound request, notification delivery and hook stage becomes a
//! [`Command`]. Handlers only ever hold the lightweight handle; the live state
//! (where the command came from and how many nested requests it is waiting
//! on) sits in the command table until the command reaches its single
//! terminal outcome, at which point the entry is removed. A handle whose entry
//! is gone therefore refers to a terminal command.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::RpcError;

/// Tracing target for lifecycle operations.
pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Opaque identity of a command within one plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandKey(u64);

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

/// Non-owning handle to a command being serviced.
///
/// Handles are cheap to clone and may be captured by continuations; they stay
/// valid after the command finishes, but every terminal operation on a
/// finished command is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    key: CommandKey,
    method: Arc<str>,
}

impl Command {
    /// Returns the command's identity.
    #[must_use]
    pub const fn key(&self) -> CommandKey {
        self.key
    }

    /// Returns the method, hook or topic name the command serves.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// What a handler reported about the command it was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A terminal outcome has been recorded.
    Finished,
    /// A continuation will record the terminal outcome later.
    Pending,
}

/// Token returned by handlers and continuations.
///
/// Only [`PluginContext`](crate::PluginContext) produces these, so a handler
/// cannot claim to have finished a command without going through one of the
/// terminal operations.
#[must_use = "handlers must return the result of a terminal or pending operation"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResult {
    key: CommandKey,
    disposition: Disposition,
}

impl CommandResult {
    pub(crate) const fn finished(key: CommandKey) -> Self {
        Self {
            key,
            disposition: Disposition::Finished,
        }
    }

    pub(crate) const fn pending(key: CommandKey) -> Self {
        Self {
            key,
            disposition: Disposition::Pending,
        }
    }

    /// Returns the command this result belongs to.
    #[must_use]
    pub const fn key(&self) -> CommandKey {
        self.key
    }

    /// Returns whether the command finished or is still pending.
    #[must_use]
    pub const fn disposition(&self) -> Disposition {
        self.disposition
    }
}

/// Position of a command inside a hook chain.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HookStage {
    pub(crate) request_id: Value,
    pub(crate) hook: Arc<str>,
    pub(crate) position: usize,
    pub(crate) params: Value,
}

/// Where a command came from, which decides what its outcome turns into.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Origin {
    /// Host request; the outcome becomes the reply to `id`.
    Request { id: Value },
    /// Notification delivery; nothing is ever sent back.
    Notification,
    /// One handler of a hook chain; the chain decides the reply.
    HookStage(HookStage),
}

/// Terminal outcome of a command.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Success(Value),
    Failure(RpcError),
    Handled,
    Abandoned,
}

/// Live state of a command that has not yet finished.
#[derive(Debug)]
pub(crate) struct LiveCommand {
    pub(crate) method: Arc<str>,
    pub(crate) origin: Origin,
    pub(crate) outstanding: usize,
}

/// Table of live commands.
#[derive(Debug, Default)]
pub(crate) struct CommandTable {
    next_key: u64,
    live: BTreeMap<CommandKey, LiveCommand>,
}

impl CommandTable {
    /// Registers a new live command and returns its handle.
    pub(crate) fn open(&mut self, method: &str, origin: Origin) -> Command {
        let key = CommandKey(self.next_key);
        self.next_key = self.next_key.wrapping_add(1);
        let shared: Arc<str> = Arc::from(method);
        self.live.insert(
            key,
            LiveCommand {
                method: Arc::clone(&shared),
                origin,
                outstanding: 0,
            },
        );
        Command {
            key,
            method: shared,
        }
    }

    pub(crate) fn is_live(&self, key: CommandKey) -> bool {
        self.live.contains_key(&key)
    }

    pub(crate) fn origin(&self, key: CommandKey) -> Option<&Origin> {
        self.live.get(&key).map(|entry| &entry.origin)
    }

    /// Returns the number of nested requests the command is waiting on.
    pub(crate) fn outstanding(&self, key: CommandKey) -> usize {
        self.live.get(&key).map_or(0, |entry| entry.outstanding)
    }

    /// Records one more nested request. Returns `false` for finished commands.
    pub(crate) fn begin_request(&mut self, key: CommandKey) -> bool {
        self.live.get_mut(&key).is_some_and(|entry| {
            entry.outstanding = entry.outstanding.saturating_add(1);
            true
        })
    }

    /// Records the arrival of a reply. Returns `false` for finished commands.
    pub(crate) fn end_request(&mut self, key: CommandKey) -> bool {
        self.live.get_mut(&key).is_some_and(|entry| {
            entry.outstanding = entry.outstanding.saturating_sub(1);
            true
        })
    }

    /// Removes the command, returning its state if it was still live.
    ///
    /// `None` means the command already reached its terminal outcome.
    pub(crate) fn complete(&mut self, key: CommandKey) -> Option<LiveCommand> {
        self.live.remove(&key)
    }

    /// Removes every live command, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<(CommandKey, LiveCommand)> {
        std::mem::take(&mut self.live).into_iter().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }
}
