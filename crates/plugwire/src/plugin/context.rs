//! The view of the engine handed to handlers and continuations.

use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use super::runtime::Runtime;
use crate::error::EngineError;
use crate::lifecycle::{Command, CommandResult, Origin, Outcome};
use crate::options::OptionValues;
use crate::outreq::OutRequest;
use crate::protocol::{OutgoingMessage, RpcError};

/// Tracing target for messages logged on behalf of plugin code.
pub(crate) const PLUGIN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::plugin");

/// Result every handler and continuation returns.
pub type HandlerResult = Result<CommandResult, EngineError>;

/// Handler for a command, hook stage, notification or `init`.
pub type Handler<S> = fn(&mut PluginContext<'_, S>, &Command, &Value) -> HandlerResult;

/// Severity of a log line forwarded to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Raw I/O tracing.
    Io,
    /// Developer detail.
    Debug,
    /// Routine information.
    Info,
    /// Something worth a second look.
    Unusual,
    /// Recoverable misbehaviour.
    Warn,
    /// Something is broken.
    Broken,
}

impl LogLevel {
    /// Returns the level name the host expects.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Unusual => "unusual",
            Self::Warn => "warn",
            Self::Broken => "broken",
        }
    }
}

/// Mutable access to the plugin while one handler runs.
///
/// Every terminal operation returns a [`HandlerResult`] that the handler
/// passes straight back to the engine:
///
/// ```
/// use plugwire::{Command, HandlerResult, PluginContext};
/// use serde_json::{Value, json};
///
/// fn hello(ctx: &mut PluginContext<'_, ()>, cmd: &Command, params: &Value) -> HandlerResult {
///     match params.get("name").and_then(Value::as_str) {
///         Some(name) => ctx.success(cmd, json!({ "hello": name })),
///         None => ctx.param_failed(cmd, "name is required"),
///     }
/// }
/// ```
pub struct PluginContext<'a, S> {
    state: &'a mut S,
    runtime: &'a mut Runtime<S>,
}

impl<'a, S> PluginContext<'a, S> {
    pub(crate) const fn new(state: &'a mut S, runtime: &'a mut Runtime<S>) -> Self {
        Self { state, runtime }
    }

    /// Returns the plugin's user state.
    #[must_use]
    pub const fn state(&self) -> &S {
        self.state
    }

    /// Returns the plugin's user state for modification.
    #[must_use]
    pub const fn state_mut(&mut self) -> &mut S {
        self.state
    }

    /// Returns the plugin name given to the builder.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.runtime.plugin_name
    }

    /// Returns the option values delivered with `init`.
    #[must_use]
    pub const fn options(&self) -> &OptionValues {
        &self.runtime.options
    }

    /// Returns the `configuration` object delivered with `init`.
    #[must_use]
    pub const fn configuration(&self) -> &Value {
        &self.runtime.configuration
    }

    /// Finishes `cmd` with a success payload.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished; nothing is sent in that case.
    pub fn success(&mut self, cmd: &Command, result: Value) -> HandlerResult {
        self.runtime.finish(cmd, Outcome::Success(result))
    }

    /// Finishes `cmd` with an error reply.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished.
    pub fn fail(&mut self, cmd: &Command, rpc_error: RpcError) -> HandlerResult {
        self.runtime.finish(cmd, Outcome::Failure(rpc_error))
    }

    /// Finishes `cmd` with an invalid-parameters error.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished.
    pub fn param_failed(&mut self, cmd: &Command, message: impl Into<String>) -> HandlerResult {
        self.fail(cmd, RpcError::invalid_params(message))
    }

    /// Finishes a hook stage, letting the next handler in the chain run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished.
    pub fn hook_continue(&mut self, cmd: &Command) -> HandlerResult {
        self.success(cmd, json!({ "result": "continue" }))
    }

    /// Finishes a notification delivery. Nothing is sent to the host.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished.
    pub fn notification_handled(&mut self, cmd: &Command) -> HandlerResult {
        self.runtime.finish(cmd, Outcome::Handled)
    }

    /// Finishes `init`, accepting the host's configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished.
    pub fn init_complete(&mut self, cmd: &Command) -> HandlerResult {
        self.success(cmd, Value::Object(Map::new()))
    }

    /// Finishes `init` by asking the host to disable the plugin.
    ///
    /// The plugin exits with status 0 once the reply is written.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished.
    pub fn disable(&mut self, cmd: &Command, reason: impl Into<String>) -> HandlerResult {
        let text = reason.into();
        info!(target: PLUGIN_TARGET, reason = text.as_str(), "plugin disabled itself");
        let result = self.success(cmd, json!({ "disable": text }))?;
        self.runtime.request_exit(0);
        Ok(result)
    }

    /// Marks `cmd` as waiting for something other than a nested request.
    ///
    /// The handler must arrange for a later continuation to finish it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished.
    pub fn pending(&mut self, cmd: &Command) -> HandlerResult {
        if self.runtime.commands.is_live(cmd.key()) {
            Ok(CommandResult::pending(cmd.key()))
        } else {
            Err(EngineError::AlreadyTerminal {
                method: cmd.method().to_owned(),
            })
        }
    }

    /// Sends `request` to the host on behalf of `cmd`.
    ///
    /// Returns `Pending`; the request's continuations decide how `cmd`
    /// finishes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished; the request is not sent.
    pub fn send_request(&mut self, cmd: &Command, request: OutRequest<S>) -> HandlerResult {
        self.runtime.issue(cmd, request)
    }

    /// Returns how many nested requests `cmd` is still waiting on.
    #[must_use]
    pub fn outstanding(&self, cmd: &Command) -> usize {
        self.runtime.commands.outstanding(cmd.key())
    }

    /// Returns `true` while `cmd` has not reached its terminal outcome.
    #[must_use]
    pub fn is_pending(&self, cmd: &Command) -> bool {
        self.runtime.commands.is_live(cmd.key())
    }

    /// Sends a `log` notification to the host and mirrors it to `tracing`.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let line = message.into();
        match level {
            LogLevel::Io | LogLevel::Debug => debug!(target: PLUGIN_TARGET, "{line}"),
            LogLevel::Info => info!(target: PLUGIN_TARGET, "{line}"),
            LogLevel::Unusual | LogLevel::Warn => warn!(target: PLUGIN_TARGET, "{line}"),
            LogLevel::Broken => error!(target: PLUGIN_TARGET, "{line}"),
        }
        self.send_notification("log", json!({ "level": level.as_str(), "message": line }));
    }

    /// Sends a `message` notification tied to the request `cmd` serves.
    ///
    /// Commands that do not answer a host request carry no id.
    pub fn notify_message(&mut self, cmd: &Command, level: LogLevel, message: impl Into<String>) {
        let mut params = Map::new();
        if let Some(Origin::Request { id }) = self.runtime.origin_of(cmd) {
            params.insert("id".into(), id.clone());
        }
        params.insert("level".into(), Value::from(level.as_str()));
        params.insert("message".into(), Value::from(message.into()));
        self.send_notification("message", Value::Object(params));
    }

    /// Sends an arbitrary notification to the host.
    pub fn send_notification(&mut self, method: impl Into<String>, params: Value) {
        self.runtime
            .outbox
            .push(OutgoingMessage::notification(method, params));
    }

    /// Abandons `cmd` and asks the engine to stop with `code`.
    ///
    /// Every other pending command is abandoned too; none of them is replied
    /// to.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already
    /// finished.
    pub fn exit(&mut self, cmd: &Command, code: i32) -> HandlerResult {
        let result = self.runtime.finish(cmd, Outcome::Abandoned)?;
        self.runtime.request_exit(code);
        Ok(result)
    }
}
