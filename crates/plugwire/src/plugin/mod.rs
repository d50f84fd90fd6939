//! Plugin construction and the dispatch loop.
//!
//! A [`PluginBuilder`] collects the static registration tables, validates
//! them and freezes them into a [`Plugin`]. The plugin then reads JSON-RPC
//! messages from the host, routes each one to the built-in methods, a
//! command, a hook chain, notification subscribers or the continuation
//! waiting for a reply, and writes whatever the handlers produced.
//!
//! Everything runs on the calling thread. A handler that needs data from the
//! host issues a nested request and returns `Pending`; other messages are
//! serviced while the reply is outstanding.

mod context;
mod manifest;
mod runtime;

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use plugwire_config::Config;

use self::runtime::{StageOutcome, invoke};
use crate::error::EngineError;
use crate::hooks::{HOOKS_TARGET, HookCoordinator, HookRegistration};
use crate::lifecycle::{HookStage, Origin};
use crate::notifications::NotificationRouter;
use crate::options::{OptionValues, PluginOption};
use crate::protocol::{
    DEFAULT_MAX_MESSAGE_BYTES, JsonlWriter, Message, MessageDecoder, MessageSink,
    OutgoingMessage, RpcError, codes,
};
use crate::registry::{CommandRegistry, CommandSpec, RESERVED_METHODS};

pub use self::context::{Handler, HandlerResult, LogLevel, PluginContext};
pub(crate) use self::runtime::Runtime;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How a plugin run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A handler asked the plugin to exit with this status.
    Exited(i32),
    /// The host closed the transport.
    HostClosed,
}

impl RunOutcome {
    /// Returns the process exit status for this outcome.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::HostClosed => 0,
        }
    }
}

/// Collects the registration tables of a plugin.
///
/// # Example
///
/// ```
/// use plugwire::{Command, CommandSpec, HandlerResult, PluginBuilder, PluginContext};
/// use serde_json::{Value, json};
///
/// fn hello(ctx: &mut PluginContext<'_, ()>, cmd: &Command, _params: &Value) -> HandlerResult {
///     ctx.success(cmd, json!({ "hello": "world" }))
/// }
///
/// let plugin = PluginBuilder::new("hello", ())
///     .command(CommandSpec::new("hello", hello).description("Say hello."))
///     .build()
///     .expect("valid registration tables");
/// assert_eq!(plugin.pending_commands(), 0);
/// ```
pub struct PluginBuilder<S> {
    name: String,
    state: S,
    commands: Vec<CommandSpec<S>>,
    hooks: Vec<HookRegistration<S>>,
    subscriptions: Vec<(String, Handler<S>)>,
    options: Vec<PluginOption>,
    init: Option<Handler<S>>,
    dynamic: bool,
    max_message_bytes: usize,
}

impl<S> PluginBuilder<S> {
    /// Starts a plugin called `name` that owns `state`.
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state,
            commands: Vec::new(),
            hooks: Vec::new(),
            subscriptions: Vec::new(),
            options: Vec::new(),
            init: None,
            dynamic: true,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    /// Registers a command.
    #[must_use]
    pub fn command(mut self, spec: CommandSpec<S>) -> Self {
        self.commands.push(spec);
        self
    }

    /// Registers a hook implementation.
    #[must_use]
    pub fn hook(mut self, registration: HookRegistration<S>) -> Self {
        self.hooks.push(registration);
        self
    }

    /// Subscribes `handler` to a notification topic, or to every topic
    /// with `*`.
    #[must_use]
    pub fn subscribe(mut self, topic: impl Into<String>, handler: Handler<S>) -> Self {
        self.subscriptions.push((topic.into(), handler));
        self
    }

    /// Declares an option.
    #[must_use]
    pub fn option(mut self, option: PluginOption) -> Self {
        self.options.push(option);
        self
    }

    /// Sets the handler that runs when the host sends `init`.
    #[must_use]
    pub fn on_init(mut self, handler: Handler<S>) -> Self {
        self.init = Some(handler);
        self
    }

    /// Sets whether the host may stop and restart the plugin at runtime.
    #[must_use]
    pub const fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Sets the largest inbound message the decoder buffers.
    #[must_use]
    pub const fn max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    /// Applies the process configuration.
    #[must_use]
    pub fn with_config(self, config: &Config) -> Self {
        self.max_message_bytes(config.max_message_bytes())
    }

    /// Validates the tables and freezes them.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for blank, duplicate or
    /// reserved names and for hooks that share a name with a command, and
    /// [`EngineError::HookCycle`] when ordering constraints cannot be met.
    pub fn build(self) -> Result<Plugin<S>, EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::configuration("plugin name must not be blank"));
        }
        let commands = CommandRegistry::from_specs(self.commands)?;
        let hooks = HookCoordinator::resolve(&self.name, self.hooks)?;
        for hook in hooks.hook_names() {
            if commands.contains(hook) || RESERVED_METHODS.contains(&hook) {
                return Err(EngineError::configuration(format!(
                    "hook '{hook}' clashes with a command of the same name"
                )));
            }
        }
        let mut seen = HashSet::new();
        for option in &self.options {
            if !seen.insert(option.name()) {
                return Err(EngineError::configuration(format!(
                    "option '{}' is declared more than once",
                    option.name()
                )));
            }
        }
        let notifications = NotificationRouter::new(self.subscriptions)?;

        debug!(
            target: DISPATCH_TARGET,
            plugin = self.name.as_str(),
            options = self.options.len(),
            "plugin tables frozen"
        );
        Ok(Plugin {
            commands,
            hooks,
            notifications,
            options: self.options,
            init: self.init,
            dynamic: self.dynamic,
            decoder: MessageDecoder::with_limit(self.max_message_bytes),
            state: self.state,
            runtime: Runtime::new(&self.name),
        })
    }
}

/// A plugin with frozen registries, ready to serve a host.
pub struct Plugin<S> {
    commands: CommandRegistry<S>,
    hooks: HookCoordinator<S>,
    notifications: NotificationRouter<S>,
    options: Vec<PluginOption>,
    init: Option<Handler<S>>,
    dynamic: bool,
    decoder: MessageDecoder,
    state: S,
    runtime: Runtime<S>,
}

impl<S> Plugin<S> {
    /// Serves the host until it closes the stream or a handler exits.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: malformed input, a handler breaking the
    /// dispatch contract, or a transport failure. Output produced before the
    /// failure is still written.
    pub fn run<R: Read, W: Write>(
        &mut self,
        reader: R,
        writer: W,
    ) -> Result<RunOutcome, EngineError> {
        let mut sink = JsonlWriter::new(writer);
        self.run_with_sink(reader, &mut sink)
    }

    /// Serves the host, writing through `sink`.
    ///
    /// # Errors
    ///
    /// As for [`Plugin::run`].
    pub fn run_with_sink<R: Read, K: MessageSink>(
        &mut self,
        mut reader: R,
        sink: &mut K,
    ) -> Result<RunOutcome, EngineError> {
        info!(target: DISPATCH_TARGET, plugin = self.plugin_name(), "serving host");
        let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(count) => count,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.flush_outbox(sink)?;
                    return Err(error.into());
                }
            };
            let step = if read == 0 {
                self.close().map(Some)
            } else {
                self.receive(chunk.get(..read).unwrap_or_default())
            };
            self.flush_outbox(sink)?;
            if let Some(outcome) = step? {
                info!(target: DISPATCH_TARGET, outcome = ?outcome, "stopped serving host");
                return Ok(outcome);
            }
        }
    }

    /// Decodes and handles every complete message in `bytes`.
    ///
    /// Returns the outcome once a handler has asked the plugin to exit.
    /// Messages are only queued; collect them with
    /// [`take_outgoing`](Self::take_outgoing).
    ///
    /// # Errors
    ///
    /// Returns fatal decoding and dispatch errors. Malformed JSON also
    /// queues a parse-error reply with a `null` id before failing.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Option<RunOutcome>, EngineError> {
        self.decoder.feed(bytes);
        loop {
            let message = match self.decoder.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(None),
                Err(error) => {
                    if let EngineError::Protocol { source: Some(_), message: detail } = &error {
                        self.runtime.outbox.push(OutgoingMessage::error(
                            Value::Null,
                            RpcError::new(codes::PARSE_ERROR, detail.clone()),
                        ));
                    }
                    return Err(error);
                }
            };
            self.handle_message(message)?;
            if let Some(outcome) = self.exit_outcome() {
                return Ok(Some(outcome));
            }
        }
    }

    /// Handles one decoded message.
    ///
    /// # Errors
    ///
    /// Returns fatal dispatch errors.
    pub fn handle_message(&mut self, message: Message) -> Result<(), EngineError> {
        match message {
            Message::Request { id, method, params } => self.dispatch_request(id, &method, &params)?,
            Message::Notification { method, params } => {
                self.dispatch_notification(&method, &params)?;
            }
            Message::Response { id, outcome } => self.dispatch_reply(&id, &outcome)?,
            Message::Invalid { id, error } => {
                warn!(
                    target: DISPATCH_TARGET,
                    id = %id,
                    code = error.code,
                    reason = error.message.as_str(),
                    "rejecting invalid request"
                );
                self.runtime.outbox.push(OutgoingMessage::error(id, error));
            }
        }
        self.drain_stage_outcomes()
    }

    /// Ends the session after the host closed the stream.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the stream stopped inside a message.
    pub fn close(&mut self) -> Result<RunOutcome, EngineError> {
        self.runtime.abandon_all("host closed the connection");
        self.decoder.finish()?;
        Ok(RunOutcome::HostClosed)
    }

    /// Removes and returns the messages queued for the host.
    pub fn take_outgoing(&mut self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut self.runtime.outbox)
    }

    /// Returns the number of commands that have not finished.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.runtime.commands.len()
    }

    /// Returns the number of outbound requests awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.runtime.outreqs.len()
    }

    /// Returns the exit status requested by a handler, if any.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.runtime.exit
    }

    /// Returns the plugin name.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.runtime.plugin_name
    }

    /// Returns the option values delivered with `init`.
    #[must_use]
    pub const fn options(&self) -> &OptionValues {
        &self.runtime.options
    }

    /// Returns the user state.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    fn exit_outcome(&mut self) -> Option<RunOutcome> {
        let code = self.runtime.exit?;
        self.runtime.abandon_all("plugin is exiting");
        Some(RunOutcome::Exited(code))
    }

    fn flush_outbox<K: MessageSink>(&mut self, sink: &mut K) -> Result<(), EngineError> {
        if self.runtime.outbox.is_empty() {
            return Ok(());
        }
        for message in self.runtime.outbox.drain(..) {
            sink.send(&message)?;
        }
        sink.flush()
    }

    fn dispatch_request(
        &mut self,
        id: Value,
        method: &str,
        params: &Value,
    ) -> Result<(), EngineError> {
        debug!(target: DISPATCH_TARGET, method, id = %id, "dispatching request");
        match method {
            "getmanifest" => {
                self.answer_manifest(id, params);
                Ok(())
            }
            "init" => self.initialise(id, params),
            _ => {
                if let Some(handler) = self.commands.lookup(method, self.runtime.allow_deprecated) {
                    let cmd = self.runtime.commands.open(method, Origin::Request { id });
                    invoke(&mut self.state, &mut self.runtime, &cmd, |ctx, command| {
                        handler(ctx, command, params)
                    })
                } else if self.hooks.chain(method).is_some() {
                    self.run_hook_stage(HookStage {
                        request_id: id,
                        hook: Arc::from(method),
                        position: 0,
                        params: params.clone(),
                    })
                } else {
                    warn!(target: DISPATCH_TARGET, method, id = %id, "unknown method");
                    self.runtime
                        .outbox
                        .push(OutgoingMessage::error(id, RpcError::method_not_found(method)));
                    Ok(())
                }
            }
        }
    }

    fn answer_manifest(&mut self, id: Value, params: &Value) {
        self.runtime.allow_deprecated = params
            .get("allow-deprecated-apis")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let offer = manifest::render(self);
        self.runtime.outbox.push(OutgoingMessage::success(id, offer));
    }

    fn initialise(&mut self, id: Value, params: &Value) -> Result<(), EngineError> {
        let no_options = Value::Object(Map::new());
        let supplied = params.get("options").unwrap_or(&no_options);
        match OptionValues::resolve(&self.options, supplied) {
            Ok(values) => {
                debug!(target: DISPATCH_TARGET, options = %values.to_json(), "options resolved");
                self.runtime.options = values;
            }
            Err(error) => {
                warn!(target: DISPATCH_TARGET, error = %error, "rejecting init options");
                self.runtime
                    .outbox
                    .push(OutgoingMessage::error(id, RpcError::invalid_params(error.to_string())));
                self.runtime.request_exit(1);
                return Ok(());
            }
        }
        if let Some(configuration) = params.get("configuration") {
            self.runtime.configuration = configuration.clone();
        }

        let Some(handler) = self.init else {
            self.runtime
                .outbox
                .push(OutgoingMessage::success(id, Value::Object(Map::new())));
            return Ok(());
        };
        let cmd = self.runtime.commands.open("init", Origin::Request { id });
        invoke(&mut self.state, &mut self.runtime, &cmd, |ctx, command| {
            handler(ctx, command, params)
        })
    }

    fn dispatch_notification(&mut self, topic: &str, params: &Value) -> Result<(), EngineError> {
        let handlers = self.notifications.handlers_for(topic);
        if handlers.is_empty() {
            debug!(target: DISPATCH_TARGET, topic, "no subscribers for notification");
            return Ok(());
        }
        for handler in handlers {
            if self.runtime.exit.is_some() {
                break;
            }
            let cmd = self.runtime.commands.open(topic, Origin::Notification);
            invoke(&mut self.state, &mut self.runtime, &cmd, |ctx, command| {
                handler(ctx, command, params)
            })?;
        }
        Ok(())
    }

    fn dispatch_reply(
        &mut self,
        id: &Value,
        outcome: &Result<Value, RpcError>,
    ) -> Result<(), EngineError> {
        let Some(pending) = self.runtime.claim_reply(id) else {
            return Ok(());
        };
        let owner = pending.owner.clone();
        debug!(
            target: DISPATCH_TARGET,
            correlation_id = %id,
            method = pending.method.as_str(),
            failed = outcome.is_err(),
            "reply received"
        );
        invoke(&mut self.state, &mut self.runtime, &owner, |ctx, _| {
            pending.resolve(ctx, outcome.as_ref())
        })
    }

    fn run_hook_stage(&mut self, stage: HookStage) -> Result<(), EngineError> {
        let Some(handler) = self.hooks.stage(&stage.hook, stage.position) else {
            return Err(EngineError::violation(
                &*stage.hook,
                format!("hook chain has no stage {}", stage.position),
            ));
        };
        debug!(
            target: HOOKS_TARGET,
            hook = &*stage.hook,
            position = stage.position,
            "running hook stage"
        );
        let params = stage.params.clone();
        let hook = Arc::clone(&stage.hook);
        let cmd = self.runtime.commands.open(&hook, Origin::HookStage(stage));
        invoke(&mut self.state, &mut self.runtime, &cmd, |ctx, command| {
            handler(ctx, command, &params)
        })
    }

    fn drain_stage_outcomes(&mut self) -> Result<(), EngineError> {
        while let Some(StageOutcome { stage, outcome }) = self.runtime.stage_outcomes.pop_front() {
            if self.runtime.exit.is_some() {
                break;
            }
            let next = stage.position.saturating_add(1);
            match outcome {
                Ok(result) if is_continue(&result) && self.hooks.stage(&stage.hook, next).is_some() => {
                    self.run_hook_stage(HookStage {
                        position: next,
                        ..stage
                    })?;
                }
                Ok(result) => self
                    .runtime
                    .outbox
                    .push(OutgoingMessage::success(stage.request_id, result)),
                Err(rpc_error) => self
                    .runtime
                    .outbox
                    .push(OutgoingMessage::error(stage.request_id, rpc_error)),
            }
        }
        Ok(())
    }
}

fn is_continue(result: &Value) -> bool {
    result.get("result").and_then(Value::as_str) == Some("continue")
}

#[cfg(test)]
mod tests;
