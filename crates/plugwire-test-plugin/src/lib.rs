//! Reference plugin for the plugwire engine.
//!
//! The plugin registers itself as `test_libplugin` and touches every part of
//! the engine a real plugin would: a command that chains two datastore
//! lookups, a command that calls back into the host, a deprecated command,
//! a `peer_connected` hook with ordering constraints, `connect` and
//! `shutdown` subscriptions, and options negotiated through `init`.
//!
//! Host integration suites drive the binary over standard I/O.

#[cfg(test)]
mod tests;

use std::io;
use std::sync::Arc;

use data_encoding::HEXLOWER;
use ortho_config::{OrthoConfig, OrthoError};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use plugwire::telemetry::{self, TelemetryError};
use plugwire::{
    Command, CommandSpec, DatastoreKey, EngineError, HandlerResult, HookRegistration, LogLevel,
    OptionKind, OutRequest, Plugin, PluginBuilder, PluginContext, PluginOption, RunOutcome,
    get_binary, get_string,
};
use plugwire_config::Config;

/// Name the plugin registers under.
pub const PLUGIN_NAME: &str = "test_libplugin";

const NAME_KEY: &str = "test_libplugin/name";
const NOT_FOUND: &str = "NOT FOUND";
const DEFAULT_GREETING: &str = "hello";

/// State owned by one plugin instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestPluginState {
    dont_shutdown: bool,
}

impl TestPluginState {
    /// Creates the state; `dont_shutdown` keeps the plugin alive when the
    /// host announces shutdown.
    #[must_use]
    pub const fn new(dont_shutdown: bool) -> Self {
        Self { dont_shutdown }
    }

    /// Returns whether shutdown notifications are ignored.
    #[must_use]
    pub const fn dont_shutdown(&self) -> bool {
        self.dont_shutdown
    }
}

/// Failures that stop the plugin binary before or while serving the host.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The engine rejected the plugin or the host conversation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Returns the builder with every registration of the plugin.
#[must_use]
pub fn builder(state: TestPluginState) -> PluginBuilder<TestPluginState> {
    PluginBuilder::new(PLUGIN_NAME, state)
        .command(
            CommandSpec::new("helloworld", helloworld)
                .category("utils")
                .description("Say hello to the world.")
                .long_description(
                    "Returns 'hello world' by default, 'hello {name}' if the name \
                     parameter was passed",
                )
                .usage("[name]"),
        )
        .command(
            CommandSpec::new("testrpc", testrpc)
                .category("utils")
                .description("Makes a simple getinfo call, to test rpc socket."),
        )
        .command(
            CommandSpec::new("testrpc-deprecated", testrpc)
                .category("utils")
                .description("Makes a simple getinfo call, to test rpc socket.")
                .deprecated(),
        )
        .hook(
            HookRegistration::new("peer_connected", peer_connected)
                .before(["dummy"])
                .after(["dummy"]),
        )
        .subscribe("connect", connected)
        .subscribe("shutdown", shutdown)
        .option(PluginOption::new(
            "somearg",
            OptionKind::String,
            "Argument to print at init.",
        ))
        .option(
            PluginOption::new("somearg-deprecated", OptionKind::String, "Deprecated arg for init.")
                .deprecated(),
        )
        .option(PluginOption::new("selfdisable", OptionKind::Flag, "Whether to disable."))
        .option(PluginOption::new(
            "dont_shutdown",
            OptionKind::Flag,
            "Whether to timeout when asked to shutdown.",
        ))
        .on_init(init)
}

/// Builds the plugin with the process configuration applied.
///
/// # Errors
///
/// Returns the engine's validation error if the registration tables are
/// rejected.
pub fn plugin(state: TestPluginState, config: &Config) -> Result<Plugin<TestPluginState>, EngineError> {
    builder(state).with_config(config).build()
}

/// Loads configuration, installs telemetry and serves the host on standard
/// I/O until it hangs up or the plugin exits.
///
/// # Errors
///
/// Returns [`ServeError`] when configuration, telemetry or the host
/// conversation fails.
pub fn serve(state: TestPluginState) -> Result<RunOutcome, ServeError> {
    let config = Config::load().map_err(|source| ServeError::Configuration { source })?;
    let _telemetry =
        telemetry::initialise(&config).map_err(|source| ServeError::Telemetry { source })?;
    info!(
        plugin = PLUGIN_NAME,
        log_filter = config.log_filter(),
        max_message_bytes = config.max_message_bytes(),
        "starting plugin"
    );

    let mut instance = plugin(state, &config)?;
    let outcome = instance.run(io::stdin().lock(), io::stdout().lock())?;
    Ok(outcome)
}

fn name_key() -> Result<DatastoreKey, EngineError> {
    DatastoreKey::parse(NAME_KEY)
}

/// Renders a JSON scalar the way the host printed it, without quotes.
fn plain(value: &Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_owned)
}

fn init(ctx: &mut PluginContext<'_, TestPluginState>, cmd: &Command, _params: &Value) -> HandlerResult {
    ctx.log(LogLevel::Debug, "test_libplugin initialised!");
    let somearg = ctx
        .options()
        .string("somearg")
        .or_else(|| ctx.options().string("somearg-deprecated"))
        .map(str::to_owned);
    if let Some(value) = somearg {
        ctx.log(LogLevel::Debug, format!("somearg = {value}"));
    }
    if ctx.options().flag("dont_shutdown") {
        ctx.state_mut().dont_shutdown = true;
    }
    if ctx.options().flag("selfdisable") {
        return ctx.disable(cmd, "Disabled via selfdisable option");
    }

    let key = name_key()?;
    get_string(ctx, cmd, &key, |ctx, cmd, name| {
        let shown = name.unwrap_or_else(|| NOT_FOUND.to_owned());
        ctx.log(LogLevel::Info, format!("String name from datastore: {shown}"));
        finish_init(ctx, cmd)
    })?;
    get_binary(ctx, cmd, &key, |ctx, cmd, name| {
        let shown = name.map_or_else(|| NOT_FOUND.to_owned(), |bytes| HEXLOWER.encode(&bytes));
        ctx.log(LogLevel::Info, format!("Hex name from datastore: {shown}"));
        finish_init(ctx, cmd)
    })
}

/// Completes `init` once both datastore reads have reported.
fn finish_init(ctx: &mut PluginContext<'_, TestPluginState>, cmd: &Command) -> HandlerResult {
    if ctx.outstanding(cmd) > 0 {
        ctx.pending(cmd)
    } else {
        ctx.init_complete(cmd)
    }
}

fn helloworld(
    ctx: &mut PluginContext<'_, TestPluginState>,
    cmd: &Command,
    params: &Value,
) -> HandlerResult {
    let name = match params.get("name").or_else(|| params.get(0)) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(_) => return ctx.param_failed(cmd, "name: should be a string"),
    };
    ctx.notify_message(cmd, LogLevel::Info, "Notification from json_helloworld");

    match name {
        Some(text) => ctx.success(cmd, json!({ "hello": text })),
        None => {
            let binary_key = name_key()?;
            let string_key = binary_key.clone();
            get_binary(ctx, cmd, &binary_key, move |ctx, cmd, stored| {
                let shown =
                    stored.map_or_else(|| NOT_FOUND.to_owned(), |bytes| HEXLOWER.encode(&bytes));
                ctx.log(LogLevel::Info, format!("get_ds_bin_done: {shown}"));
                get_string(ctx, cmd, &string_key, |ctx, cmd, stored_name| {
                    let greeting = stored_name.unwrap_or_else(|| DEFAULT_GREETING.to_owned());
                    ctx.success(cmd, json!({ "hello": greeting }))
                })
            })
        }
    }
}

fn testrpc(ctx: &mut PluginContext<'_, TestPluginState>, cmd: &Command, params: &Value) -> HandlerResult {
    let empty = match params {
        Value::Null => true,
        Value::Object(members) => members.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if !empty {
        return ctx.param_failed(cmd, "testrpc takes no parameters");
    }
    let request = OutRequest::new("getinfo", json!({})).on_both(echo_members);
    ctx.send_request(cmd, request)
}

/// Replies with the members of whatever `getinfo` returned.
fn echo_members(
    ctx: &mut PluginContext<'_, TestPluginState>,
    cmd: &Command,
    reply: &Value,
) -> HandlerResult {
    let members = reply.as_object().cloned().unwrap_or_default();
    ctx.success(cmd, Value::Object(members))
}

fn peer_connected(
    ctx: &mut PluginContext<'_, TestPluginState>,
    cmd: &Command,
    params: &Value,
) -> HandlerResult {
    let Some(id) = params.pointer("/peer/id") else {
        return ctx.param_failed(cmd, "peer_connected needs peer.id");
    };
    let line = format!("{} peer_connected", plain(id));
    ctx.log(LogLevel::Info, line);
    ctx.hook_continue(cmd)
}

fn connected(
    ctx: &mut PluginContext<'_, TestPluginState>,
    cmd: &Command,
    params: &Value,
) -> HandlerResult {
    match params.get("id").or_else(|| params.pointer("/connect/id")) {
        Some(id) => {
            let line = format!("{} connected", plain(id));
            ctx.log(LogLevel::Info, line);
        }
        None => ctx.log(LogLevel::Unusual, "connect notification without a peer id"),
    }
    ctx.notification_handled(cmd)
}

fn shutdown(ctx: &mut PluginContext<'_, TestPluginState>, cmd: &Command, _params: &Value) -> HandlerResult {
    ctx.log(LogLevel::Debug, "shutdown called");
    if ctx.state().dont_shutdown() {
        ctx.notification_handled(cmd)
    } else {
        ctx.exit(cmd, 0)
    }
}
