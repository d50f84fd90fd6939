//! Plugin-side JSON-RPC dispatch and continuation engine.
//!
//! A plugin is a child process that talks JSON-RPC 2.0 with its host over
//! standard I/O. The host calls the plugin's commands, runs its hook
//! implementations in a negotiated order and delivers notifications; the
//! plugin may call back into the host while it works out an answer. This
//! crate owns that conversation so plugin code only supplies handlers.
//!
//! # Architecture
//!
//! Registration happens once, up front. A [`PluginBuilder`] collects
//! [`CommandSpec`]s, [`HookRegistration`]s, notification subscriptions and
//! [`PluginOption`]s, validates them (duplicate names, reserved methods,
//! ordering cycles among hooks) and freezes them into a [`Plugin`].
//!
//! Every inbound request, hook stage and notification delivery becomes a
//! [`Command`]. A handler either finishes it on the spot through the
//! [`PluginContext`] or sends an [`OutRequest`] to the host and returns
//! `Pending`; the continuation attached to the request runs when the reply
//! arrives and may finish the command or nest another call. Each request
//! from the host receives exactly one reply.
//!
//! Everything runs on one thread. Replies to outbound requests are paired by
//! correlation id, so the host may answer them in any order.
//!
//! # Example
//!
//! ```rust,no_run
//! use plugwire::{Command, CommandSpec, HandlerResult, OutRequest, PluginBuilder, PluginContext};
//! use serde_json::{Value, json};
//!
//! fn whoami(ctx: &mut PluginContext<'_, ()>, cmd: &Command, _params: &Value) -> HandlerResult {
//!     let request = OutRequest::<()>::new("getinfo", json!({}))
//!         .on_success(|ctx, cmd, info| ctx.success(cmd, json!({ "id": info["id"] })));
//!     ctx.send_request(cmd, request)
//! }
//!
//! let mut plugin = PluginBuilder::new("whoami", ())
//!     .command(CommandSpec::new("whoami", whoami).description("Report the node id."))
//!     .build()
//!     .expect("valid registration tables");
//! let outcome = plugin
//!     .run(std::io::stdin().lock(), std::io::stdout().lock())
//!     .expect("host conversation");
//! std::process::exit(outcome.exit_code());
//! ```

pub mod datastore;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod notifications;
pub mod options;
pub mod outreq;
pub mod plugin;
pub mod protocol;
pub mod registry;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use self::datastore::{
    DatastoreKey, DatastoreMode, get_binary, get_string, set_binary, set_string,
};
pub use self::error::EngineError;
pub use self::hooks::HookRegistration;
pub use self::lifecycle::{Command, CommandKey, CommandResult, Disposition};
pub use self::notifications::WILDCARD_TOPIC;
pub use self::options::{OptionKind, OptionValue, OptionValues, PluginOption};
pub use self::outreq::{Continuation, OutRequest, ReplyContinuation, forward_error, forward_result};
pub use self::plugin::{
    Handler, HandlerResult, LogLevel, Plugin, PluginBuilder, PluginContext, RunOutcome,
};
pub use self::protocol::{JsonlWriter, Message, MessageDecoder, MessageSink, OutgoingMessage, RpcError};
pub use self::registry::CommandSpec;
