//! Datastore access through nested requests.
//!
//! The host owns the datastore; a plugin reads it with `listdatastore` and
//! writes it with `datastore`. These helpers wrap both calls so a handler
//! only supplies the key and the continuation that consumes the value.
//! Values travel either as UTF-8 strings or as lowercase hex.

use std::fmt;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::EngineError;
use crate::lifecycle::Command;
use crate::outreq::OutRequest;
use crate::plugin::{HandlerResult, LogLevel, PluginContext};
use crate::protocol::RpcError;

/// Tracing target for datastore helpers.
const DATASTORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::datastore");

/// A slash-separated datastore key such as `test_libplugin/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatastoreKey {
    segments: Vec<String>,
}

impl DatastoreKey {
    /// Parses a slash-separated key path.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] for an empty path or one with
    /// empty segments.
    pub fn parse(path: &str) -> Result<Self, EngineError> {
        let segments: Vec<String> = path.split('/').map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(EngineError::configuration(format!(
                "datastore key '{path}' has an empty segment"
            )));
        }
        Ok(Self { segments })
    }

    /// Returns the key's path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    fn to_json(&self) -> Value {
        Value::from(self.segments.clone())
    }
}

impl fmt::Display for DatastoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// How a write treats an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreMode {
    /// Fail if the key exists.
    MustCreate,
    /// Fail unless the key exists.
    MustReplace,
    /// Write unconditionally.
    CreateOrReplace,
    /// Append to an existing value; fail if there is none.
    MustAppend,
    /// Append to an existing value or create it.
    CreateOrAppend,
}

impl DatastoreMode {
    /// Returns the mode name the host expects.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MustCreate => "must-create",
            Self::MustReplace => "must-replace",
            Self::CreateOrReplace => "create-or-replace",
            Self::MustAppend => "must-append",
            Self::CreateOrAppend => "create-or-append",
        }
    }
}

/// Reads `key` as a string and passes it, or `None`, to `then`.
///
/// A missing key, a value without a string form and a failed call all
/// yield `None`; the failure is also logged to the host.
///
/// # Errors
///
/// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already finished.
pub fn get_string<S, F>(
    ctx: &mut PluginContext<'_, S>,
    cmd: &Command,
    key: &DatastoreKey,
    then: F,
) -> HandlerResult
where
    S: 'static,
    F: FnOnce(&mut PluginContext<'_, S>, &Command, Option<String>) -> HandlerResult + 'static,
{
    let wanted = key.clone();
    let request = list_request(key).on_reply(move |ctx, cmd, outcome| {
        let value = match outcome {
            Ok(reply) => find_entry(reply, &wanted)
                .and_then(|entry| entry.get("string"))
                .and_then(Value::as_str)
                .map(str::to_owned),
            Err(rpc_error) => {
                report_failure(ctx, &wanted, rpc_error);
                None
            }
        };
        debug!(target: DATASTORE_TARGET, key = %wanted, found = value.is_some(), "string read");
        then(ctx, cmd, value)
    });
    ctx.send_request(cmd, request)
}

/// Reads `key` as bytes and passes them, or `None`, to `then`.
///
/// A missing key, a value without a hex form, undecodable hex and a failed
/// call all yield `None`; the failure is also logged to the host.
///
/// # Errors
///
/// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already finished.
pub fn get_binary<S, F>(
    ctx: &mut PluginContext<'_, S>,
    cmd: &Command,
    key: &DatastoreKey,
    then: F,
) -> HandlerResult
where
    S: 'static,
    F: FnOnce(&mut PluginContext<'_, S>, &Command, Option<Vec<u8>>) -> HandlerResult + 'static,
{
    let wanted = key.clone();
    let request = list_request(key).on_reply(move |ctx, cmd, outcome| {
        let value = match outcome {
            Ok(reply) => find_entry(reply, &wanted)
                .and_then(|entry| entry.get("hex"))
                .and_then(Value::as_str)
                .and_then(|hex| HEXLOWER_PERMISSIVE.decode(hex.as_bytes()).ok()),
            Err(rpc_error) => {
                report_failure(ctx, &wanted, rpc_error);
                None
            }
        };
        debug!(target: DATASTORE_TARGET, key = %wanted, found = value.is_some(), "binary read");
        then(ctx, cmd, value)
    });
    ctx.send_request(cmd, request)
}

/// Writes a string value under `key`.
///
/// # Errors
///
/// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already finished.
pub fn set_string<S, F>(
    ctx: &mut PluginContext<'_, S>,
    cmd: &Command,
    key: &DatastoreKey,
    value: &str,
    mode: DatastoreMode,
    then: F,
) -> HandlerResult
where
    S: 'static,
    F: FnOnce(&mut PluginContext<'_, S>, &Command, Result<(), RpcError>) -> HandlerResult + 'static,
{
    store(ctx, cmd, key, ("string", Value::from(value)), mode, then)
}

/// Writes a binary value under `key`, hex-encoded on the wire.
///
/// # Errors
///
/// Returns [`EngineError::AlreadyTerminal`] when `cmd` has already finished.
pub fn set_binary<S, F>(
    ctx: &mut PluginContext<'_, S>,
    cmd: &Command,
    key: &DatastoreKey,
    value: &[u8],
    mode: DatastoreMode,
    then: F,
) -> HandlerResult
where
    S: 'static,
    F: FnOnce(&mut PluginContext<'_, S>, &Command, Result<(), RpcError>) -> HandlerResult + 'static,
{
    store(ctx, cmd, key, ("hex", Value::from(HEXLOWER.encode(value))), mode, then)
}

fn store<S, F>(
    ctx: &mut PluginContext<'_, S>,
    cmd: &Command,
    key: &DatastoreKey,
    (field, value): (&str, Value),
    mode: DatastoreMode,
    then: F,
) -> HandlerResult
where
    S: 'static,
    F: FnOnce(&mut PluginContext<'_, S>, &Command, Result<(), RpcError>) -> HandlerResult + 'static,
{
    let mut params = Map::new();
    params.insert("key".into(), key.to_json());
    params.insert(field.into(), value);
    params.insert("mode".into(), Value::from(mode.as_str()));

    let request = OutRequest::<S>::new("datastore", Value::Object(params))
        .on_reply(move |ctx, cmd, outcome| then(ctx, cmd, outcome.map(|_| ()).map_err(Clone::clone)));
    ctx.send_request(cmd, request)
}

fn list_request<S: 'static>(key: &DatastoreKey) -> OutRequest<S> {
    OutRequest::new("listdatastore", json!({ "key": key.to_json() }))
}

/// Finds the entry whose key matches exactly; `listdatastore` also returns
/// entries below the requested key.
fn find_entry<'a>(reply: &'a Value, key: &DatastoreKey) -> Option<&'a Value> {
    reply
        .get("datastore")
        .and_then(Value::as_array)?
        .iter()
        .find(|entry| {
            entry
                .get("key")
                .and_then(Value::as_array)
                .is_some_and(|segments| {
                    segments.len() == key.segments.len()
                        && segments
                            .iter()
                            .zip(&key.segments)
                            .all(|(wire, wanted)| wire.as_str() == Some(wanted.as_str()))
                })
        })
}

fn report_failure<S>(ctx: &mut PluginContext<'_, S>, key: &DatastoreKey, rpc_error: &RpcError) {
    ctx.log(
        LogLevel::Unusual,
        format!("listdatastore {key} failed: {}", rpc_error.message),
    );
}
