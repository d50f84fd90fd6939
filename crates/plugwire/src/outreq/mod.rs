//! Outbound requests and the continuations that consume their replies.
//!
//! A handler that needs something from the host builds an [`OutRequest`],
//! attaches the code that should run when the reply arrives, and hands it to
//! [`PluginContext::send_request`](crate::PluginContext::send_request). The
//! engine assigns a fresh numeric correlation id and parks the continuations
//! in a correlation table until the host answers. Replies are paired by id
//! only, so they may arrive in any order.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::lifecycle::Command;
use crate::plugin::{HandlerResult, PluginContext};
use crate::protocol::RpcError;

/// Tracing target for outbound request bookkeeping.
pub(crate) const OUTREQ_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::outreq");

/// Continuation run with the reply payload or the error object as JSON.
pub type Continuation<S> =
    Box<dyn FnOnce(&mut PluginContext<'_, S>, &Command, &Value) -> HandlerResult>;

/// Continuation run with either outcome, still able to tell them apart.
pub type ReplyContinuation<S> =
    Box<dyn FnOnce(&mut PluginContext<'_, S>, &Command, Result<&Value, &RpcError>) -> HandlerResult>;

enum Continuations<S> {
    Split {
        on_success: Continuation<S>,
        on_failure: Continuation<S>,
    },
    Both(Continuation<S>),
    Reply(ReplyContinuation<S>),
}

/// A request the plugin sends to the host on behalf of a command.
///
/// Without explicit continuations the reply is forwarded: a result becomes
/// the command's success payload and an error becomes its error reply.
///
/// # Example
///
/// ```
/// use plugwire::{Command, HandlerResult, OutRequest, PluginContext};
/// use serde_json::{Value, json};
///
/// fn testrpc(ctx: &mut PluginContext<'_, ()>, cmd: &Command, _params: &Value) -> HandlerResult {
///     let request = OutRequest::<()>::new("getinfo", json!({}))
///         .on_both(|ctx, cmd, reply| ctx.success(cmd, reply.clone()));
///     ctx.send_request(cmd, request)
/// }
/// ```
pub struct OutRequest<S> {
    method: String,
    params: Value,
    continuations: Continuations<S>,
}

impl<S> fmt::Debug for OutRequest<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutRequest")
            .field("method", &self.method)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<S: 'static> OutRequest<S> {
    /// Starts a request for `method` that forwards its reply.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            continuations: Continuations::Split {
                on_success: Box::new(forward_result::<S>),
                on_failure: Box::new(forward_error::<S>),
            },
        }
    }

    /// Runs `continuation` with the result when the host succeeds.
    #[must_use]
    pub fn on_success<F>(self, continuation: F) -> Self
    where
        F: FnOnce(&mut PluginContext<'_, S>, &Command, &Value) -> HandlerResult + 'static,
    {
        let on_failure: Continuation<S> = match self.continuations {
            Continuations::Split { on_failure, .. } => on_failure,
            Continuations::Both(_) | Continuations::Reply(_) => Box::new(forward_error::<S>),
        };
        Self {
            method: self.method,
            params: self.params,
            continuations: Continuations::Split {
                on_success: Box::new(continuation),
                on_failure,
            },
        }
    }

    /// Runs `continuation` with the error object when the host fails.
    #[must_use]
    pub fn on_failure<F>(self, continuation: F) -> Self
    where
        F: FnOnce(&mut PluginContext<'_, S>, &Command, &Value) -> HandlerResult + 'static,
    {
        let on_success: Continuation<S> = match self.continuations {
            Continuations::Split { on_success, .. } => on_success,
            Continuations::Both(_) | Continuations::Reply(_) => Box::new(forward_result::<S>),
        };
        Self {
            method: self.method,
            params: self.params,
            continuations: Continuations::Split {
                on_success,
                on_failure: Box::new(continuation),
            },
        }
    }

    /// Runs `continuation` for either outcome.
    ///
    /// A failure is presented as the JSON error object.
    #[must_use]
    pub fn on_both<F>(self, continuation: F) -> Self
    where
        F: FnOnce(&mut PluginContext<'_, S>, &Command, &Value) -> HandlerResult + 'static,
    {
        Self {
            continuations: Continuations::Both(Box::new(continuation)),
            ..self
        }
    }

    /// Runs `continuation` with the typed outcome of the call.
    #[must_use]
    pub fn on_reply<F>(self, continuation: F) -> Self
    where
        F: FnOnce(&mut PluginContext<'_, S>, &Command, Result<&Value, &RpcError>) -> HandlerResult
            + 'static,
    {
        Self {
            continuations: Continuations::Reply(Box::new(continuation)),
            ..self
        }
    }
}

impl<S> OutRequest<S> {
    /// Returns the method the request calls.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the request parameters.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }
}

/// Continuation that finishes the command with the reply payload.
///
/// # Errors
///
/// Returns [`EngineError::AlreadyTerminal`](crate::EngineError::AlreadyTerminal)
/// when the command has already finished.
pub fn forward_result<S>(
    ctx: &mut PluginContext<'_, S>,
    cmd: &Command,
    result: &Value,
) -> HandlerResult {
    ctx.success(cmd, result.clone())
}

/// Continuation that finishes the command with the host's error.
///
/// Error objects that do not carry a numeric code and message are reported
/// as internal errors.
///
/// # Errors
///
/// Returns [`EngineError::AlreadyTerminal`](crate::EngineError::AlreadyTerminal)
/// when the command has already finished.
pub fn forward_error<S>(
    ctx: &mut PluginContext<'_, S>,
    cmd: &Command,
    error: &Value,
) -> HandlerResult {
    let rpc_error = serde_json::from_value::<RpcError>(error.clone())
        .unwrap_or_else(|_| RpcError::internal_error(error.to_string()));
    ctx.fail(cmd, rpc_error)
}

/// A request waiting for its reply.
pub(crate) struct PendingRequest<S> {
    pub(crate) owner: Command,
    pub(crate) method: String,
    continuations: Continuations<S>,
}

impl<S> PendingRequest<S> {
    /// Runs the continuation that matches the reply.
    pub(crate) fn resolve(
        self,
        ctx: &mut PluginContext<'_, S>,
        outcome: Result<&Value, &RpcError>,
    ) -> HandlerResult {
        let owner = self.owner;
        match (self.continuations, outcome) {
            (Continuations::Split { on_success, .. }, Ok(result)) => on_success(ctx, &owner, result),
            (Continuations::Split { on_failure, .. }, Err(error)) => {
                on_failure(ctx, &owner, &error.to_value())
            }
            (Continuations::Both(continuation), Ok(result)) => continuation(ctx, &owner, result),
            (Continuations::Both(continuation), Err(error)) => {
                continuation(ctx, &owner, &error.to_value())
            }
            (Continuations::Reply(continuation), reply) => continuation(ctx, &owner, reply),
        }
    }
}

/// Correlation table for outbound requests.
pub(crate) struct OutRequestTable<S> {
    next_id: u64,
    pending: HashMap<u64, PendingRequest<S>>,
}

impl<S> Default for OutRequestTable<S> {
    fn default() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }
}

impl<S> OutRequestTable<S> {
    /// Parks a request and returns its correlation id with the wire fields.
    pub(crate) fn register(&mut self, owner: Command, request: OutRequest<S>) -> (u64, String, Value) {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let OutRequest {
            method,
            params,
            continuations,
        } = request;
        self.pending.insert(
            id,
            PendingRequest {
                owner,
                method: method.clone(),
                continuations,
            },
        );
        (id, method, params)
    }

    /// Removes the request a reply belongs to.
    ///
    /// Ids this table never issued, including non-numeric ones, yield `None`.
    pub(crate) fn take(&mut self, id: &Value) -> Option<PendingRequest<S>> {
        id.as_u64().and_then(|key| self.pending.remove(&key))
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}
