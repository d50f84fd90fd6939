//! Mutable engine state shared by handlers through [`PluginContext`].

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::context::{HandlerResult, PluginContext};
use crate::error::EngineError;
use crate::lifecycle::{
    Command, CommandResult, CommandTable, Disposition, HookStage, LIFECYCLE_TARGET, Origin,
    Outcome,
};
use crate::options::OptionValues;
use crate::outreq::{OUTREQ_TARGET, OutRequest, OutRequestTable, PendingRequest};
use crate::protocol::{OutgoingMessage, RpcError};

/// A hook stage that reached its terminal outcome.
#[derive(Debug)]
pub(crate) struct StageOutcome {
    pub(crate) stage: HookStage,
    pub(crate) outcome: Result<Value, RpcError>,
}

/// Engine state that handlers may touch.
pub(crate) struct Runtime<S> {
    pub(crate) plugin_name: Arc<str>,
    pub(crate) commands: CommandTable,
    pub(crate) outreqs: OutRequestTable<S>,
    pub(crate) outbox: Vec<OutgoingMessage>,
    pub(crate) stage_outcomes: VecDeque<StageOutcome>,
    pub(crate) exit: Option<i32>,
    pub(crate) options: OptionValues,
    pub(crate) configuration: Value,
    pub(crate) allow_deprecated: bool,
}

impl<S> Runtime<S> {
    pub(crate) fn new(plugin_name: &str) -> Self {
        Self {
            plugin_name: Arc::from(plugin_name),
            commands: CommandTable::default(),
            outreqs: OutRequestTable::default(),
            outbox: Vec::new(),
            stage_outcomes: VecDeque::new(),
            exit: None,
            options: OptionValues::default(),
            configuration: Value::Object(Map::new()),
            allow_deprecated: true,
        }
    }

    pub(crate) fn origin_of(&self, cmd: &Command) -> Option<&Origin> {
        self.commands.origin(cmd.key())
    }

    pub(crate) fn request_exit(&mut self, code: i32) {
        if self.exit.is_none() {
            debug!(target: LIFECYCLE_TARGET, code, "exit requested");
            self.exit = Some(code);
        }
    }

    /// Records the terminal outcome of `cmd` and routes it by origin.
    pub(crate) fn finish(&mut self, cmd: &Command, outcome: Outcome) -> HandlerResult {
        let Some(entry) = self.commands.complete(cmd.key()) else {
            return Err(EngineError::AlreadyTerminal {
                method: cmd.method().to_owned(),
            });
        };
        if entry.outstanding > 0 {
            debug!(
                target: LIFECYCLE_TARGET,
                method = cmd.method(),
                outstanding = entry.outstanding,
                "command finished with requests still in flight"
            );
        }

        match (entry.origin, outcome) {
            (Origin::Request { id }, Outcome::Success(result)) => {
                self.outbox.push(OutgoingMessage::success(id, result));
            }
            (Origin::Request { id }, Outcome::Handled) => {
                self.outbox
                    .push(OutgoingMessage::success(id, Value::Object(Map::new())));
            }
            (Origin::Request { id }, Outcome::Failure(rpc_error)) => {
                self.outbox.push(OutgoingMessage::error(id, rpc_error));
            }
            (Origin::Notification, Outcome::Failure(rpc_error)) => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    method = cmd.method(),
                    code = rpc_error.code,
                    message = rpc_error.message.as_str(),
                    "notification handler failed"
                );
            }
            (Origin::Notification, Outcome::Success(_) | Outcome::Handled) => {}
            (Origin::HookStage(stage), Outcome::Success(result)) => {
                self.stage_outcomes.push_back(StageOutcome {
                    stage,
                    outcome: Ok(result),
                });
            }
            (Origin::HookStage(stage), Outcome::Handled) => {
                self.stage_outcomes.push_back(StageOutcome {
                    stage,
                    outcome: Ok(Value::Object(Map::new())),
                });
            }
            (Origin::HookStage(stage), Outcome::Failure(rpc_error)) => {
                self.stage_outcomes.push_back(StageOutcome {
                    stage,
                    outcome: Err(rpc_error),
                });
            }
            (_, Outcome::Abandoned) => {
                debug!(target: LIFECYCLE_TARGET, method = cmd.method(), "command abandoned");
            }
        }
        Ok(CommandResult::finished(cmd.key()))
    }

    /// Sends an outbound request owned by `cmd`.
    pub(crate) fn issue(&mut self, cmd: &Command, request: OutRequest<S>) -> HandlerResult {
        if !self.commands.begin_request(cmd.key()) {
            return Err(EngineError::AlreadyTerminal {
                method: cmd.method().to_owned(),
            });
        }
        let (id, method, params) = self.outreqs.register(cmd.clone(), request);
        debug!(
            target: OUTREQ_TARGET,
            correlation_id = id,
            method = method.as_str(),
            owner = cmd.method(),
            "sending request"
        );
        self.outbox.push(OutgoingMessage::request(id, method, params));
        Ok(CommandResult::pending(cmd.key()))
    }

    /// Claims the request a reply belongs to, if its owner can still use it.
    pub(crate) fn claim_reply(&mut self, id: &Value) -> Option<PendingRequest<S>> {
        let Some(pending) = self.outreqs.take(id) else {
            warn!(target: OUTREQ_TARGET, correlation_id = %id, "reply for unknown request dropped");
            return None;
        };
        if !self.commands.end_request(pending.owner.key()) {
            warn!(
                target: OUTREQ_TARGET,
                correlation_id = %id,
                method = pending.method.as_str(),
                owner = pending.owner.method(),
                "reply for finished command dropped"
            );
            return None;
        }
        Some(pending)
    }

    /// Checks what a handler returned for `cmd` against the command table.
    ///
    /// Fatal errors are returned; a non-fatal error on a live command becomes
    /// an internal-error outcome, and on a finished one it is only logged.
    pub(crate) fn settle(&mut self, cmd: &Command, result: HandlerResult) -> Result<(), EngineError> {
        match result {
            Ok(done) if done.key() != cmd.key() => Err(EngineError::violation(
                cmd.method(),
                format!("returned the result of {} while serving {}", done.key(), cmd.key()),
            )),
            Ok(done) => match (done.disposition(), self.commands.is_live(cmd.key())) {
                (Disposition::Finished, true) => Err(EngineError::violation(
                    cmd.method(),
                    "returned Finished without a terminal response",
                )),
                (Disposition::Pending, false) => Err(EngineError::violation(
                    cmd.method(),
                    "returned Pending for a command that already finished",
                )),
                (Disposition::Finished, false) | (Disposition::Pending, true) => Ok(()),
            },
            Err(failure) if failure.is_fatal() => Err(failure),
            Err(failure) if self.commands.is_live(cmd.key()) => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    method = cmd.method(),
                    error = %failure,
                    "handler failed"
                );
                let rpc_error = match failure {
                    EngineError::Handler { message, .. } => RpcError::internal_error(message),
                    other => RpcError::internal_error(other.to_string()),
                };
                self.finish(cmd, Outcome::Failure(rpc_error)).map(|_| ())
            }
            Err(failure) => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    method = cmd.method(),
                    error = %failure,
                    "handler error for finished command ignored"
                );
                Ok(())
            }
        }
    }

    /// Abandons every live command and forgets outstanding requests.
    pub(crate) fn abandon_all(&mut self, reason: &str) {
        for (key, entry) in self.commands.drain() {
            warn!(
                target: LIFECYCLE_TARGET,
                command = %key,
                method = &*entry.method,
                outstanding = entry.outstanding,
                reason,
                "abandoning pending command"
            );
        }
        self.outreqs.clear();
        self.stage_outcomes.clear();
    }
}

/// Runs `handler` for `cmd` and settles what it returned.
pub(crate) fn invoke<S>(
    state: &mut S,
    runtime: &mut Runtime<S>,
    cmd: &Command,
    call: impl FnOnce(&mut PluginContext<'_, S>, &Command) -> HandlerResult,
) -> Result<(), EngineError> {
    let result = {
        let mut ctx = PluginContext::new(state, runtime);
        call(&mut ctx, cmd)
    };
    runtime.settle(cmd, result)
}
