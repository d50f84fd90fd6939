//! JSON-RPC message codec for the host transport.
//!
//! The host and the plugin exchange JSON-RPC 2.0 objects over a byte stream.
//! Inbound, the [`MessageDecoder`] buffers bytes until a complete JSON value is
//! available and classifies it as a request, a notification or a reply to one
//! of the plugin's own outbound requests. Outbound, every message is an
//! [`OutgoingMessage`] written as one newline-terminated line by a
//! [`MessageSink`].

mod decoder;
mod writer;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use self::decoder::{DEFAULT_MAX_MESSAGE_BYTES, MessageDecoder};
pub use self::writer::{JsonlWriter, MessageSink};

#[cfg(test)]
pub use self::writer::MockMessageSink;

/// JSON-RPC protocol version stamped on every outgoing message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error inside the plugin.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Error object carried by a JSON-RPC error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Creates an error with the given code and message.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured detail to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Reply for a request naming a method the plugin does not serve.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Unknown command '{method}'"),
        )
    }

    /// Reply for a request whose parameters failed validation.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    /// Reply for a failure inside the plugin.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    /// Returns the error as a JSON object, as failure continuations see it.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("code".into(), Value::from(self.code));
        object.insert("message".into(), Value::from(self.message.clone()));
        if let Some(data) = &self.data {
            object.insert("data".into(), data.clone());
        }
        Value::Object(object)
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call from the host that expects exactly one reply.
    Request {
        /// Opaque request id, echoed verbatim in the reply.
        id: Value,
        /// Method name.
        method: String,
        /// Parameters (an empty object when omitted).
        params: Value,
    },
    /// A call from the host that must never be answered.
    Notification {
        /// Topic name.
        method: String,
        /// Parameters (an empty object when omitted).
        params: Value,
    },
    /// The host's reply to one of the plugin's outbound requests.
    ///
    /// A reply whose envelope is unusable arrives as an error outcome, so
    /// the waiting continuation still runs.
    Response {
        /// Correlation id assigned when the request was issued.
        id: Value,
        /// `Ok(result)` or `Err(error)`.
        outcome: Result<Value, RpcError>,
    },
    /// A request whose envelope is unusable. It is answered with `error`.
    Invalid {
        /// Request id, echoed verbatim in the error reply.
        id: Value,
        /// Invalid-request or invalid-params error describing the problem.
        error: RpcError,
    },
}

impl Message {
    /// Classifies a decoded JSON value.
    ///
    /// Returns the reason as an error only when the value carries no usable
    /// `id`; such values cannot be answered and are skipped by the decoder.
    pub(crate) fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut object) = value else {
            return Err("message is not a JSON object".into());
        };

        let id = object.remove("id").filter(|id| !id.is_null());
        match (object.remove("method"), id) {
            (Some(Value::String(method)), id) => {
                let params = match object.remove("params") {
                    None | Some(Value::Null) => Value::Object(Map::new()),
                    Some(params @ (Value::Object(_) | Value::Array(_))) => params,
                    Some(_) => {
                        let reason = format!("params for '{method}' must be an object or array");
                        return id
                            .map(|id| Self::Invalid {
                                id,
                                error: RpcError::invalid_params(reason.clone()),
                            })
                            .ok_or(reason);
                    }
                };
                Ok(match id {
                    Some(id) => Self::Request { id, method, params },
                    None => Self::Notification { method, params },
                })
            }
            (Some(_), Some(id)) => Ok(Self::Invalid {
                id,
                error: RpcError::new(codes::INVALID_REQUEST, "method must be a string"),
            }),
            (Some(_), None) => Err("method must be a string".into()),
            (None, Some(id)) => Ok(Self::response_from(id, object)),
            (None, None) => Err("message has neither method nor id".into()),
        }
    }

    fn response_from(id: Value, mut object: Map<String, Value>) -> Self {
        let outcome = match (object.remove("error"), object.remove("result")) {
            (Some(raw), _) => Err(serde_json::from_value::<RpcError>(raw.clone())
                .unwrap_or_else(|_| {
                    RpcError::internal_error(format!("malformed error object: {raw}"))
                })),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(RpcError::new(
                codes::INVALID_REQUEST,
                "reply carries neither result nor error",
            )),
        };
        Self::Response { id, outcome }
    }
}

/// A message the plugin sends to the host.
///
/// Serialised as a single JSON-RPC 2.0 object; the variant determines which
/// members are present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    /// Successful terminal reply to a host request.
    Success {
        /// Protocol version.
        jsonrpc: &'static str,
        /// Id of the request being answered.
        id: Value,
        /// Result payload.
        result: Value,
    },
    /// Error terminal reply to a host request.
    Error {
        /// Protocol version.
        jsonrpc: &'static str,
        /// Id of the request being answered.
        id: Value,
        /// Error payload.
        error: RpcError,
    },
    /// Request issued by the plugin.
    Request {
        /// Protocol version.
        jsonrpc: &'static str,
        /// Correlation id used to pair the eventual reply.
        id: u64,
        /// Method to call on the host.
        method: String,
        /// Call parameters.
        params: Value,
    },
    /// Notification emitted by the plugin.
    Notification {
        /// Protocol version.
        jsonrpc: &'static str,
        /// Topic name.
        method: String,
        /// Notification payload.
        params: Value,
    },
}

impl OutgoingMessage {
    /// Builds a success reply.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self::Success {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }

    /// Builds an error reply.
    #[must_use]
    pub const fn error(id: Value, error: RpcError) -> Self {
        Self::Error {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// Builds an outbound request.
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Builds an outbound notification.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    /// Returns `true` for terminal replies to host requests.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Error { .. })
    }

    /// Returns the id of a terminal reply.
    #[must_use]
    pub const fn reply_id(&self) -> Option<&Value> {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => Some(id),
            Self::Request { .. } | Self::Notification { .. } => None,
        }
    }

    /// Returns the method of an outbound request or notification.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => {
                Some(method.as_str())
            }
            Self::Success { .. } | Self::Error { .. } => None,
        }
    }
}
