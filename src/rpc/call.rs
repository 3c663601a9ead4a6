//! Call descriptions and typed replies.
//!
//! An [`RpcCall`] is a transport-independent description of one host
//! exchange. The active [`Transport`](crate::transport::Transport) turns it into
//! a request and turns the response body back into a [`Reply`].

use std::time::Duration;

use serde_json::{Map, Value};

use crate::transport::CallError;

/// Parameter every sender-scoped call carries.
pub const SENDER_PARAM: &str = "senderid";

/// How the response of a call is decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResultKind {
    /// A single string value.
    Text,
    /// A single boolean value.
    Flag,
    /// A list of strings (message ids, bucket keys).
    TextList,
    /// No payload; success is judged by the transport.
    Ack,
}

/// Timeout class of a call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallTimeout {
    /// The configured request timeout.
    Default,
    /// A host-side wait of the given logical duration.
    Blocking(Duration),
}

/// One host call: method, parameters, timeout class and decode rule.
#[derive(Clone, Debug)]
pub struct RpcCall {
    method: &'static str,
    params: Map<String, Value>,
    timeout: CallTimeout,
    kind: ResultKind,
}

impl RpcCall {
    pub fn new(method: &'static str, kind: ResultKind) -> Self {
        Self {
            method,
            params: Map::new(),
            timeout: CallTimeout::Default,
            kind,
        }
    }

    /// Adds a parameter. Later values replace earlier ones with the same key.
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Marks the call as blocking for `timeout_ms` on the host side.
    ///
    /// The timeout is also sent to the host as the integer `timeout` parameter.
    pub fn blocking(mut self, timeout_ms: u64) -> Self {
        self.timeout = CallTimeout::Blocking(Duration::from_millis(timeout_ms));
        self.param("timeout", timeout_ms)
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn timeout(&self) -> CallTimeout {
        self.timeout
    }

    pub fn kind(&self) -> ResultKind {
        self.kind
    }
}

/// Decoded result of a call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Text(String),
    Flag(bool),
    TextList(Vec<String>),
    Ack,
}

impl Reply {
    /// The string payload, or `""` for any other reply shape.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            _ => String::new(),
        }
    }

    /// The boolean payload, or `false` for any other reply shape.
    pub fn into_flag(self) -> bool {
        matches!(self, Self::Flag(true))
    }

    /// The list payload, or an empty list for any other reply shape.
    pub fn into_text_list(self) -> Vec<String> {
        match self {
            Self::TextList(items) => items,
            _ => Vec::new(),
        }
    }
}

/// Reads a string list that the host sends either as a JSON array or as a
/// string holding a JSON array. `null` reads as an empty list.
pub(crate) fn text_list_from_value(value: &Value) -> Result<Vec<String>, CallError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(list_item).collect(),
        Value::String(raw) if raw.trim().is_empty() => Ok(Vec::new()),
        Value::String(raw) => {
            let nested: Value = serde_json::from_str(raw)
                .map_err(|err| CallError::Decode(format!("string list: {err}")))?;
            match nested {
                Value::Array(_) | Value::Null => text_list_from_value(&nested),
                other => Err(CallError::Decode(format!(
                    "expected a list, found {other}"
                ))),
            }
        }
        other => Err(CallError::Decode(format!("expected a list, found {other}"))),
    }
}

fn list_item(value: &Value) -> Result<String, CallError> {
    match value {
        Value::String(item) => Ok(item.clone()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(CallError::Decode(format!(
            "expected a string list item, found {other}"
        ))),
    }
}
