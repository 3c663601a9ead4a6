//! Host transports.
//!
//! The host speaks one of two wire styles, picked once at startup:
//!
//! - `socket`: HTTP over a Unix domain socket, JSON request bodies and a
//!   `{"data": ...}` reply envelope.
//! - `loopback`: HTTP over `127.0.0.1:<port>`, parameters in the query string
//!   and raw-text replies with a literal success token.
//!
//! Both implement [`Transport`], so the RPC client and the event listener are
//! written once against the trait.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{HostConfig, HostEndpoint};
use crate::rpc::{Reply, ResultKind, RpcCall};
use crate::stream::SubscribeTarget;

/// Loopback TCP transport.
pub mod loopback;
/// Unix domain socket transport.
pub mod socket;

pub use loopback::LoopbackTransport;
pub use socket::SocketTransport;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
pub(crate) const JSON_CONTENT_TYPE: &str = "application/json";
pub(crate) const EVENT_STREAM_ACCEPT: &str = "text/event-stream";
/// Host method that opens the inbound event stream.
pub const SUBSCRIBE_METHOD: &str = "msghook";

/// Streamed response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// A fully encoded request, ready for the wire. Always sent as `POST`.
#[derive(Clone, Debug, Default)]
pub struct HostRequest {
    /// Path and optional query string, e.g. `/otto/get?key=a`.
    pub path: String,
    pub body: Bytes,
    pub content_type: Option<&'static str>,
    pub accept: Option<&'static str>,
    /// Overall deadline for the exchange. `None` means no deadline.
    pub timeout: Option<Duration>,
}

/// Wire capability shared by the RPC client and the event listener.
#[async_trait]
pub trait Transport: fmt::Debug + Send + Sync {
    fn config(&self) -> &HostConfig;

    /// Turns a call into a request in this transport's wire style.
    fn encode(&self, call: &RpcCall) -> Result<HostRequest, CallError>;

    /// Reads a typed reply out of a response body.
    fn decode(&self, kind: ResultKind, body: &[u8]) -> Result<Reply, CallError>;

    /// Performs one request/response exchange and returns the response body.
    ///
    /// Non-success HTTP statuses are errors.
    async fn send(&self, request: HostRequest) -> Result<Bytes, CallError>;

    /// Sends a request and hands back its response body as a byte stream.
    ///
    /// Dropping the stream closes the connection.
    async fn open(&self, request: HostRequest) -> Result<ByteStream, CallError>;

    /// Request that opens the event stream for `target`.
    fn subscribe_request(&self, target: &SubscribeTarget) -> Result<HostRequest, CallError> {
        let body = serde_json::to_vec(target).map_err(|err| CallError::Encode(err.to_string()))?;
        Ok(HostRequest {
            path: self.config().method_path(SUBSCRIBE_METHOD),
            body: Bytes::from(body),
            content_type: Some(JSON_CONTENT_TYPE),
            accept: Some(EVENT_STREAM_ACCEPT),
            timeout: None,
        })
    }
}

/// Builds the transport the configuration asks for.
pub fn for_config(config: HostConfig) -> Result<Arc<dyn Transport>, CallError> {
    match config.endpoint.clone() {
        HostEndpoint::Socket(path) => Ok(Arc::new(SocketTransport::new(path, config))),
        HostEndpoint::Loopback { port } => Ok(Arc::new(LoopbackTransport::new(port, config)?)),
    }
}

/// Errors produced while performing or decoding a single host exchange.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),

    #[error("socket request failed: {0}")]
    Socket(hyper_util::client::legacy::Error),

    #[error("reading response body failed: {0}")]
    Body(hyper::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to encode call: {0}")]
    Encode(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("response is not a reply envelope: {0}")]
    Envelope(String),

    #[error("response is missing the {0:?} field")]
    MissingField(&'static str),

    #[error("host did not acknowledge the call: {body}")]
    Rejected { body: String },
}

impl CallError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Request(err) => err.is_timeout(),
            _ => false,
        }
    }
}

pub(crate) fn ensure_success(status: StatusCode, body: &[u8]) -> Result<(), CallError> {
    if status.is_success() {
        return Ok(());
    }
    Err(CallError::HttpStatus {
        status,
        body: summarize_error_body(body),
    })
}

pub(crate) fn summarize_error_body(body: &[u8]) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        msg: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message).or(parsed.msg) {
            return message;
        }
    }

    String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_BODY_SNIPPET_LEN)
        .collect()
}
