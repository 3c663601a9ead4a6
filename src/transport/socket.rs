use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use hyperlocal::{UnixConnector, Uri as UnixUri};
use serde_json::Value;
use tracing::debug;

use super::{
    ensure_success, summarize_error_body, ByteStream, CallError, HostRequest, Transport,
    JSON_CONTENT_TYPE,
};
use crate::config::HostConfig;
use crate::rpc::{text_list_from_value, Reply, ResultKind, RpcCall};

/// Envelope field holding a call's result.
pub const DATA_FIELD: &str = "data";

/// JSON-over-Unix-socket transport.
///
/// Mutations succeed whenever the exchange does; the body is not inspected.
/// `connect_timeout` bounds how long `open` waits for the stream's response
/// head; one-shot calls are bounded by their request deadline instead.
#[derive(Clone, Debug)]
pub struct SocketTransport {
    config: HostConfig,
    socket_path: PathBuf,
    http: Client<UnixConnector, Full<Bytes>>,
}

impl SocketTransport {
    pub fn new(socket_path: impl Into<PathBuf>, config: HostConfig) -> Self {
        let http = Client::builder(TokioExecutor::new()).build(UnixConnector);
        Self {
            config,
            socket_path: socket_path.into(),
            http,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn build(&self, request: &HostRequest) -> Result<Request<Full<Bytes>>, CallError> {
        let uri: hyper::Uri = UnixUri::new(&self.socket_path, &request.path).into();
        let mut builder = Request::builder().method(Method::POST).uri(uri);
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(accept) = request.accept {
            builder = builder.header(ACCEPT, accept);
        }
        builder
            .body(Full::new(request.body.clone()))
            .map_err(|err| CallError::InvalidRequest(err.to_string()))
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn encode(&self, call: &RpcCall) -> Result<HostRequest, CallError> {
        encode_json(&self.config, call)
    }

    fn decode(&self, kind: ResultKind, body: &[u8]) -> Result<Reply, CallError> {
        decode_envelope(kind, body)
    }

    async fn send(&self, request: HostRequest) -> Result<Bytes, CallError> {
        let http_request = self.build(&request)?;
        let exchange = async {
            let response = self
                .http
                .request(http_request)
                .await
                .map_err(CallError::Socket)?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(CallError::Body)?
                .to_bytes();
            ensure_success(status, &body)?;
            Ok(body)
        };

        match request.timeout {
            Some(deadline) => tokio::time::timeout(deadline, exchange)
                .await
                .map_err(|_| CallError::Timeout(deadline))?,
            None => exchange.await,
        }
    }

    async fn open(&self, request: HostRequest) -> Result<ByteStream, CallError> {
        let http_request = self.build(&request)?;
        let connect_timeout = self.config.connect_timeout;
        let response = tokio::time::timeout(connect_timeout, self.http.request(http_request))
            .await
            .map_err(|_| CallError::Timeout(connect_timeout))?
            .map_err(CallError::Socket)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(CallError::Body)?
                .to_bytes();
            return Err(CallError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        debug!(event = "socket_stream_opened", path = %request.path);
        let chunks = BodyStream::new(response.into_body()).filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(err) => Some(Err(std::io::Error::other(err))),
            }
        });
        Ok(chunks.boxed())
    }
}

/// Encodes a call as a JSON object body posted to `<prefix>/<method>`.
pub(crate) fn encode_json(config: &HostConfig, call: &RpcCall) -> Result<HostRequest, CallError> {
    let body = serde_json::to_vec(call.params()).map_err(|err| CallError::Encode(err.to_string()))?;
    Ok(HostRequest {
        path: config.method_path(call.method()),
        body: Bytes::from(body),
        content_type: Some(JSON_CONTENT_TYPE),
        accept: None,
        timeout: Some(config.deadline_for(call.timeout())),
    })
}

/// Reads the `data` field of a reply envelope as `kind`.
pub(crate) fn decode_envelope(kind: ResultKind, body: &[u8]) -> Result<Reply, CallError> {
    if kind == ResultKind::Ack {
        return Ok(Reply::Ack);
    }

    let envelope: Value =
        serde_json::from_slice(body).map_err(|err| CallError::Envelope(err.to_string()))?;
    let data = envelope
        .get(DATA_FIELD)
        .ok_or(CallError::MissingField(DATA_FIELD))?;

    match kind {
        ResultKind::Text => data
            .as_str()
            .map(|text| Reply::Text(text.to_string()))
            .ok_or_else(|| CallError::Decode(format!("expected a string, found {data}"))),
        ResultKind::Flag => data
            .as_bool()
            .map(Reply::Flag)
            .ok_or_else(|| CallError::Decode(format!("expected a boolean, found {data}"))),
        ResultKind::TextList => text_list_from_value(data).map(Reply::TextList),
        ResultKind::Ack => Ok(Reply::Ack),
    }
}
