use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use super::{ensure_success, summarize_error_body, ByteStream, CallError, HostRequest, Transport};
use crate::config::HostConfig;
use crate::rpc::{text_list_from_value, Reply, ResultKind, RpcCall};

/// Exact body the host answers a successful mutation with.
pub const SUCCESS_TOKEN: &str = "ok";

/// Query-string-over-loopback transport.
#[derive(Clone, Debug)]
pub struct LoopbackTransport {
    config: HostConfig,
    base_url: String,
    http: Client,
}

impl LoopbackTransport {
    pub fn new(port: u16, config: HostConfig) -> Result<Self, CallError> {
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(CallError::Request)?;

        Ok(Self {
            config,
            base_url: format!("http://127.0.0.1:{port}"),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_builder(&self, request: &HostRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(format!("{}{}", self.base_url, request.path))
            .body(request.body.clone());
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(accept) = request.accept {
            builder = builder.header(ACCEPT, accept);
        }
        if let Some(deadline) = request.timeout {
            builder = builder.timeout(deadline);
        }
        builder
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn config(&self) -> &HostConfig {
        &self.config
    }

    fn encode(&self, call: &RpcCall) -> Result<HostRequest, CallError> {
        encode_query(&self.config, call)
    }

    fn decode(&self, kind: ResultKind, body: &[u8]) -> Result<Reply, CallError> {
        decode_raw(kind, body)
    }

    async fn send(&self, request: HostRequest) -> Result<Bytes, CallError> {
        let map_err = |err: reqwest::Error| match request.timeout {
            Some(deadline) if err.is_timeout() => CallError::Timeout(deadline),
            _ => CallError::Request(err),
        };

        let response = self
            .request_builder(&request)
            .send()
            .await
            .map_err(map_err)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_err)?;
        ensure_success(status, &body)?;
        Ok(body)
    }

    async fn open(&self, request: HostRequest) -> Result<ByteStream, CallError> {
        let response = self
            .request_builder(&request)
            .send()
            .await
            .map_err(CallError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.map_err(CallError::Request)?;
            return Err(CallError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        debug!(event = "loopback_stream_opened", path = %request.path);
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed())
    }
}

/// Encodes a call as form-urlencoded query parameters on `<prefix>/<method>`.
pub(crate) fn encode_query(config: &HostConfig, call: &RpcCall) -> Result<HostRequest, CallError> {
    let mut query = form_urlencoded::Serializer::new(String::new());
    for (key, value) in call.params() {
        query.append_pair(key, &query_value(value));
    }
    let query = query.finish();

    let mut path = config.method_path(call.method());
    if !query.is_empty() {
        path.push('?');
        path.push_str(&query);
    }

    Ok(HostRequest {
        path,
        body: Bytes::new(),
        content_type: None,
        accept: None,
        timeout: Some(config.deadline_for(call.timeout())),
    })
}

fn query_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Reads a raw-text reply as `kind`.
pub(crate) fn decode_raw(kind: ResultKind, body: &[u8]) -> Result<Reply, CallError> {
    match kind {
        ResultKind::Ack if body == SUCCESS_TOKEN.as_bytes() => Ok(Reply::Ack),
        ResultKind::Ack => Err(CallError::Rejected {
            body: summarize_error_body(body),
        }),
        ResultKind::Text => String::from_utf8(body.to_vec())
            .map(Reply::Text)
            .map_err(|err| CallError::Decode(err.to_string())),
        ResultKind::Flag => match std::str::from_utf8(body).map(str::trim) {
            Ok("true") => Ok(Reply::Flag(true)),
            Ok("false") => Ok(Reply::Flag(false)),
            _ => Err(CallError::Decode(format!(
                "expected true or false, found {:?}",
                String::from_utf8_lossy(body)
            ))),
        },
        ResultKind::TextList => {
            let value: Value =
                serde_json::from_slice(body).map_err(|err| CallError::Decode(err.to_string()))?;
            text_list_from_value(&value).map(Reply::TextList)
        }
    }
}
