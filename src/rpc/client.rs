//! Host client and host-wide calls.
//!
//! Every call is a single attempt. Queries never fail from the caller's point
//! of view: transport and decode errors degrade to the zero value of the
//! result type and are logged at debug level. Mutations report failures as an
//! [`OperationError`] naming the operation.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::HostConfig;
use crate::rpc::call::{Reply, ResultKind, RpcCall};
use crate::rpc::session::Session;
use crate::stream::EventListener;
use crate::transport::{self, CallError, Transport};

/// Named failure of a mutating call, e.g. `reply failed: ...`.
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct OperationError {
    pub operation: &'static str,
    #[source]
    pub source: CallError,
}

/// Cloneable handle to the host.
#[derive(Clone, Debug)]
pub struct HostClient {
    transport: Arc<dyn Transport>,
}

impl HostClient {
    /// Builds the transport `config` asks for. No connection is made until the
    /// first call.
    pub fn connect(config: HostConfig) -> Result<Self, CallError> {
        Ok(Self::with_transport(transport::for_config(config)?))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn config(&self) -> &HostConfig {
        self.transport.config()
    }

    /// Returns a handle for calls made on behalf of `sender_id`.
    pub fn session(&self, sender_id: impl Into<String>) -> Session {
        Session::new(self.clone(), sender_id)
    }

    /// Returns an event listener sharing this client's transport.
    pub fn listener(&self) -> EventListener {
        EventListener::new(Arc::clone(&self.transport))
    }

    /// Runs `call` and returns its decoded reply without degrading errors.
    pub async fn query(&self, call: RpcCall) -> Result<Reply, CallError> {
        let request = self.transport.encode(&call)?;
        let body = self.transport.send(request).await?;
        self.transport.decode(call.kind(), &body)
    }

    pub(crate) async fn query_text(&self, call: RpcCall) -> String {
        let method = call.method();
        degrade(method, self.query(call).await.map(Reply::into_text))
    }

    pub(crate) async fn query_flag(&self, call: RpcCall) -> bool {
        let method = call.method();
        degrade(method, self.query(call).await.map(Reply::into_flag))
    }

    pub(crate) async fn query_text_list(&self, call: RpcCall) -> Vec<String> {
        let method = call.method();
        degrade(method, self.query(call).await.map(Reply::into_text_list))
    }

    pub(crate) async fn mutate(
        &self,
        operation: &'static str,
        call: RpcCall,
    ) -> Result<(), OperationError> {
        self.query(call)
            .await
            .map(|_| ())
            .map_err(|source| OperationError { operation, source })
    }

    /// Mutation whose reply carries the ids of the messages the host sent.
    ///
    /// Once the host has answered with a result field the message counts as
    /// sent: ids that cannot be read come back as an empty list.
    pub(crate) async fn deliver(
        &self,
        operation: &'static str,
        call: RpcCall,
    ) -> Result<Vec<String>, OperationError> {
        let method = call.method();
        match self.query(call).await {
            Ok(reply) => Ok(reply.into_text_list()),
            Err(CallError::Decode(reason)) => {
                debug!(event = "host_message_ids_unreadable", method, %reason);
                Ok(Vec::new())
            }
            Err(source) => Err(OperationError { operation, source }),
        }
    }

    /// Pushes a message to a user or group on an IM platform.
    ///
    /// `im_type` is the platform code (`qq`, `wx`, `tg`, ...).
    pub async fn push(
        &self,
        im_type: &str,
        group_code: &str,
        user_id: &str,
        title: &str,
        content: &str,
    ) -> Result<(), OperationError> {
        let call = RpcCall::new("push", ResultKind::Ack)
            .param("imType", im_type)
            .param("groupCode", group_code)
            .param("userID", user_id)
            .param("title", title)
            .param("content", content);
        self.mutate("push", call).await
    }

    /// Name of the host instance.
    pub async fn name(&self) -> String {
        self.query_text(RpcCall::new("name", ResultKind::Text)).await
    }

    pub async fn machine_id(&self) -> String {
        self.query_text(RpcCall::new("machineId", ResultKind::Text)).await
    }

    /// Host version as a JSON string, e.g. `{"sn":"1.9.8","content":[...]}`.
    pub async fn version(&self) -> String {
        self.query_text(RpcCall::new("version", ResultKind::Text)).await
    }

    /// Reads a value from the plugin's own key-value store.
    pub async fn get(&self, key: &str) -> String {
        self.query_text(RpcCall::new("get", ResultKind::Text).param("key", key)).await
    }

    /// Like [`get`](Self::get) but returns `default` when the value is empty.
    pub async fn get_or(&self, key: &str, default: &str) -> String {
        let value = self.get(key).await;
        if value.is_empty() {
            default.to_string()
        } else {
            value
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), OperationError> {
        let call = RpcCall::new("set", ResultKind::Ack)
            .param("key", key)
            .param("value", value);
        self.mutate("set", call).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), OperationError> {
        let call = RpcCall::new("delete", ResultKind::Ack).param("key", key);
        self.mutate("delete", call).await
    }

    pub async fn bucket_get(&self, bucket: &str, key: &str) -> String {
        self.query_text(bucket_call("bucketGet", ResultKind::Text, bucket).param("key", key))
            .await
    }

    pub async fn bucket_set(
        &self,
        bucket: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OperationError> {
        let call = bucket_call("bucketSet", ResultKind::Ack, bucket)
            .param("key", key)
            .param("value", value);
        self.mutate("bucket set", call).await
    }

    pub async fn bucket_delete(&self, bucket: &str, key: &str) -> Result<(), OperationError> {
        let call = bucket_call("bucketDel", ResultKind::Ack, bucket).param("key", key);
        self.mutate("bucket delete", call).await
    }

    /// Keys in `bucket` whose value equals `value`.
    pub async fn bucket_keys(&self, bucket: &str, value: &str) -> Vec<String> {
        let call = bucket_call("bucketKeys", ResultKind::TextList, bucket).param("value", value);
        self.query_text_list(call).await
    }

    pub async fn bucket_all_keys(&self, bucket: &str) -> Vec<String> {
        self.query_text_list(bucket_call("bucketAllKeys", ResultKind::TextList, bucket))
            .await
    }

    /// Notifies the host's administrators on the given platforms.
    pub async fn notify_masters(
        &self,
        content: &str,
        im_types: &[&str],
    ) -> Result<(), OperationError> {
        let call = RpcCall::new("notifyMasters", ResultKind::Ack)
            .param("content", content)
            .param("imtypes", im_types.to_vec());
        self.mutate("notify masters", call).await
    }

    /// Whether the host's license is activated.
    pub async fn coffee(&self) -> bool {
        self.query_flag(RpcCall::new("coffee", ResultKind::Flag)).await
    }

    /// Converts shop links in `msg` into promotion links.
    pub async fn promotion(&self, msg: &str) -> String {
        self.query_text(RpcCall::new("spread", ResultKind::Text).param("msg", msg)).await
    }
}

pub(crate) fn bucket_call(method: &'static str, kind: ResultKind, bucket: &str) -> RpcCall {
    RpcCall::new(method, kind).param("bucket", bucket)
}

fn degrade<T: Default>(method: &'static str, result: Result<T, CallError>) -> T {
    result.unwrap_or_else(|error| {
        debug!(event = "host_query_degraded", method, %error);
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Arc;

    use serde_json::Value;

    use super::HostClient;
    use crate::rpc::{ResultKind, RpcCall};
    use crate::transport::testing::{ScriptedTransport, WireStyle};
    use crate::transport::CallError;

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
            .block_on(future)
    }

    fn client(transport: ScriptedTransport) -> (HostClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        (HostClient::with_transport(transport.clone()), transport)
    }

    #[test]
    fn queries_degrade_to_zero_values_on_unparsable_bodies() {
        let (client, _) = client(
            ScriptedTransport::new(WireStyle::Envelope)
                .reply("<html>502</html>")
                .reply("{\"data\":")
                .reply("{\"nodata\":true}"),
        );

        block_on(async {
            assert_eq!(client.name().await, "");
            assert!(!client.coffee().await);
            assert!(client.bucket_all_keys("b").await.is_empty());
        });
    }

    #[test]
    fn queries_degrade_on_transport_errors() {
        let (client, _) = client(
            ScriptedTransport::new(WireStyle::Query)
                .fail(CallError::InvalidRequest("connection refused".to_string()))
                .fail(CallError::Timeout(std::time::Duration::from_millis(1))),
        );

        block_on(async {
            assert_eq!(client.get("k").await, "");
            assert!(client.bucket_keys("b", "v").await.is_empty());
        });
    }

    #[test]
    fn query_surface_exposes_errors_when_asked() {
        let (client, _) = client(ScriptedTransport::new(WireStyle::Envelope).reply("garbage"));

        let result = block_on(client.query(RpcCall::new("name", ResultKind::Text)));
        assert!(matches!(result, Err(CallError::Envelope(_))));
    }

    #[test]
    fn get_or_uses_default_for_empty_values() {
        let (client, _) = client(
            ScriptedTransport::new(WireStyle::Envelope)
                .reply(r#"{"data":""}"#)
                .reply(r#"{"data":"stored"}"#),
        );

        block_on(async {
            assert_eq!(client.get_or("k", "fallback").await, "fallback");
            assert_eq!(client.get_or("k", "fallback").await, "stored");
        });
    }

    #[test]
    fn mutation_succeeds_only_on_exact_token_in_query_style() {
        let (client, transport) = client(
            ScriptedTransport::new(WireStyle::Query)
                .reply("ok")
                .reply("error: read only"),
        );

        block_on(async {
            client.set("k", "v").await.expect("ok token accepted");
            let error = client.delete("k").await.expect_err("other body rejected");
            assert_eq!(error.operation, "delete");
            assert!(error.to_string().starts_with("delete failed"));
            assert!(matches!(error.source, CallError::Rejected { .. }));
        });

        let requests = transport.requests();
        assert_eq!(requests[0].path, "/otto/set?key=k&value=v");
        assert_eq!(requests[1].path, "/otto/delete?key=k");
    }

    #[test]
    fn mutation_in_envelope_style_fails_only_on_transport_error() {
        let (client, _) = client(
            ScriptedTransport::new(WireStyle::Envelope)
                .reply("anything at all")
                .fail(CallError::InvalidRequest("socket missing".to_string())),
        );

        block_on(async {
            client
                .bucket_set("b", "k", "v")
                .await
                .expect("body is not inspected");
            let error = client
                .bucket_delete("b", "k")
                .await
                .expect_err("transport failure surfaces");
            assert_eq!(error.operation, "bucket delete");
        });
    }

    #[test]
    fn push_and_notify_encode_their_parameters() {
        let (client, transport) = client(
            ScriptedTransport::new(WireStyle::Envelope)
                .reply("{}")
                .reply("{}"),
        );

        block_on(async {
            client
                .push("qq", "g1", "u1", "title", "body")
                .await
                .expect("push");
            client
                .notify_masters("disk full", &["qq", "tg"])
                .await
                .expect("notify");
        });

        let requests = transport.requests();
        assert_eq!(requests[0].path, "/sock/push");
        let push: Value = serde_json::from_slice(&requests[0].body).expect("push body");
        assert_eq!(push["imType"], "qq");
        assert_eq!(push["groupCode"], "g1");
        assert_eq!(push["userID"], "u1");

        let notify: Value = serde_json::from_slice(&requests[1].body).expect("notify body");
        assert_eq!(notify["imtypes"], serde_json::json!(["qq", "tg"]));
    }

    #[test]
    fn promotion_targets_spread_endpoint() {
        let (client, transport) = client(
            ScriptedTransport::new(WireStyle::Envelope).reply(r#"{"data":"converted"}"#),
        );

        assert_eq!(block_on(client.promotion("https://item.jd.com/1")), "converted");
        assert_eq!(transport.requests()[0].path, "/sock/spread");
    }
}
