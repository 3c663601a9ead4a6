//! Calls scoped to one sender identity.
//!
//! A [`Session`] carries the sender id the host passed to the plugin and adds
//! it as the `senderid` parameter of every call. The id is never changed.

use tokio_util::sync::CancellationToken;

use crate::rpc::call::{ResultKind, RpcCall, SENDER_PARAM};
use crate::rpc::client::{bucket_call, HostClient, OperationError};
use crate::stream::SubscribeTarget;
use crate::transport::CallError;

/// Sender-scoped view of a [`HostClient`].
#[derive(Clone, Debug)]
pub struct Session {
    client: HostClient,
    sender_id: String,
}

impl Session {
    pub fn new(client: HostClient, sender_id: impl Into<String>) -> Self {
        Self {
            client,
            sender_id: sender_id.into(),
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn client(&self) -> &HostClient {
        &self.client
    }

    fn call(&self, method: &'static str, kind: ResultKind) -> RpcCall {
        RpcCall::new(method, kind).param(SENDER_PARAM, self.sender_id.as_str())
    }

    async fn text(&self, method: &'static str) -> String {
        self.client.query_text(self.call(method, ResultKind::Text)).await
    }

    async fn flag(&self, method: &'static str) -> bool {
        self.client.query_flag(self.call(method, ResultKind::Flag)).await
    }

    async fn target_user(
        &self,
        operation: &'static str,
        method: &'static str,
        user_id: &str,
    ) -> Result<(), OperationError> {
        let call = self.call(method, ResultKind::Ack).param("userid", user_id);
        self.client.mutate(operation, call).await
    }

    pub async fn bucket_get(&self, bucket: &str, key: &str) -> String {
        let call = bucket_call("bucketGet", ResultKind::Text, bucket)
            .param(SENDER_PARAM, self.sender_id.as_str())
            .param("key", key);
        self.client.query_text(call).await
    }

    pub async fn bucket_set(
        &self,
        bucket: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OperationError> {
        let call = bucket_call("bucketSet", ResultKind::Ack, bucket)
            .param(SENDER_PARAM, self.sender_id.as_str())
            .param("key", key)
            .param("value", value);
        self.client.mutate("bucket set", call).await
    }

    pub async fn bucket_delete(&self, bucket: &str, key: &str) -> Result<(), OperationError> {
        let call = bucket_call("bucketDel", ResultKind::Ack, bucket)
            .param(SENDER_PARAM, self.sender_id.as_str())
            .param("key", key);
        self.client.mutate("bucket delete", call).await
    }

    pub async fn bucket_keys(&self, bucket: &str, value: &str) -> Vec<String> {
        let call = bucket_call("bucketKeys", ResultKind::TextList, bucket)
            .param(SENDER_PARAM, self.sender_id.as_str())
            .param("value", value);
        self.client.query_text_list(call).await
    }

    pub async fn bucket_all_keys(&self, bucket: &str) -> Vec<String> {
        let call = bucket_call("bucketAllKeys", ResultKind::TextList, bucket)
            .param(SENDER_PARAM, self.sender_id.as_str());
        self.client.query_text_list(call).await
    }

    /// Lets the message continue to other plugins after this one.
    pub async fn set_continue(&self) -> bool {
        self.flag("continue").await
    }

    /// Platform code of the conversation (`qq`, `wx`, `tg`, ...).
    pub async fn get_imtype(&self) -> String {
        self.text("getImtype").await
    }

    pub async fn get_user_id(&self) -> String {
        self.text("getUserID").await
    }

    pub async fn get_username(&self) -> String {
        self.text("getUserName").await
    }

    pub async fn get_user_avatar_url(&self) -> String {
        self.text("getUserAvatarUrl").await
    }

    /// Group id, or `""` in a private chat.
    pub async fn get_chat_id(&self) -> String {
        self.text("getChatID").await
    }

    pub async fn get_chat_name(&self) -> String {
        self.text("getChatName").await
    }

    pub async fn is_admin(&self) -> bool {
        self.flag("isAdmin").await
    }

    /// Text of the message that triggered the plugin.
    pub async fn get_message(&self) -> String {
        self.text("getMessage").await
    }

    pub async fn get_message_id(&self) -> String {
        self.text("getMessageID").await
    }

    pub async fn recall_message(&self, message_id: &str) -> Result<(), OperationError> {
        let call = self
            .call("recallMessage", ResultKind::Ack)
            .param("messageid", message_id);
        self.client.mutate("recall", call).await
    }

    /// Re-injects `content` into the message queue as if this sender had
    /// typed it, which can trigger other plugins.
    pub async fn break_in(&self, content: &str) -> Result<(), OperationError> {
        let call = self.call("breakIn", ResultKind::Ack).param("text", content);
        self.client.mutate("break in", call).await
    }

    /// Value captured by the plugin's trigger rule at `index`.
    pub async fn param(&self, index: i64) -> String {
        let call = self.call("param", ResultKind::Text).param("index", index);
        self.client.query_text(call).await
    }

    /// Replies with text and returns the ids of the sent messages.
    pub async fn reply(&self, text: &str) -> Result<Vec<String>, OperationError> {
        self.send("sendText", "text", text).await
    }

    pub async fn reply_markdown(&self, markdown: &str) -> Result<Vec<String>, OperationError> {
        self.send("sendMarkdown", "markdown", markdown).await
    }

    pub async fn reply_image(&self, image_url: &str) -> Result<Vec<String>, OperationError> {
        self.send("sendImage", "imageurl", image_url).await
    }

    pub async fn reply_voice(&self, voice_url: &str) -> Result<Vec<String>, OperationError> {
        self.send("sendVoice", "voiceurl", voice_url).await
    }

    pub async fn reply_video(&self, video_url: &str) -> Result<Vec<String>, OperationError> {
        self.send("sendVideo", "videourl", video_url).await
    }

    async fn send(
        &self,
        method: &'static str,
        field: &str,
        content: &str,
    ) -> Result<Vec<String>, OperationError> {
        let call = self.call(method, ResultKind::TextList).param(field, content);
        self.client.deliver("reply", call).await
    }

    /// Waits up to `timeout_ms` for the sender's next message.
    ///
    /// Returns `""` when nothing arrives in time; a timeout and an empty
    /// message look the same.
    pub async fn listen(&self, timeout_ms: u64) -> String {
        let call = self.call("listen", ResultKind::Text).blocking(timeout_ms);
        self.client.query_text(call).await
    }

    /// Waits up to `timeout_ms` for the sender to pay. Returns the payment
    /// details as a JSON string, or `""` on timeout.
    ///
    /// A message equal to `exit_code` from the sender ends the wait early.
    pub async fn wait_pay(&self, exit_code: &str, timeout_ms: u64) -> String {
        let call = self
            .call("waitPay", ResultKind::Text)
            .param("exitCode", exit_code)
            .blocking(timeout_ms);
        self.client.query_text(call).await
    }

    /// Whether the host is currently waiting for this sender to pay.
    pub async fn at_wait_pay(&self) -> bool {
        self.flag("atWaitPay").await
    }

    pub async fn group_invite_in(&self, friend: &str, group: &str) -> Result<(), OperationError> {
        let call = self
            .call("groupInviteIn", ResultKind::Ack)
            .param("friend", friend)
            .param("group", group);
        self.client.mutate("group invite", call).await
    }

    pub async fn group_kick(&self, user_id: &str) -> Result<(), OperationError> {
        self.target_user("group kick", "groupKick", user_id).await
    }

    /// Mutes `user_id` in the current group. `timeout` is forwarded to the
    /// host unchanged.
    pub async fn group_ban(&self, user_id: &str, timeout: u64) -> Result<(), OperationError> {
        let call = self
            .call("groupBan", ResultKind::Ack)
            .param("userid", user_id)
            .param("timeout", timeout);
        self.client.mutate("group ban", call).await
    }

    pub async fn group_unban(&self, user_id: &str) -> Result<(), OperationError> {
        self.target_user("group unban", "groupUnban", user_id).await
    }

    pub async fn group_whole_ban(&self, user_id: &str) -> Result<(), OperationError> {
        self.target_user("group whole ban", "groupWholeBan", user_id)
            .await
    }

    pub async fn group_whole_unban(&self, user_id: &str) -> Result<(), OperationError> {
        self.target_user("group whole unban", "groupWholeUnban", user_id)
            .await
    }

    pub async fn group_notice_send(&self, notice: &str) -> Result<(), OperationError> {
        let call = self
            .call("groupNoticeSend", ResultKind::Ack)
            .param("notice", notice);
        self.client.mutate("group notice", call).await
    }

    pub async fn get_plugin_name(&self) -> String {
        self.text("getPluginName").await
    }

    pub async fn get_plugin_version(&self) -> String {
        self.text("getPluginVersion").await
    }

    /// Chat context of this sender, as the event stream expects it.
    pub async fn subscribe_target(&self) -> SubscribeTarget {
        let (im_type, chat_id, user_id) =
            tokio::join!(self.get_imtype(), self.get_chat_id(), self.get_user_id());
        SubscribeTarget::new(im_type, chat_id, user_id)
    }

    /// Subscribes to messages in this sender's chat until `done` is cancelled.
    ///
    /// See [`EventListener::subscribe`](crate::stream::EventListener::subscribe).
    pub async fn subscribe<H>(&self, done: CancellationToken, handler: H) -> Result<(), CallError>
    where
        H: FnMut(String) + Send + 'static,
    {
        let target = self.subscribe_target().await;
        self.client
            .listener()
            .subscribe(&target, done, handler)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::rpc::HostClient;
    use crate::transport::testing::{ScriptedTransport, WireStyle};
    use crate::transport::CallError;

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
            .block_on(future)
    }

    fn body(request: &crate::transport::HostRequest) -> Value {
        serde_json::from_slice(&request.body).expect("json request body")
    }

    #[test]
    fn every_call_carries_the_sender_id() {
        let transport = Arc::new(
            ScriptedTransport::new(WireStyle::Envelope)
                .reply(r#"{"data":"qq"}"#)
                .reply(r#"{"data":true}"#)
                .reply(r#"{"data":"v"}"#),
        );
        let session = HostClient::with_transport(transport.clone()).session("sender-42");

        block_on(async {
            assert_eq!(session.get_imtype().await, "qq");
            assert!(session.is_admin().await);
            assert_eq!(session.bucket_get("notes", "k").await, "v");
        });

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        for request in &requests {
            assert_eq!(body(request)["senderid"], "sender-42");
        }
        assert_eq!(requests[0].path, "/sock/getImtype");
        assert_eq!(requests[1].path, "/sock/isAdmin");
        assert_eq!(body(&requests[2])["bucket"], "notes");
        assert_eq!(session.sender_id(), "sender-42");
    }

    #[test]
    fn reply_returns_message_ids() {
        let transport = Arc::new(
            ScriptedTransport::new(WireStyle::Envelope).reply(r#"{"data":"[\"m-1\",\"m-2\"]"}"#),
        );
        let session = HostClient::with_transport(transport.clone()).session("s");

        let ids = block_on(session.reply("hello & <b>bye</b>")).expect("reply");
        assert_eq!(ids, vec!["m-1", "m-2"]);

        let request = &transport.requests()[0];
        assert_eq!(request.path, "/sock/sendText");
        assert_eq!(body(request)["text"], "hello & <b>bye</b>");
    }

    #[test]
    fn reply_without_ids_is_a_named_failure() {
        let transport = Arc::new(
            ScriptedTransport::new(WireStyle::Envelope)
                .reply(r#"{"code":500}"#)
                .fail(CallError::InvalidRequest("socket gone".to_string())),
        );
        let session = HostClient::with_transport(transport).session("s");

        block_on(async {
            let error = session.reply_image("https://x/y.png").await.expect_err("no ids");
            assert_eq!(error.operation, "reply");
            assert!(error.to_string().starts_with("reply failed"));

            let error = session.reply_markdown("# hi").await.expect_err("transport");
            assert_eq!(error.operation, "reply");
        });
    }

    #[test]
    fn reply_with_unreadable_ids_still_counts_as_sent() {
        let transport = Arc::new(
            ScriptedTransport::new(WireStyle::Envelope)
                .reply(r#"{"data":"m-1"}"#)
                .reply(r#"{"data":17}"#)
                .reply("<html>bad gateway</html>"),
        );
        let session = HostClient::with_transport(transport).session("s");

        block_on(async {
            let ids = session.reply("hi").await.expect("host accepted the message");
            assert!(ids.is_empty());
            let ids = session.reply_voice("https://x/a.mp3").await.expect("accepted");
            assert!(ids.is_empty());

            let error = session.reply("hi").await.expect_err("no envelope at all");
            assert_eq!(error.operation, "reply");
            assert!(matches!(error.source, CallError::Envelope(_)));
        });
    }

    #[test]
    fn listen_sets_deadline_above_logical_timeout() {
        let transport =
            Arc::new(ScriptedTransport::new(WireStyle::Query).reply("user typed this"));
        let session = HostClient::with_transport(transport.clone()).session("s");

        assert_eq!(block_on(session.listen(60_000)), "user typed this");

        let request = &transport.requests()[0];
        assert!(request.timeout.expect("deadline") >= Duration::from_millis(60_000));
        assert!(request.path.starts_with("/otto/listen?"));
        assert!(request.path.contains("timeout=60000"));
    }

    #[test]
    fn timed_out_blocking_calls_look_like_empty_answers() {
        let transport = Arc::new(
            ScriptedTransport::new(WireStyle::Query)
                .fail(CallError::Timeout(Duration::from_millis(10)))
                .reply(""),
        );
        let session = HostClient::with_transport(transport).session("s");

        block_on(async {
            let timed_out = session.wait_pay("q", 10).await;
            let empty = session.wait_pay("q", 10).await;
            assert_eq!(timed_out, "");
            assert_eq!(timed_out, empty);
        });
    }

    #[test]
    fn group_moderation_uses_user_id_parameter() {
        let transport = Arc::new(
            ScriptedTransport::new(WireStyle::Envelope)
                .reply("{}")
                .reply("{}"),
        );
        let session = HostClient::with_transport(transport.clone()).session("s");

        block_on(async {
            session.group_ban("u-1", 600).await.expect("ban");
            session.group_whole_unban("u-2").await.expect("whole unban");
        });

        let requests = transport.requests();
        assert_eq!(requests[0].path, "/sock/groupBan");
        assert_eq!(body(&requests[0])["timeout"], json!(600));
        assert_eq!(requests[1].path, "/sock/groupWholeUnban");
        assert_eq!(body(&requests[1])["userid"], "u-2");
    }

    #[test]
    fn subscribe_target_resolves_chat_context() {
        let transport = Arc::new(
            ScriptedTransport::new(WireStyle::Envelope)
                .reply(r#"{"data":"tg"}"#)
                .reply(r#"{"data":"chat-1"}"#)
                .reply(r#"{"data":"user-1"}"#),
        );
        let session = HostClient::with_transport(transport).session("s");

        let target = block_on(session.subscribe_target());
        assert_eq!(target.im_type, "tg");
        assert_eq!(target.chat_id, "chat-1");
        assert_eq!(target.user_id, "user-1");
    }
}
