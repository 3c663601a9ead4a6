//! Inbound event stream listener.
//!
//! The listener opens one streamed `POST <prefix>/msghook`, splits the body
//! into `\n`-terminated lines and hands each payload line to a handler on the
//! read-loop task. It stops when the cancellation token fires, the host ends
//! the stream, or a read fails. It never reconnects.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream::frame::{StreamFrame, MAX_LINE_BYTES};
use crate::transport::{ByteStream, CallError, Transport};

/// Chat context whose messages the host should stream.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SubscribeTarget {
    #[serde(rename = "imtype")]
    pub im_type: String,
    #[serde(rename = "chatid")]
    pub chat_id: String,
    #[serde(rename = "userid")]
    pub user_id: String,
}

impl SubscribeTarget {
    pub fn new(
        im_type: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            im_type: im_type.into(),
            chat_id: chat_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Why a read loop stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListenerExit {
    /// The cancellation token fired.
    Cancelled,
    /// The host closed the stream.
    StreamEnded,
    /// Reading the body failed.
    ReadFailed,
    /// A line grew past the length limit without a terminator.
    LineTooLong,
    /// The handler panicked and took the read loop with it.
    HandlerPanicked,
}

/// Opens event streams over a shared transport.
#[derive(Clone, Debug)]
pub struct EventListener {
    transport: Arc<dyn Transport>,
    max_line_bytes: usize,
}

impl EventListener {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Caps the length of a single stream line, terminator excluded.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Streams messages for `target` to `handler` until `done` is cancelled.
    ///
    /// Fails only when the stream cannot be opened. Once it is open, the read
    /// loop runs on its own task and this call returns as soon as `done` fires,
    /// even while the handler is still busy. The loop closes the connection at
    /// its next read. If `done` is already cancelled nothing is opened.
    ///
    /// Use [`spawn`](Self::spawn) and [`Subscription::join`] to wait for the
    /// loop itself.
    pub async fn subscribe<H>(
        &self,
        target: &SubscribeTarget,
        done: CancellationToken,
        handler: H,
    ) -> Result<(), CallError>
    where
        H: FnMut(String) + Send + 'static,
    {
        if done.is_cancelled() {
            return Ok(());
        }

        let _subscription = self.start(target, done.clone(), handler).await?;
        done.cancelled().await;
        Ok(())
    }

    /// Opens the stream for `target` and returns without waiting.
    ///
    /// The returned [`Subscription`] owns a fresh cancellation token.
    pub async fn spawn<H>(
        &self,
        target: &SubscribeTarget,
        handler: H,
    ) -> Result<Subscription, CallError>
    where
        H: FnMut(String) + Send + 'static,
    {
        self.start(target, CancellationToken::new(), handler).await
    }

    async fn start<H>(
        &self,
        target: &SubscribeTarget,
        done: CancellationToken,
        handler: H,
    ) -> Result<Subscription, CallError>
    where
        H: FnMut(String) + Send + 'static,
    {
        let request = self.transport.subscribe_request(target)?;
        let body = self.transport.open(request).await?;
        debug!(
            event = "event_stream_opened",
            imtype = %target.im_type,
            chatid = %target.chat_id,
            userid = %target.user_id
        );

        let task = tokio::spawn(read_loop(
            body,
            done.clone(),
            self.max_line_bytes,
            handler,
        ));
        Ok(Subscription { token: done, task })
    }
}

/// Handle to a running read loop.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
    task: JoinHandle<ListenerExit>,
}

impl Subscription {
    /// Stops the read loop. Safe to call any number of times.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the read loop to stop.
    pub async fn join(self) -> ListenerExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(err) => {
                warn!(event = "event_stream_task_failed", error = %err);
                ListenerExit::HandlerPanicked
            }
        }
    }
}

async fn read_loop<H>(
    body: ByteStream,
    done: CancellationToken,
    max_line_bytes: usize,
    mut handler: H,
) -> ListenerExit
where
    H: FnMut(String),
{
    let mut reader = StreamReader::new(body);
    let mut line = Vec::new();
    let mut delivered: u64 = 0;

    let exit = loop {
        line.clear();
        let mut bounded = (&mut reader).take(max_line_bytes as u64 + 1);
        let read = tokio::select! {
            biased;
            _ = done.cancelled() => None,
            read = bounded.read_until(b'\n', &mut line) => Some(read),
        };
        let Some(read) = read else {
            break ListenerExit::Cancelled;
        };

        match read {
            Ok(0) => break ListenerExit::StreamEnded,
            Ok(_) if line.last() != Some(&b'\n') && line.len() > max_line_bytes => {
                debug!(event = "event_stream_line_too_long", limit = max_line_bytes);
                break ListenerExit::LineTooLong;
            }
            Ok(_) if line.last() != Some(&b'\n') => {
                debug!(event = "event_stream_partial_line_dropped", bytes = line.len());
                break ListenerExit::StreamEnded;
            }
            Ok(_) => {
                line.pop();
                let text = String::from_utf8_lossy(&line);
                if let Some(payload) = StreamFrame::classify(&text).into_payload() {
                    delivered += 1;
                    handler(payload);
                }
            }
            Err(err) => {
                debug!(event = "event_stream_read_failed", error = %err);
                break ListenerExit::ReadFailed;
            }
        }
    };

    debug!(event = "event_stream_closed", reason = ?exit, delivered);
    exit
}
