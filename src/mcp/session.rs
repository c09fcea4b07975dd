//! Per-connection session state shared by both peer variants.
//!
//! A session owns the serialized write sink, the pending-waiter table
//! for requests this peer issued, the table of inbound handlers
//! currently running (so the peer can cancel them), and the ping
//! keepalive. The server and client wrap this core with their own
//! dispatch tables and notification inboxes.
//!
//! Lifetime: the cancellation token is the root of everything the
//! session spawned. Cancelling it unblocks every pending waiter with
//! `Cancelled`, stops the ping loop, and pushes the session id to the
//! coordinator for deregistration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::mcp::message::{
    JsonRpcError, JsonRpcMessage, MessageId, NOTIFICATION_CANCELLED, METHOD_PING,
};
use crate::mcp::types::CancelledParams;
use crate::utils::error::{McpError, McpResult};

/// Default bound on a single frame emission.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound on waiting for the response to an outbound request.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Default silence tolerated between keepalive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Per-session timeout configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionTimeouts {
    pub(crate) write_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) ping_interval: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

/// Shared per-connection state.
///
/// Everything here is owned by the coordinator through an `Arc`; the
/// upward link is the deregistration sender only.
pub(crate) struct SessionCore {
    pub(crate) id: String,
    /// Serialized sink for outbound frames. Only one write is in
    /// flight at a time; each must complete within `write_timeout`.
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Waiters for responses to requests this peer issued, keyed by
    /// the id's string form. An entry exists from send until exactly
    /// one of {response delivered, cancel, read timeout}.
    pending: StdMutex<HashMap<String, oneshot::Sender<JsonRpcMessage>>>,
    /// Inbound request handlers currently executing, keyed by the
    /// request id's string form. `notifications/cancelled` aborts
    /// the matching entry.
    running: StdMutex<HashMap<String, AbortHandle>>,
    initialized: AtomicBool,
    pub(crate) cancel: CancellationToken,
    pub(crate) timeouts: SessionTimeouts,
    stop_tx: mpsc::UnboundedSender<String>,
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("id", &self.id)
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionCore {
    pub(crate) fn new(
        id: String,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        timeouts: SessionTimeouts,
        stop_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            id,
            writer: Mutex::new(writer),
            pending: StdMutex::new(HashMap::new()),
            running: StdMutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            timeouts,
            stop_tx,
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        debug!(session = %self.id, "session initialized");
    }

    /// Emit one frame under the write mutex.
    ///
    /// A frame that cannot be written whole within `write_timeout`
    /// means the transport is wedged; the session is terminated.
    pub(crate) async fn write_frame(&self, msg: &JsonRpcMessage) -> McpResult<()> {
        let bytes = msg.to_bytes()?;
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        match time::timeout(self.timeouts.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(session = %self.id, error = %e, "write failed, terminating session");
                drop(writer);
                self.terminate();
                Err(e.into())
            }
            Err(_) => {
                warn!(session = %self.id, "write timed out, terminating session");
                drop(writer);
                self.terminate();
                Err(McpError::Timeout)
            }
        }
    }

    /// Issue a request and wait for its response.
    ///
    /// Exactly one of {success result, peer error, `Cancelled`,
    /// `Timeout`} is observed by the caller. On timeout a
    /// best-effort `notifications/cancelled` is pushed so the peer
    /// can stop working on the request.
    pub(crate) async fn send_request(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<Value> {
        let id = MessageId::String(Uuid::new_v4().to_string());
        let key = id.to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(key.clone(), tx);

        let msg = JsonRpcMessage::request(id, method, params);
        if let Err(e) = self.write_frame(&msg).await {
            self.remove_pending(&key);
            return Err(e);
        }

        tokio::select! {
            res = rx => match res {
                Ok(frame) => match frame.error {
                    Some(err) => Err(McpError::JsonRpc(err)),
                    None => Ok(frame.result.unwrap_or(Value::Null)),
                },
                // Sender dropped without a frame: the session tore
                // down between removal and delivery.
                Err(_) => Err(McpError::Cancelled),
            },
            _ = self.cancel.cancelled() => {
                self.remove_pending(&key);
                Err(McpError::Cancelled)
            }
            _ = time::sleep(self.timeouts.read_timeout) => {
                self.remove_pending(&key);
                debug!(session = %self.id, request = %key, method, "request timed out");
                let sess = Arc::clone(self);
                tokio::spawn(async move {
                    let params = CancelledParams {
                        request_id: key,
                        reason: "request timed out".to_string(),
                    };
                    let _ = sess
                        .send_notification(
                            NOTIFICATION_CANCELLED,
                            serde_json::to_value(params).ok(),
                        )
                        .await;
                });
                Err(McpError::Timeout)
            }
        }
    }

    /// Emit a notification frame; no id, no waiter.
    pub(crate) async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<()> {
        self.write_frame(&JsonRpcMessage::notification(method, params))
            .await
    }

    /// Emit a success response echoing the request id.
    pub(crate) async fn send_response(&self, id: MessageId, result: Value) -> McpResult<()> {
        self.write_frame(&JsonRpcMessage::success(id, result)).await
    }

    /// Emit an error response echoing the request id.
    pub(crate) async fn send_error(&self, id: MessageId, error: JsonRpcError) -> McpResult<()> {
        self.write_frame(&JsonRpcMessage::error_response(id, error))
            .await
    }

    /// Route an inbound response frame to its waiter.
    ///
    /// The entry is removed before the frame is forwarded, so no
    /// channel is ever sent to twice. Frames with no waiter (late
    /// responses, responses to cancelled requests) are dropped.
    pub(crate) fn deliver_response(&self, msg: JsonRpcMessage) {
        let Some(id) = msg.id.clone() else { return };
        let key = id.to_string();
        let waiter = self.pending.lock().unwrap().remove(&key);
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => {
                debug!(session = %self.id, response = %key, "dropping unmatched response");
            }
        }
    }

    fn remove_pending(&self, key: &str) {
        self.pending.lock().unwrap().remove(key);
    }

    /// Run an inbound request handler on its own task.
    ///
    /// The handler is registered in the running table before the task
    /// starts so a racing `notifications/cancelled` always finds it.
    /// An aborted handler produces no response frame at all.
    pub(crate) fn spawn_request_handler<F>(self: &Arc<Self>, id: MessageId, handler: F)
    where
        F: Future<Output = McpResult<Value>> + Send + 'static,
    {
        let key = id.to_string();
        let (abort, registration) = AbortHandle::new_pair();
        self.running.lock().unwrap().insert(key.clone(), abort);

        let core = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = Abortable::new(handler, registration).await;
            core.running.lock().unwrap().remove(&key);
            match outcome {
                Err(_) => {
                    debug!(session = %core.id, request = %key, "handler aborted by peer cancellation");
                }
                Ok(Ok(result)) => {
                    let _ = core.send_response(id, result).await;
                }
                Ok(Err(err)) => {
                    let _ = core.send_error(id, err.to_wire()).await;
                }
            }
        });
    }

    /// Cancel the running handler for `request_id`, if any.
    ///
    /// Late cancellations on completed requests are dropped silently;
    /// the reason stays opaque and is only logged.
    pub(crate) fn cancel_running(&self, request_id: &str, reason: &str) {
        let handle = self.running.lock().unwrap().remove(request_id);
        match handle {
            Some(abort) => {
                debug!(session = %self.id, request = %request_id, reason, "cancelling running handler");
                abort.abort();
            }
            None => {
                debug!(session = %self.id, request = %request_id, "dropping late cancellation");
            }
        }
    }

    /// Answer the keepalive probes and terminate the session when the
    /// peer goes silent for a full ping cycle.
    pub(crate) fn spawn_ping_loop(self: &Arc<Self>) {
        let sess = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(sess.timeouts.ping_interval);
            // The first tick of a tokio interval is immediate.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = sess.cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = sess.send_request(METHOD_PING, None).await {
                    warn!(session = %sess.id, error = %e, "ping failed, terminating session");
                    sess.terminate();
                    return;
                }
                debug!(session = %sess.id, "ping ok");
            }
        });
    }

    /// Collapse the session: cancel everything derived from the
    /// session context and queue the id for deregistration.
    pub(crate) fn terminate(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        for (_, abort) in self.running.lock().unwrap().drain() {
            abort.abort();
        }
        let _ = self.stop_tx.send(self.id.clone());
        debug!(session = %self.id, "session terminated");
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    use super::*;
    use crate::mcp::message::decode_message;

    fn test_core(
        writer: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> (Arc<SessionCore>, mpsc::UnboundedReceiver<String>) {
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let timeouts = SessionTimeouts {
            write_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(200),
            ping_interval: Duration::from_secs(60),
        };
        (
            Arc::new(SessionCore::new(
                "test-session".to_string(),
                writer,
                timeouts,
                stop_tx,
            )),
            stop_rx,
        )
    }

    #[tokio::test]
    async fn test_request_times_out_without_response() {
        let (tx, _rx) = duplex(4096);
        let (core, _stop) = test_core(Box::new(tx));

        let err = core.send_request("prompts/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout));
        assert!(core.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unblocks_waiter() {
        let (tx, _rx) = duplex(4096);
        let (core, mut stop) = test_core(Box::new(tx));

        let waiter = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.send_request("tools/call", None).await })
        };
        tokio::task::yield_now().await;
        core.terminate();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Cancelled));
        assert_eq!(stop.recv().await.unwrap(), "test-session");
    }

    #[tokio::test]
    async fn test_response_resolves_waiter() {
        let (tx, rx) = duplex(4096);
        let (core, _stop) = test_core(Box::new(tx));

        let responder = {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                let mut lines = BufReader::new(rx).lines();
                let line = lines.next_line().await.unwrap().unwrap();
                let request = decode_message(line.as_bytes()).unwrap();
                core.deliver_response(JsonRpcMessage::success(
                    request.id.unwrap(),
                    serde_json::json!({"ok": true}),
                ));
            })
        };

        let result = core.send_request("ping", None).await.unwrap();
        assert_eq!(result["ok"], true);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let (tx, _rx) = duplex(4096);
        let (core, _stop) = test_core(Box::new(tx));
        // Must not panic or disturb unrelated state.
        core.deliver_response(JsonRpcMessage::success(
            MessageId::from("nobody-waits-for-this"),
            Value::Null,
        ));
        assert!(core.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_running_aborts_handler() {
        let (tx, _rx) = duplex(4096);
        let (core, _stop) = test_core(Box::new(tx));

        let (started_tx, started_rx) = oneshot::channel::<()>();
        core.spawn_request_handler(MessageId::from("t"), async move {
            let _ = started_tx.send(());
            time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        });
        started_rx.await.unwrap();
        core.cancel_running("t", "user");

        time::sleep(Duration::from_millis(50)).await;
        assert!(core.running.lock().unwrap().is_empty());
    }
}
