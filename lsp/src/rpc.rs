//! JSON-RPC session over a [`DuplexTransport`].
//!
//! One reader task demultiplexes inbound frames for the life of the
//! connection; one writer task serializes outbound frames. Callers of
//! [`Connection::call`] and [`Connection::notify`] run on their own tasks and
//! only meet the background tasks through channels and the pending map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{FrameError, FrameReader, FrameWriter};
use crate::error::RpcError;
use crate::protocol::{INTERNAL_ERROR, Notification, Request, Response, ResponseError};
use crate::transport::{DuplexTransport, TransportReader, TransportWriter};

const WRITER_CHANNEL_CAPACITY: usize = 64;

/// How long `close` waits for the writer to flush before dropping the pipe.
const WRITER_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// A request or notification the peer sent us.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// `None` for notifications.
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

impl InboundMessage {
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.id.is_some()
    }
}

/// What a handler did with an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Handled(Value),
    Failed(ResponseError),
    /// The method is not supported. Requests are answered with
    /// `Method not found`; this is expected traffic, not an error.
    NotHandled,
}

/// Receives unsolicited requests and notifications from the peer.
///
/// Runs on the reader task, so implementations must not block.
pub trait InboundHandler: Send + Sync {
    fn handle(&self, message: &InboundMessage) -> HandlerOutcome;
}

/// Logs every inbound message and handles none of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl InboundHandler for LoggingHandler {
    fn handle(&self, message: &InboundMessage) -> HandlerOutcome {
        if message.method == "window/logMessage"
            && let Some(text) = message
                .params
                .as_ref()
                .and_then(|p| p.get("message"))
                .and_then(Value::as_str)
        {
            tracing::debug!("Analyzer log: {text}");
        } else {
            tracing::debug!(
                method = %message.method,
                request = message.is_request(),
                "Received from analyzer"
            );
        }
        HandlerOutcome::NotHandled
    }
}

/// An inbound frame that fits none of the JSON-RPC shapes we understand.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ProtocolError {
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("response id {0} was not issued by this client")]
    ForeignId(Value),
    #[error("frame has neither a method nor a result/error")]
    UnknownShape,
}

#[derive(Debug)]
enum IncomingFrame {
    Response {
        id: u64,
        outcome: Result<Value, ResponseError>,
    },
    Request(InboundMessage),
    Notification(InboundMessage),
}

fn parse_incoming(frame: &Value) -> Result<IncomingFrame, ProtocolError> {
    let obj = frame.as_object().ok_or(ProtocolError::NotAnObject)?;
    let id = obj.get("id").filter(|v| !v.is_null());
    let method = obj.get("method").and_then(Value::as_str);
    let result = obj.get("result");
    let error = obj.get("error").filter(|v| !v.is_null());

    match (id, method) {
        (Some(id), None) if result.is_some() || error.is_some() => {
            let id = id
                .as_u64()
                .ok_or_else(|| ProtocolError::ForeignId(id.clone()))?;
            let outcome = match error {
                Some(err) => Err(serde_json::from_value::<ResponseError>(err.clone())
                    .unwrap_or_else(|_| ResponseError::new(INTERNAL_ERROR, err.to_string()))),
                None => Ok(result.cloned().unwrap_or(Value::Null)),
            };
            Ok(IncomingFrame::Response { id, outcome })
        }
        (id, Some(method)) => {
            let message = InboundMessage {
                id: id.cloned(),
                method: method.to_string(),
                params: obj.get("params").cloned(),
            };
            if message.is_request() {
                Ok(IncomingFrame::Request(message))
            } else {
                Ok(IncomingFrame::Notification(message))
            }
        }
        _ => Err(ProtocolError::UnknownShape),
    }
}

enum WriterCommand {
    Send {
        frame: Value,
        ack: Option<oneshot::Sender<Result<(), String>>>,
    },
    Close,
}

struct PendingCall {
    method: String,
    reply: oneshot::Sender<Result<Value, RpcError>>,
}

/// Outstanding calls keyed by id, plus the flag that stops new insertions
/// once the connection can no longer deliver responses.
#[derive(Default)]
struct PendingCalls {
    calls: HashMap<u64, PendingCall>,
    closed: bool,
}

impl PendingCalls {
    fn insert(&mut self, id: u64, call: PendingCall) -> Result<(), RpcError> {
        if self.closed {
            return Err(RpcError::Closed);
        }
        self.calls.insert(id, call);
        Ok(())
    }

    /// Refuse new calls and fail every outstanding one.
    fn close_with(&mut self, reason: impl Fn() -> RpcError) {
        self.closed = true;
        for (_, call) in self.calls.drain() {
            let _ = call.reply.send(Err(reason()));
        }
    }
}

type SharedPending = Arc<Mutex<PendingCalls>>;

fn lock(pending: &SharedPending) -> MutexGuard<'_, PendingCalls> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a call's pending entry when the call future finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a SharedPending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).calls.remove(&self.id);
    }
}

/// A live JSON-RPC session bound to one transport.
pub struct Connection {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: SharedPending,
    next_id: AtomicU64,
    cancel_tx: watch::Sender<bool>,
    stop_reader_tx: watch::Sender<bool>,
    default_timeout: Duration,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl Connection {
    /// Start the reader and writer tasks. Must be called inside a Tokio runtime.
    pub fn new<R, W>(
        transport: DuplexTransport<R, W>,
        handler: Arc<dyn InboundHandler>,
        default_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = transport.into_split();
        let pending: SharedPending = Arc::default();
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let (cancel_tx, _) = watch::channel(false);
        let (stop_reader_tx, stop_reader_rx) = watch::channel(false);

        let writer_handle = tokio::spawn(write_loop(FrameWriter::new(writer), writer_rx));
        let reader_handle = tokio::spawn(read_loop(
            FrameReader::new(reader),
            pending.clone(),
            writer_tx.clone(),
            handler,
            stop_reader_rx,
        ));

        Self {
            writer_tx,
            pending,
            next_id: AtomicU64::new(1),
            cancel_tx,
            stop_reader_tx,
            default_timeout,
            tasks: Mutex::new(Some((reader_handle, writer_handle))),
        }
    }

    /// Issue a request and wait for its response under the default timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.call_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// Issue a request and wait at most `timeout` for its response.
    ///
    /// The pending entry is removed on every exit path, including when the
    /// returned future is dropped. A response that arrives after that is
    /// discarded by the reader.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_value(Request::new(id, method, params)).map_err(|source| {
            RpcError::Serialize {
                method: method.to_string(),
                source,
            }
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(
            id,
            PendingCall {
                method: method.to_string(),
                reply: reply_tx,
            },
        )?;
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let mut cancelled = self.cancel_tx.subscribe();
        let exchange = async {
            self.send(frame).await?;
            tokio::select! {
                reply = reply_rx => reply.unwrap_or(Err(RpcError::Closed)),
                _ = cancelled.wait_for(|c| *c) => Err(RpcError::Cancelled {
                    method: method.to_string(),
                }),
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                method: method.to_string(),
                after: timeout,
            }),
        }
    }

    /// Send a notification. Nothing is awaited beyond the write itself.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        let frame = serde_json::to_value(Notification::new(method, params)).map_err(|source| {
            RpcError::Serialize {
                method: method.to_string(),
                source,
            }
        })?;
        self.send(frame).await
    }

    async fn send(&self, frame: Value) -> Result<(), RpcError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.writer_tx
            .send(WriterCommand::Send {
                frame,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| RpcError::Closed)?;
        match ack_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RpcError::Transport(e)),
            Err(_) => Err(RpcError::Closed),
        }
    }

    /// Fail every in-flight call with [`RpcError::Cancelled`] and make later
    /// calls fail the same way. The pipes stay open.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Release both pipes and stop the background tasks. Idempotent.
    ///
    /// Outstanding calls fail with [`RpcError::Closed`]. The process on the
    /// other end is not signalled or waited on.
    pub async fn close(&self) {
        let Some((reader, mut writer)) = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        lock(&self.pending).close_with(|| RpcError::Closed);

        // A full queue means the writer is stuck on a peer that stopped
        // reading; drop the pipe instead of waiting behind it.
        if self.writer_tx.try_send(WriterCommand::Close).is_err() {
            writer.abort();
        }
        if tokio::time::timeout(WRITER_CLOSE_GRACE, &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }

        self.stop_reader_tx.send_replace(true);
        if let Err(e) = reader.await
            && !e.is_cancelled()
        {
            tracing::warn!("Reader task ended abnormally: {e}");
        }
    }

    /// Whether the connection stopped accepting calls.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }

    /// Number of calls still waiting for a response.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).calls.len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some((reader, writer)) = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
            writer.abort();
        }
    }
}

async fn write_loop<W>(
    mut writer: FrameWriter<TransportWriter<W>>,
    mut rx: mpsc::Receiver<WriterCommand>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCommand::Send { frame, ack } => {
                let result = writer.write_frame(&frame).await.map_err(|e| e.to_string());
                if let Err(e) = &result {
                    tracing::warn!("Analyzer write error: {e}");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            WriterCommand::Close => break,
        }
    }
    if let Err(e) = writer.get_mut().close().await {
        tracing::debug!("Closing analyzer input: {e}");
    }
}

async fn read_loop<R>(
    mut reader: FrameReader<TransportReader<R>>,
    pending: SharedPending,
    writer_tx: mpsc::Sender<WriterCommand>,
    handler: Arc<dyn InboundHandler>,
    mut stop: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let failure = loop {
        let next: Result<Option<Value>, FrameError> = tokio::select! {
            biased;
            _ = stop.wait_for(|s| *s) => break None,
            next = reader.read_frame() => next,
        };
        match next {
            Ok(Some(frame)) => {
                dispatch_frame(&frame, &pending, &writer_tx, handler.as_ref());
            }
            Ok(None) => {
                tracing::info!("Analyzer closed its output");
                break Some(String::from("analyzer closed the connection"));
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!("Dropping malformed frame from analyzer: {e}");
            }
            Err(e) => {
                tracing::warn!("Analyzer read error: {e}");
                break Some(e.to_string());
            }
        }
    };

    match failure {
        Some(reason) => lock(&pending).close_with(|| RpcError::Transport(reason.clone())),
        None => lock(&pending).close_with(|| RpcError::Closed),
    }
}

/// Never waits on the writer: a full queue drops the reply instead of
/// stalling the loop that drains the analyzer's stdout.
fn dispatch_frame(
    frame: &Value,
    pending: &SharedPending,
    writer_tx: &mpsc::Sender<WriterCommand>,
    handler: &dyn InboundHandler,
) {
    let incoming = match parse_incoming(frame) {
        Ok(incoming) => incoming,
        Err(e) => {
            tracing::warn!("Dropping frame from analyzer: {e}");
            return;
        }
    };

    match incoming {
        IncomingFrame::Response { id, outcome } => {
            let call = lock(pending).calls.remove(&id);
            match call {
                Some(call) => {
                    let result = outcome.map_err(|error| RpcError::Response {
                        method: call.method,
                        error,
                    });
                    let _ = call.reply.send(result);
                }
                None => {
                    tracing::debug!(id, "Discarding response for unknown or abandoned call");
                }
            }
        }
        IncomingFrame::Request(message) => {
            let id = message.id.clone().unwrap_or(Value::Null);
            let response = match handler.handle(&message) {
                HandlerOutcome::Handled(result) => Response::success(id, result),
                HandlerOutcome::Failed(error) => Response::failure(id, error),
                HandlerOutcome::NotHandled => {
                    Response::failure(id, ResponseError::method_not_found(&message.method))
                }
            };
            match serde_json::to_value(&response) {
                Ok(frame) => match writer_tx.try_send(WriterCommand::Send { frame, ack: None }) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(method = %message.method, "Writer queue full, dropping reply");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(method = %message.method, "Writer gone, dropping reply");
                    }
                },
                Err(e) => tracing::warn!("Cannot serialize reply to {}: {e}", message.method),
            }
        }
        IncomingFrame::Notification(message) => {
            if let HandlerOutcome::Failed(error) = handler.handle(&message) {
                tracing::debug!(method = %message.method, "Notification handler failed: {error}");
            }
        }
    }
}
