//! JSON-RPC channel over a WebSocket stream.
//!
//! A [`Channel`] is a cheap, cloneable handle to one established connection.
//! It spawns an internal event loop task that handles:
//!
//! - Outgoing requests and notifications from the Rust API
//! - Request/response correlation by [`RequestId`]
//! - Dispatch of inbound notifications and requests to installed listeners
//! - The one-shot [`ClosedSignal`] fired when the loop ends
//! - The one-shot [`ListeningSignal`] fired when inbound dispatch begins
//!
//! # Deferred Listening
//!
//! Inbound frames are not read until [`Channel::start_listening`] is called,
//! so listeners installed right after admission never miss an early message.
//! Outgoing traffic works before that point.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};

use crate::disposable::Disposable;
use crate::error::{Error, Result};
use crate::identifiers::{ListenerId, RequestId};
use crate::options::ChannelOptions;
use crate::protocol::{Message, Notification, Request, Response, RpcError};

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Value>>>;

/// Callback for an inbound notification.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback answering an inbound request.
pub type RequestHandler = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

// ============================================================================
// ClosedSignal
// ============================================================================

/// One-shot notification that a channel has closed.
///
/// Fires exactly once, when the channel's event loop terminates. Cloning is
/// cheap; every clone observes the same signal.
#[derive(Clone)]
pub struct ClosedSignal {
    rx: watch::Receiver<bool>,
}

impl ClosedSignal {
    fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// Returns `true` once the channel has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until the channel has closed.
    ///
    /// Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // A dropped sender also means the event loop is gone.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for ClosedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosedSignal")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// ListeningSignal
// ============================================================================

/// One-shot notification that a channel started dispatching inbound
/// messages.
///
/// Lets a capability defer work until the engine has finished wiring every
/// pairing on the connection.
#[derive(Clone)]
pub struct ListeningSignal {
    rx: watch::Receiver<bool>,
    closed: ClosedSignal,
}

impl ListeningSignal {
    /// Returns `true` once the channel is listening.
    #[inline]
    #[must_use]
    pub fn is_listening(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until the channel is listening.
    ///
    /// Returns `false` if the channel closed before it ever listened.
    pub async fn wait(&self) -> bool {
        let mut rx = self.rx.clone();
        tokio::select! {
            biased;
            started = rx.wait_for(|listening| *listening) => started.is_ok(),
            () = self.closed.wait() => self.is_listening(),
        }
    }
}

impl fmt::Debug for ListeningSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListeningSignal")
            .field("listening", &self.is_listening())
            .finish()
    }
}

// ============================================================================
// Listeners
// ============================================================================

#[derive(Default)]
struct Listeners {
    notifications: FxHashMap<String, Vec<(ListenerId, NotificationHandler)>>,
    requests: FxHashMap<String, (ListenerId, RequestHandler)>,
}

impl Listeners {
    fn notification_handlers(&self, method: &str) -> Vec<NotificationHandler> {
        self.notifications
            .get(method)
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    fn request_handler(&self, method: &str) -> Option<RequestHandler> {
        self.requests.get(method).map(|(_, h)| Arc::clone(h))
    }

    fn remove_notification(&mut self, method: &str, id: ListenerId) {
        if let Some(entries) = self.notifications.get_mut(method) {
            entries.retain(|(listener_id, _)| *listener_id != id);
            if entries.is_empty() {
                self.notifications.remove(method);
            }
        }
    }

    fn remove_request(&mut self, method: &str, id: ListenerId) {
        if self
            .requests
            .get(method)
            .is_some_and(|(listener_id, _)| *listener_id == id)
        {
            self.requests.remove(method);
        }
    }

    fn len(&self) -> usize {
        self.notifications.values().map(Vec::len).sum::<usize>() + self.requests.len()
    }
}

// ============================================================================
// ChannelCommand
// ============================================================================

/// Internal commands for the event loop.
enum ChannelCommand {
    /// Send a request and wait for response.
    Request {
        request: Request,
        response_tx: oneshot::Sender<Result<Value>>,
    },
    /// Send a notification.
    Notify(Notification),
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Begin reading inbound frames.
    StartListening,
    /// Shutdown the channel.
    Shutdown,
}

// ============================================================================
// Shared
// ============================================================================

/// State shared between channel handles and the event loop.
struct Shared {
    correlation: Mutex<CorrelationMap>,
    listeners: Mutex<Listeners>,
    listening: watch::Sender<bool>,
}

// ============================================================================
// Channel
// ============================================================================

/// Bidirectional JSON-RPC channel to one peer.
///
/// # Thread Safety
///
/// `Channel` is `Send + Sync` and can be shared across tasks.
/// All operations except awaiting a request reply are non-blocking.
#[derive(Clone)]
pub struct Channel {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    /// Correlation map and listeners (shared with event loop).
    shared: Arc<Shared>,
    /// Fired when the event loop ends.
    closed: ClosedSignal,
    /// Request limits.
    options: ChannelOptions,
}

impl Channel {
    /// Creates a channel from a WebSocket stream.
    ///
    /// Spawns the event loop task internally, so this must be called from
    /// within a tokio runtime.
    pub fn new<S>(ws_stream: WebSocketStream<S>, options: ChannelOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed) = ClosedSignal::new();
        let shared = Arc::new(Shared {
            correlation: Mutex::new(CorrelationMap::default()),
            listeners: Mutex::new(Listeners::default()),
            listening: watch::Sender::new(false),
        });

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&shared),
            closed_tx,
        ));

        Self {
            command_tx,
            shared,
            closed,
            options,
        }
    }

    /// Returns the closed signal for this channel.
    #[inline]
    #[must_use]
    pub fn closed(&self) -> ClosedSignal {
        self.closed.clone()
    }

    /// Returns `true` once the channel has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    /// Returns `true` once [`start_listening`](Self::start_listening) was called.
    #[inline]
    #[must_use]
    pub fn is_listening(&self) -> bool {
        *self.shared.listening.borrow()
    }

    /// Returns a signal that fires once [`start_listening`](Self::start_listening)
    /// was called.
    #[must_use]
    pub fn listening(&self) -> ListeningSignal {
        ListeningSignal {
            rx: self.shared.listening.subscribe(),
            closed: self.closed(),
        }
    }

    /// Begins dispatching inbound messages to installed listeners.
    ///
    /// Only the first call has an effect.
    pub fn start_listening(&self) {
        if !self.shared.listening.send_replace(true) {
            let _ = self.command_tx.send(ChannelCommand::StartListening);
        }
    }

    /// Returns the number of installed listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.correlation.lock().len()
    }

    /// Installs a listener for an inbound notification method.
    ///
    /// Several listeners may share a method; each receives every
    /// notification. Disposing the result uninstalls this listener only.
    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F) -> Disposable
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let method = method.into();
        let id = ListenerId::next();

        self.shared
            .listeners
            .lock()
            .notifications
            .entry(method.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        trace!(%method, listener = %id, "Notification listener installed");

        let shared = Arc::downgrade(&self.shared);
        Disposable::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.listeners.lock().remove_notification(&method, id);
            }
        })
    }

    /// Installs the handler answering an inbound request method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateMethod`] if another handler already answers
    /// this method.
    pub fn on_request<F>(&self, method: impl Into<String>, handler: F) -> Result<Disposable>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let method = method.into();
        let id = ListenerId::next();

        {
            let mut listeners = self.shared.listeners.lock();
            if listeners.requests.contains_key(&method) {
                return Err(Error::duplicate_method(method));
            }
            listeners
                .requests
                .insert(method.clone(), (id, Arc::new(handler)));
        }

        trace!(%method, listener = %id, "Request handler installed");

        let shared = Arc::downgrade(&self.shared);
        Ok(Disposable::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.listeners.lock().remove_request(&method, id);
            }
        }))
    }

    /// Sends a notification to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the channel is closed.
    pub fn notify(&self, method: impl Into<String>, params: Value) -> Result<()> {
        self.command_tx
            .send(ChannelCommand::Notify(Notification::new(method, params)))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Sends a request and waits for the response with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the channel is closed
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::Remote`] if the peer answers with an error
    /// - [`Error::Protocol`] if too many requests are pending
    pub async fn request(&self, method: impl Into<String>, params: Value) -> Result<Value> {
        self.request_with_timeout(method, params, self.options.request_timeout)
            .await
    }

    /// Sends a request and waits for the response with a custom timeout.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn request_with_timeout(
        &self,
        method: impl Into<String>,
        params: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        let request = Request::new(method, params);
        let request_id = request.id;

        {
            let correlation = self.shared.correlation.lock();
            if correlation.len() >= self.options.max_pending_requests {
                warn!(
                    pending = correlation.len(),
                    max = self.options.max_pending_requests,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    self.options.max_pending_requests
                )));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ChannelCommand::Request {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(ChannelCommand::RemoveCorrelation(request_id));

                Err(Error::request_timeout(
                    request_id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Closes the channel.
    ///
    /// Pending requests fail with [`Error::ConnectionClosed`] and the closed
    /// signal fires. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ChannelCommand::Shutdown);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("listening", &self.is_listening())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Channel - Event Loop
// ============================================================================

impl Channel {
    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
        shared: Arc<Shared>,
        closed_tx: watch::Sender<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut listening = false;

        loop {
            tokio::select! {
                // Incoming messages from the peer
                message = ws_read.next(), if listening => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(reply) = Self::handle_incoming_message(&text, &shared)
                                && let Err(e) = Self::write_message(&mut ws_write, &reply).await
                            {
                                warn!(error = %e, "Failed to send reply");
                            }
                        }

                        Some(Ok(WsMessage::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(ChannelCommand::Request { request, response_tx }) => {
                            Self::handle_request_command(
                                request,
                                response_tx,
                                &mut ws_write,
                                &shared,
                            ).await;
                        }

                        Some(ChannelCommand::Notify(notification)) => {
                            let method = notification.method.clone();
                            let message = Message::Notification(notification);
                            if let Err(e) = Self::write_message(&mut ws_write, &message).await {
                                warn!(error = %e, %method, "Failed to send notification");
                            }
                        }

                        Some(ChannelCommand::RemoveCorrelation(request_id)) => {
                            shared.correlation.lock().remove(&request_id);
                            debug!(%request_id, "Removed timed-out correlation");
                        }

                        Some(ChannelCommand::StartListening) => {
                            trace!("Listening for inbound messages");
                            listening = true;
                        }

                        Some(ChannelCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        Self::fail_pending_requests(&shared);

        // Listener closures may capture capability state; release them now.
        let listeners = std::mem::take(&mut *shared.listeners.lock());
        drop(listeners);

        closed_tx.send_replace(true);

        debug!("Event loop terminated");
    }

    /// Handles an inbound text frame, returning a reply to write if any.
    fn handle_incoming_message(text: &str, shared: &Shared) -> Option<Message> {
        let message = match from_str::<Message>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse incoming message");
                return None;
            }
        };

        match message {
            Message::Response(response) => {
                let tx = shared.correlation.lock().remove(&response.id);

                if let Some(tx) = tx {
                    let _ = tx.send(response.into_result());
                } else {
                    warn!(id = %response.id, "Response for unknown request");
                }

                None
            }

            Message::Notification(notification) => {
                let handlers = shared
                    .listeners
                    .lock()
                    .notification_handlers(&notification.method);

                if handlers.is_empty() {
                    trace!(method = %notification.method, "No listener for notification");
                }

                for handler in handlers {
                    handler(notification.params.clone());
                }

                None
            }

            Message::Request(request) => {
                let handler = shared.listeners.lock().request_handler(&request.method);

                let response = match handler {
                    Some(handler) => match handler(request.params) {
                        Ok(result) => Response::success(request.id, result),
                        Err(e) => {
                            debug!(method = %request.method, error = %e, "Request handler failed");
                            Response::failure(request.id, RpcError::internal(&e))
                        }
                    },
                    None => {
                        debug!(method = %request.method, "No handler for request");
                        Response::failure(request.id, RpcError::method_not_found(&request.method))
                    }
                };

                Some(Message::Response(response))
            }
        }
    }

    /// Handles a request command from the Rust API.
    async fn handle_request_command<S>(
        request: Request,
        response_tx: oneshot::Sender<Result<Value>>,
        ws_write: &mut SplitSink<WebSocketStream<S>, WsMessage>,
        shared: &Shared,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request_id = request.id;

        let json = match to_string(&Message::Request(request)) {
            Ok(json) => json,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Store correlation before sending
        shared.correlation.lock().insert(request_id, response_tx);

        if let Err(e) = ws_write.send(WsMessage::Text(json.into())).await
            && let Some(tx) = shared.correlation.lock().remove(&request_id)
        {
            let _ = tx.send(Err(Error::connection(e.to_string())));
        }

        trace!(%request_id, "Request sent");
    }

    /// Serializes and writes one message.
    async fn write_message<S>(
        ws_write: &mut SplitSink<WebSocketStream<S>, WsMessage>,
        message: &Message,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let json = to_string(message)?;
        ws_write.send(WsMessage::Text(json.into())).await?;
        Ok(())
    }

    /// Fails all pending requests with ConnectionClosed error.
    fn fail_pending_requests(shared: &Shared) {
        let pending: Vec<_> = shared.correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
