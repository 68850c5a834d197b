//! Socket Manager
//!
//! Single responsibility: Own one WebSocket connection at a time, from dial to
//! teardown, and serialize every write that goes out on it.
//!
//! # Locks
//!
//! Two independent locks, never merged:
//!
//! - the state lock guards connect, disconnect and the listener swap
//! - the write lock guards every physical write, ordinary frames and the close frame
//!
//! `send()` only ever takes the write lock, so a handler blocked on a slow write
//! cannot keep `stop()` from inspecting the connection state. Teardown never
//! takes the write lock to unhook a connection: it flags the connection as
//! closing, which makes any write still waiting on it fail with `NotConnected`.
//!
//! # Teardown
//!
//! `stop()` is the single teardown path. The listener's teardown callback calls
//! back into it when the read loop exits on its own, so a peer closing the
//! connection and a caller stopping the manager converge on the same transition.
//! Each connection carries a generation number so a late callback from an old
//! listener can never tear down a newer connection.

use async_trait::async_trait;
use futures_util::{FutureExt, SinkExt};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info_span, trace, warn, Instrument, Span};

use super::listener::{Dispatch, DispatchMode, Listener, OnClose};
use super::transport::{self, WsSink};
use crate::config::ManagerConfig;
use crate::error::{Result, SocketError};

/// Application callback for inbound frames.
///
/// Every frame is handled on its own task, so implementations must tolerate
/// concurrent calls arriving in any order.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn handle(&self, frame: Vec<u8>, sender: FrameSender);
}

#[async_trait]
impl<F, Fut> FrameHandler for F
where
    F: Fn(Vec<u8>, FrameSender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, frame: Vec<u8>, sender: FrameSender) {
        (self)(frame, sender).await
    }
}

/// Write half of one connection. The mutex around the sink is the write lock.
struct Connection {
    sink: Mutex<WsSink>,
    closing: watch::Sender<bool>,
}

impl Connection {
    fn new(sink: WsSink) -> Self {
        Self {
            sink: Mutex::new(sink),
            closing: watch::channel(false).0,
        }
    }

    /// Write one frame, giving up as soon as teardown starts closing this connection.
    async fn write(&self, uri: &str, frame: Vec<u8>) -> Result<()> {
        let mut closing = self.closing.subscribe();
        tokio::select! {
            biased;
            _ = closing.wait_for(|closing| *closing) => {
                Err(SocketError::NotConnected(uri.to_string()))
            }
            written = async move {
                let mut sink = self.sink.lock().await;
                transport::write_frame(&mut *sink, frame).await
            } => written,
        }
    }

    async fn write_close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        transport::write_close(&mut *sink).await
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "closing local connection");
        }
    }
}

/// Write path shared by the manager and every `FrameSender`.
///
/// The current connection is swapped without touching its write lock, so a
/// write stuck on a peer that stopped reading never holds up teardown or the
/// next `start()`.
struct Writer {
    uri: String,
    current: RwLock<Option<Arc<Connection>>>,
}

impl Writer {
    async fn current(&self) -> Option<Arc<Connection>> {
        self.current.read().await.clone()
    }

    async fn send(&self, frame: Vec<u8>) -> Result<()> {
        let Some(connection) = self.current().await else {
            let err = SocketError::NotConnected(self.uri.clone());
            warn!(error = %err, "send rejected");
            return Err(err);
        };

        connection.write(&self.uri, frame).await.inspect_err(|e| {
            warn!(error = %e, "send failed");
        })
    }

    async fn send_close(&self) -> Result<()> {
        let Some(connection) = self.current().await else {
            let err = SocketError::NotConnected(self.uri.clone());
            warn!(error = %err, "connection is undefined. Is the SocketManager started?");
            return Err(err);
        };

        connection.write_close().await.inspect_err(|e| {
            warn!(error = %e, "close frame not written");
        })?;
        debug!("sent websocket close message");
        Ok(())
    }

    async fn install(&self, sink: WsSink) {
        *self.current.write().await = Some(Arc::new(Connection::new(sink)));
    }

    /// Unhook the current connection: new sends fail with `NotConnected` and
    /// writes already waiting on it give up.
    async fn detach(&self) -> Option<Arc<Connection>> {
        let connection = self.current.write().await.take();
        if let Some(connection) = &connection {
            connection.closing.send_replace(true);
        }
        connection
    }
}

/// Cloneable handle that writes frames through the manager's write lock.
///
/// Handed to every handler invocation. It stays bound to the manager, not to
/// one connection: after a reconnect it writes to the new connection.
#[derive(Clone)]
pub struct FrameSender {
    writer: Arc<Writer>,
}

impl FrameSender {
    pub async fn send(&self, frame: impl Into<Vec<u8>>) -> Result<()> {
        self.writer.send(frame.into()).await
    }
}

impl std::fmt::Debug for FrameSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSender")
            .field("uri", &self.writer.uri)
            .finish()
    }
}

/// Completion signal returned by `SocketManager::start()`.
///
/// Fires once, when the connection it was issued for is torn down, whichever
/// side initiated it. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Wait until the connection has ended.
    pub async fn stopped(&mut self) {
        // An error means the manager itself was dropped, which also ends the connection
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

struct ActiveListener {
    task: JoinHandle<()>,
    closed: oneshot::Receiver<()>,
}

/// Everything that exists only while a connection is up.
struct Active {
    generation: u64,
    listener: Option<ActiveListener>,
    stopped: watch::Sender<bool>,
}

#[derive(Default)]
struct State {
    active: Option<Active>,
    generation: u64,
}

struct Inner {
    config: ManagerConfig,
    handler: Arc<dyn FrameHandler>,
    state: Mutex<State>,
    writer: Arc<Writer>,
    span: Span,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(active) = self.state.get_mut().active.take() {
            if let Some(listener) = active.listener {
                listener.task.abort();
            }
            if let Ok(mut current) = self.writer.current.try_write() {
                if let Some(connection) = current.take() {
                    connection.closing.send_replace(true);
                }
            }
            active.stopped.send_replace(true);
            debug!("SocketManager dropped while running, listener aborted");
        }
    }
}

/// Manages the lifecycle of one WebSocket connection.
///
/// Cheap to clone; clones share the same connection. A manager can be
/// started and stopped any number of times.
#[derive(Clone)]
pub struct SocketManager {
    inner: Arc<Inner>,
}

impl SocketManager {
    /// Create a manager for `config.connection_uri`. Nothing is dialed until `start()`.
    ///
    /// `parent` is the span the manager logs under.
    pub fn new(config: ManagerConfig, handler: impl FrameHandler, parent: &Span) -> Result<Self> {
        config.validate()?;

        let span = info_span!(
            parent: parent,
            "socket_manager",
            component = "SocketManager",
            uri = %config.connection_uri
        );
        let writer = Arc::new(Writer {
            uri: config.connection_uri.clone(),
            current: RwLock::new(None),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                handler: Arc::new(handler),
                state: Mutex::new(State::default()),
                writer,
                span,
            }),
        })
    }

    pub fn uri(&self) -> &str {
        &self.inner.config.connection_uri
    }

    /// Dial the peer and start listening.
    ///
    /// Returns the completion signal for the new connection. If a connection is
    /// already up it is left untouched and `Ok(None)` is returned: callers that
    /// need to learn when that connection ends must keep the signal from the
    /// `start()` that opened it.
    pub async fn start(&self) -> Result<Option<StopSignal>> {
        let span = self.inner.span.clone();
        self.start_inner().instrument(span).await
    }

    async fn start_inner(&self) -> Result<Option<StopSignal>> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        debug!("starting SocketManager");

        if state.active.is_some() {
            warn!(
                uri = %inner.config.connection_uri,
                "connection to websocket already established. Resuming..."
            );
            return Ok(None);
        }

        let (sink, stream) = transport::connect(&inner.config.connection_uri)
            .await
            .inspect_err(|e| warn!(error = %e, "failed to open connection"))?;
        debug!(uri = %inner.config.connection_uri, "successfully opened connection");

        inner.writer.install(sink).await;

        state.generation += 1;
        let generation = state.generation;

        let built = Listener::builder()
            .stream(stream)
            .handler(self.dispatch())
            .on_close(teardown_callback(Arc::downgrade(inner), generation))
            .span(inner.span.clone())
            .dispatch(DispatchMode::from_limit(inner.config.max_in_flight_handlers))
            .build();

        let (listener, closed) = match built {
            Ok(built) => built,
            Err(e) => {
                warn!(error = %e, "failed to initiate the socketListener");
                // Undo the dial
                if let Some(connection) = inner.writer.detach().await {
                    let close = connection.close();
                    let _ = tokio::time::timeout(inner.config.shutdown_timeout(), close).await;
                }
                return Err(e);
            }
        };

        let task = tokio::spawn(listener.listen());
        let (stopped, stopped_rx) = watch::channel(false);

        state.active = Some(Active {
            generation,
            listener: Some(ActiveListener { task, closed }),
            stopped,
        });

        debug!(generation, "started SocketManager");
        Ok(Some(StopSignal { rx: stopped_rx }))
    }

    /// Tear the connection down. A no-op when not running.
    ///
    /// Never fails: problems during teardown are logged and the sequence carries on.
    pub async fn stop(&self) {
        let span = self.inner.span.clone();
        self.inner.stop_generation(None).instrument(span).await
    }

    /// Write one frame to the peer.
    pub async fn send(&self, frame: impl Into<Vec<u8>>) -> Result<()> {
        self.inner.writer.send(frame.into()).await
    }

    /// Handle bound to this manager's write path.
    pub fn sender(&self) -> FrameSender {
        FrameSender {
            writer: Arc::clone(&self.inner.writer),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.active.is_some()
    }

    fn dispatch(&self) -> Dispatch {
        let handler = Arc::clone(&self.inner.handler);
        let sender = self.sender();
        Arc::new(move |frame: Vec<u8>| {
            let handler = Arc::clone(&handler);
            let sender = sender.clone();
            async move { handler.handle(frame, sender).await }.boxed()
        })
    }
}

/// Listener teardown callback: stop the manager, but only the connection the
/// listener was created for.
fn teardown_callback(inner: Weak<Inner>, generation: u64) -> OnClose {
    Box::new(move || {
        async move {
            if let Some(inner) = inner.upgrade() {
                let span = inner.span.clone();
                inner.stop_generation(Some(generation)).instrument(span).await;
            }
        }
        .boxed()
    })
}

impl Inner {
    /// Run the shutdown sequence if a connection is active (and, when
    /// `generation` is given, only if it is that connection).
    async fn stop_generation(&self, generation: Option<u64>) {
        let mut state = self.state.lock().await;

        debug!("stopping SocketManager");

        let matches = match (&state.active, generation) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(active), Some(generation)) => active.generation == generation,
        };
        if !matches {
            trace!(?generation, "nothing to stop");
            return;
        }

        if let Some(active) = state.active.take() {
            // From the listener's own callback the read loop is already over
            self.self_destruct(active, generation.is_none()).await;
        }

        debug!("stopped SocketManager");
    }

    /// Close everything belonging to `active`. Called with the state lock held.
    ///
    /// Every step shares one deadline, so the whole sequence is bounded by the
    /// shutdown timeout.
    async fn self_destruct(&self, active: Active, abort_listener_on_timeout: bool) {
        let timeout = self.config.shutdown_timeout();
        let deadline = Instant::now() + timeout;

        debug!(generation = active.generation, "selfDestructing");

        if let Some(ActiveListener { task, closed }) = active.listener {
            trace!("sending close signal on socket and waiting for confirmation");

            let handshake = async {
                // Failure is logged by the writer; the wait below still applies
                let _ = self.writer.send_close().await;
                let _ = closed.await;
            };

            match tokio::time::timeout_at(deadline, handshake).await {
                Ok(()) => debug!("underlying connection closed"),
                Err(_) => {
                    debug!(
                        ?timeout,
                        "timed-out on waiting for underlying connection to close"
                    );
                    // Dropping the read half is the only way to unblock the pending read
                    if abort_listener_on_timeout {
                        task.abort();
                    }
                }
            }

            trace!("removing socketListener");
        }

        trace!("closing local connection");
        if let Some(connection) = self.writer.detach().await {
            if tokio::time::timeout_at(deadline, connection.close()).await.is_err() {
                // The sink is dropped with the last handle to the connection
                error!(?timeout, "timed-out closing the local connection");
            }
        }

        trace!("closing channel to indicate upstream that closed");
        active.stopped.send_replace(true);

        debug!("selfDestructed");
    }
}
