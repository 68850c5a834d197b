//! Socket Listener
//!
//! Single responsibility: Read frames off one connection and hand each one to a
//! dispatch callback on its own task.
//!
//! The listener decodes nothing. When the read loop ends, for whatever reason,
//! it fires its closed signal exactly once and then runs the optional teardown
//! callback. `SocketManager` passes its own `stop()` as that callback, so a peer
//! closing the connection tears the manager down the same way a caller would.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info_span, trace, warn, Instrument, Span};

use super::transport::{read_frame, WsStream};
use crate::error::{Result, SocketError};

/// Callback invoked with the raw bytes of every inbound frame.
pub type Dispatch = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback invoked once after the read loop exits.
pub type OnClose = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// How inbound frames are scheduled onto tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// One task per frame, no limit on how many run at once.
    #[default]
    Unbounded,
    /// At most `n` dispatches in flight; the read loop waits for a free slot.
    Bounded(usize),
}

impl DispatchMode {
    pub fn from_limit(limit: Option<usize>) -> Self {
        match limit {
            Some(n) => Self::Bounded(n),
            None => Self::Unbounded,
        }
    }
}

/// Builder for `Listener`.
///
/// The stream, handler and span are required; the teardown callback is not.
#[derive(Default)]
pub struct ListenerBuilder {
    stream: Option<WsStream>,
    dispatch: Option<Dispatch>,
    span: Option<Span>,
    on_close: Option<OnClose>,
    mode: DispatchMode,
}

impl ListenerBuilder {
    pub fn stream(mut self, stream: WsStream) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn handler(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Parent span for everything the listener logs.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn on_close(mut self, on_close: OnClose) -> Self {
        self.on_close = Some(on_close);
        self
    }

    pub fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Build the listener and the receiving end of its closed signal.
    pub fn build(self) -> Result<(Listener, oneshot::Receiver<()>)> {
        let stream = self.stream.ok_or_else(|| {
            SocketError::InvalidConfiguration("websocket connection cannot be undefined".into())
        })?;
        let dispatch = self.dispatch.ok_or_else(|| {
            SocketError::InvalidConfiguration("processing function needs to be defined".into())
        })?;
        let parent = self.span.ok_or_else(|| {
            SocketError::InvalidConfiguration("logger needs to be defined".into())
        })?;
        if self.mode == DispatchMode::Bounded(0) {
            return Err(SocketError::InvalidConfiguration(
                "bounded dispatch needs at least one slot".into(),
            ));
        }

        let (closed_tx, closed_rx) = oneshot::channel();
        let span = info_span!(parent: &parent, "listener", component = "SocketListener");

        let listener = Listener {
            stream,
            dispatch,
            on_close: self.on_close,
            mode: self.mode,
            closed_tx,
            span,
        };
        Ok((listener, closed_rx))
    }
}

/// Read loop over one connection.
pub struct Listener {
    stream: WsStream,
    dispatch: Dispatch,
    on_close: Option<OnClose>,
    mode: DispatchMode,
    closed_tx: oneshot::Sender<()>,
    span: Span,
}

impl Listener {
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::default()
    }

    /// Run the read loop until the connection closes.
    ///
    /// Consumes the listener: the closed signal and the teardown callback can
    /// only fire once.
    pub async fn listen(self) {
        let span = self.span.clone();
        self.run().instrument(span).await
    }

    async fn run(mut self) {
        if self.on_close.is_some() {
            trace!("socketListener instructed to call function when shutting down");
        }

        let slots = match self.mode {
            DispatchMode::Bounded(n) => Some(Arc::new(Semaphore::new(n))),
            DispatchMode::Unbounded => None,
        };

        while let Some(frame) = read_frame(&mut self.stream).await {
            trace!(frame = %String::from_utf8_lossy(&frame), "recv");

            let fut = (self.dispatch)(frame);
            match &slots {
                None => {
                    tokio::spawn(fut.instrument(Span::current()));
                }
                Some(slots) => {
                    let permit = match Arc::clone(slots).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            warn!(error = %e, "dispatch slots closed");
                            break;
                        }
                    };
                    tokio::spawn(
                        async move {
                            fut.await;
                            drop(permit);
                        }
                        .instrument(Span::current()),
                    );
                }
            }
        }

        // The receiver may already be gone if the manager timed out waiting
        let _ = self.closed_tx.send(());
        debug!("socketListener shut down");

        if let Some(on_close) = self.on_close.take() {
            on_close().await;
        }
    }
}
