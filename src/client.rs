//! Nym Client
//!
//! Single responsibility: Speak envelopes instead of raw frames.
//!
//! `NymClient` wraps a `SocketManager`. Inbound frames are decoded before the
//! application sees them; outbound envelopes are encoded before they reach
//! the manager's write path.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  NymClient                   │
//! │  - decodes inbound frames (inbound registry) │
//! │  - answers start() with the self address     │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │                SocketManager                 │
//! │  - connection lifecycle, write lock          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Replies are correlated mechanically: `Received::reply()` copies the sender
//! tag, and routing it back is the Nym client's job. Nothing here times out or
//! retries an application send.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

use crate::config::ManagerConfig;
use crate::error::{Result, SocketError};
use crate::protocol::{Envelope, Received};
use crate::socket::{FrameHandler, FrameSender, SocketManager, StopSignal};

/// Application callback for messages received through the mixnet.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, received: Received, sender: EnvelopeSender);
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Received, EnvelopeSender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, received: Received, sender: EnvelopeSender) {
        (self)(received, sender).await
    }
}

/// Encodes envelopes and writes them through the manager.
#[derive(Debug, Clone)]
pub struct EnvelopeSender {
    frames: FrameSender,
}

impl EnvelopeSender {
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.encode()?;
        trace!(envelope = %envelope, "send");
        self.frames.send(frame).await
    }
}

/// Decodes frames before handing them to the application.
struct Inbound {
    handler: Arc<dyn MessageHandler>,
    self_address: Arc<watch::Sender<Option<String>>>,
}

#[async_trait]
impl FrameHandler for Inbound {
    async fn handle(&self, frame: Vec<u8>, sender: FrameSender) {
        match Envelope::decode_inbound(&frame) {
            Ok(Envelope::Received(received)) => {
                trace!(
                    sender_tag = %received.sender_tag,
                    message = %received.message,
                    "received"
                );
                self.handler
                    .handle(received, EnvelopeSender { frames: sender })
                    .await;
            }
            Ok(Envelope::SelfAddressReply(reply)) => {
                debug!(address = %reply.address, "self address received");
                self.self_address.send_replace(Some(reply.address));
            }
            Ok(Envelope::Error(error)) => {
                warn!(error = %error.message, "Nym client reported an error");
            }
            Ok(other) => {
                debug!(envelope = %other, "ignoring unexpected envelope");
            }
            Err(e) => {
                warn!(error = %e, frame = %String::from_utf8_lossy(&frame), "failed to decode frame");
            }
        }
    }
}

/// Envelope-level client for a local Nym client.
#[derive(Clone)]
pub struct NymClient {
    manager: SocketManager,
    self_address: Arc<watch::Sender<Option<String>>>,
    self_address_timeout: Duration,
    span: Span,
}

impl NymClient {
    /// Create a client. Nothing is dialed until `start()`.
    pub fn new(config: ManagerConfig, handler: impl MessageHandler, parent: &Span) -> Result<Self> {
        config.validate()?;

        let span = info_span!(parent: parent, "nym_client", component = "NymClient");
        let (self_address, _) = watch::channel(None);
        let self_address = Arc::new(self_address);

        let inbound = Inbound {
            handler: Arc::new(handler),
            self_address: Arc::clone(&self_address),
        };
        let self_address_timeout = config.self_address_timeout();
        let manager = SocketManager::new(config, inbound, &span)?;

        Ok(Self {
            manager,
            self_address,
            self_address_timeout,
            span,
        })
    }

    /// Connect and learn our own Nym address.
    ///
    /// Same contract as `SocketManager::start()`. In addition, a freshly opened
    /// connection is only reported once the Nym client has answered the
    /// self address request; if it does not answer in time the connection is
    /// stopped again and `SocketError::Timeout` is returned.
    pub async fn start(&self) -> Result<Option<StopSignal>> {
        let span = self.span.clone();
        self.start_inner().instrument(span).await
    }

    async fn start_inner(&self) -> Result<Option<StopSignal>> {
        let Some(stopped) = self.manager.start().await? else {
            return Ok(None);
        };

        self.self_address.send_replace(None);
        let mut address = self.self_address.subscribe();

        if let Err(e) = self.send(&Envelope::self_address_request()).await {
            self.manager.stop().await;
            return Err(e);
        }

        let reply = tokio::time::timeout(self.self_address_timeout, async {
            address
                .wait_for(Option::is_some)
                .await
                .map(|address| (*address).clone())
        })
        .await;

        match reply {
            Ok(Ok(Some(address))) => {
                info!(client_id = %address, "connected to Nym client");
                Ok(Some(stopped))
            }
            Ok(_) => {
                self.manager.stop().await;
                Err(SocketError::Internal("self address channel closed".into()))
            }
            Err(_) => {
                warn!(timeout = ?self.self_address_timeout, "no self address reply");
                self.manager.stop().await;
                Err(SocketError::Timeout(format!(
                    "no selfAddress reply from {} within {:?}",
                    self.manager.uri(),
                    self.self_address_timeout
                )))
            }
        }
    }

    pub async fn stop(&self) {
        self.manager.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.manager.is_running().await
    }

    /// Encode `envelope` and write it to the Nym client.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.sender().send(envelope).await
    }

    pub fn sender(&self) -> EnvelopeSender {
        EnvelopeSender {
            frames: self.manager.sender(),
        }
    }

    /// Our Nym address, as reported during the last successful `start()`.
    pub fn client_id(&self) -> Option<String> {
        self.self_address.borrow().clone()
    }

    /// Gateway our Nym client is connected to: the part of `client_id()` after `@`.
    pub fn gateway(&self) -> Option<String> {
        self.self_address
            .borrow()
            .as_deref()
            .and_then(|address| address.split_once('@'))
            .map(|(_, gateway)| gateway.to_string())
    }

    pub fn manager(&self) -> &SocketManager {
        &self.manager
    }
}
