//! In-process WebSocket peer standing in for the local Nym client.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;

pub const PEER_ADDRESS: &str = "8xjoZ.JwW3@5sQxq";
pub const PEER_GATEWAY: &str = "5sQxq";
pub const SENDER_TAG: &str = "T";

/// How the peer reacts to inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Write every text frame straight back.
    Echo,
    /// Answer `selfAddress` and turn every `send` into a `received` tagged `T`.
    Nym,
    /// Accept the connection and never read from it.
    Mute,
}

pub struct MockPeer {
    pub uri: String,
    frames: mpsc::UnboundedReceiver<String>,
    disconnect: watch::Sender<u64>,
    connections: Arc<AtomicUsize>,
}

impl MockPeer {
    pub async fn spawn(behaviour: Behaviour) -> Self {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("ws://{}", server.local_addr().unwrap());

        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (disconnect, _) = watch::channel(0u64);
        let connections = Arc::new(AtomicUsize::new(0));

        let disconnect_rx = disconnect.subscribe();
        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((tcp, _)) = server.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let mut disconnect = disconnect_rx.clone();
                disconnect.mark_unchanged();
                tokio::spawn(serve(tcp, behaviour, frames_tx.clone(), disconnect));
            }
        });

        Self {
            uri,
            frames,
            disconnect,
            connections,
        }
    }

    /// Next text frame the peer received.
    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("peer received no frame in time")
            .expect("peer stopped")
    }

    pub async fn next_json(&mut self) -> Value {
        serde_json::from_str(&self.next_frame().await).expect("frame is JSON")
    }

    /// Close every open connection from the peer side.
    pub fn disconnect_all(&self) {
        self.disconnect.send_modify(|generation| *generation += 1);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve(
    tcp: TcpStream,
    behaviour: Behaviour,
    frames: mpsc::UnboundedSender<String>,
    mut disconnect: watch::Receiver<u64>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
        return;
    };

    if behaviour == Behaviour::Mute {
        let _ = disconnect.changed().await;
        return;
    }

    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = frames.send(text.clone());
                    if let Some(response) = respond(behaviour, &text) {
                        if ws.send(Message::Text(response)).await.is_err() {
                            break;
                        }
                    }
                }
                // Keep reading so tungstenite flushes its close reply
                Some(Ok(_)) => continue,
                _ => break,
            },
            _ = disconnect.changed() => {
                let _ = ws.close(None).await;
                while let Some(Ok(_)) = ws.next().await {}
                break;
            }
        }
    }
}

fn respond(behaviour: Behaviour, text: &str) -> Option<String> {
    match behaviour {
        Behaviour::Echo => Some(text.to_string()),
        Behaviour::Mute => None,
        Behaviour::Nym => {
            let frame: Value = serde_json::from_str(text).ok()?;
            match frame.get("type")?.as_str()? {
                "selfAddress" => Some(json!({"type": "selfAddress", "address": PEER_ADDRESS}).to_string()),
                "send" => Some(
                    json!({
                        "type": "received",
                        "message": frame.get("message")?,
                        "senderTag": SENDER_TAG,
                    })
                    .to_string(),
                ),
                _ => None,
            }
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// URI of a local port with nothing listening on it.
pub async fn closed_port_uri() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
