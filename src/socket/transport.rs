//! WebSocket Transport Layer
//!
//! Single responsibility: Dial a WebSocket endpoint and hand back its two halves.
//! No knowledge of the envelope protocol or of the connection lifecycle.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::{Result, SocketError};

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Dial `uri` and split the connection for concurrent send/receive.
pub async fn connect(uri: &str) -> Result<(WsSink, WsStream)> {
    debug!(uri = %uri, "Connecting to WebSocket");

    let (ws, _) = connect_async(uri).await.map_err(|e| SocketError::Connection {
        uri: uri.to_string(),
        reason: format!("{}. Is the websocket up and running?", e),
    })?;

    debug!(uri = %uri, "WebSocket connected");
    Ok(ws.split())
}

/// Wrap raw bytes in a WebSocket message.
///
/// Envelopes are JSON, so frames normally go out as text; anything that is not
/// valid UTF-8 is sent as a binary message instead.
pub fn frame_message(frame: Vec<u8>) -> Message {
    match String::from_utf8(frame) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

/// Write one frame.
pub async fn write_frame(sink: &mut WsSink, frame: Vec<u8>) -> Result<()> {
    sink.send(frame_message(frame))
        .await
        .map_err(|e| SocketError::Send(e.to_string()))
}

/// Write a normal-closure close frame.
pub async fn write_close(sink: &mut WsSink) -> Result<()> {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    sink.send(Message::Close(Some(frame)))
        .await
        .map_err(|e| SocketError::Send(format!("failed to write close: {}", e)))
}

/// Receive the next frame as raw bytes.
///
/// Returns None once the connection is closed, by either side, or on any read error.
/// Ping and pong messages are skipped (pong replies are handled by tungstenite).
pub async fn read_frame(stream: &mut WsStream) -> Option<Vec<u8>> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Some(text.into_bytes()),
            Some(Ok(Message::Binary(data))) => return Some(data),
            Some(Ok(Message::Close(frame))) => {
                debug!(frame = ?frame, "Read: close frame");
                return None;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "Read failed");
                return None;
            }
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_message_text() {
        let msg = frame_message(br#"{"type":"selfAddress"}"#.to_vec());
        assert_eq!(msg, Message::Text(r#"{"type":"selfAddress"}"#.to_string()));
    }

    #[test]
    fn test_frame_message_binary_fallback() {
        let msg = frame_message(vec![0xff, 0xfe, 0x00]);
        assert_eq!(msg, Message::Binary(vec![0xff, 0xfe, 0x00]));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port with nothing listening on it
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(&format!("ws://{}", addr)).await.unwrap_err();
        assert!(matches!(err, SocketError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_connect_invalid_uri_is_connection_error() {
        let err = connect("aaaaaaaaaaaa").await.unwrap_err();
        assert!(matches!(err, SocketError::Connection { .. }));
    }
}
