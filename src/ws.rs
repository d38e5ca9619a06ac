//! Blocking websocket client for exec output streams.

use std::io;
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, Result};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::executor::{OutputStream, StreamEvent, StreamMessage};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Output stream backed by a websocket connection (`ws://` or `wss://`).
pub struct WsStream {
    socket: Option<Socket>,
}

impl WsStream {
    pub fn connect(url: &str) -> Result<Self> {
        let (socket, _response) = tungstenite::connect(url)
            .with_context(|| format!("failed to open exec stream {url}"))?;
        tracing::debug!(url, "exec stream connected");
        Ok(Self {
            socket: Some(socket),
        })
    }
}

fn set_read_timeout(socket: &mut Socket, wait: Duration) -> io::Result<()> {
    // A zero read timeout means "block forever" to the OS; use the smallest real wait instead.
    let wait = Some(wait.max(Duration::from_millis(1)));
    match socket.get_mut() {
        MaybeTlsStream::Plain(s) => s.set_read_timeout(wait),
        MaybeTlsStream::Rustls(s) => s.sock.set_read_timeout(wait),
        _ => Ok(()),
    }
}

impl OutputStream for WsStream {
    fn recv(&mut self, wait: Duration) -> Result<StreamEvent> {
        let Some(socket) = self.socket.as_mut() else {
            return Ok(StreamEvent::Closed);
        };
        set_read_timeout(socket, wait).context("failed to set stream read timeout")?;
        match socket.read() {
            Ok(Message::Text(t)) => Ok(StreamEvent::Message(StreamMessage::Text(t))),
            Ok(Message::Binary(b)) => Ok(StreamEvent::Message(StreamMessage::Binary(b))),
            Ok(Message::Close(_)) => Ok(StreamEvent::Closed),
            Ok(_) => Ok(StreamEvent::Idle),
            Err(tungstenite::Error::Io(e))
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(StreamEvent::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(StreamEvent::Closed)
            }
            Err(e) => Err(e).context("exec stream read failed"),
        }
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            // Best-effort close handshake; the peer may already be gone
            let _ = socket.close(None);
            let _ = socket.flush();
        }
    }
}

impl Drop for WsStream {
    fn drop(&mut self) {
        self.close();
    }
}
