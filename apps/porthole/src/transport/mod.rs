//! Channel boundary for envelope frames.
//!
//! A session talks to its peer through this trait and never learns what
//! carries the frames. Frames are whole JSON texts; framing, reconnection
//! and TLS live behind the implementations.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod websocket;

pub use memory::{InMemoryTransport, TransportPair};
pub use websocket::WebSocketTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Next inbound frame, or `None` once the peer is gone.
    async fn recv(&mut self) -> Option<String>;

    fn is_connected(&self) -> bool;
}
