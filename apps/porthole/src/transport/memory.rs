//! In-process transport for tests and embedding.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Transport, TransportError};

pub struct InMemoryTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Two crossed in-memory transports; what one sends the other receives.
pub struct TransportPair {
    pub left: InMemoryTransport,
    pub right: InMemoryTransport,
}

impl TransportPair {
    pub fn new() -> Self {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        Self {
            left: InMemoryTransport {
                tx: left_tx,
                rx: left_rx,
            },
            right: InMemoryTransport {
                tx: right_tx,
                rx: right_rx,
            },
        }
    }
}

impl Default for TransportPair {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        self.tx
            .send(frame.to_owned())
            .map_err(|_| TransportError::Disconnected)
    }

    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}
