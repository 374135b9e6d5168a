//! WebSocket transport for the mirror channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::{Transport, TransportError};

pub struct WebSocketTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
    pump: Option<tokio::task::JoinHandle<()>>,
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(url).await?;
        debug!(url, "websocket connected");

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<String>();
        let connected = Arc::new(AtomicBool::new(true));
        let pump = tokio::spawn(pump_frames(stream, rx_out, tx_in, Arc::clone(&connected)));

        Ok(Self {
            tx: tx_out,
            rx: rx_in,
            connected,
            pump: Some(pump),
        })
    }

    pub async fn close(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.pump.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.tx
            .send(frame.to_owned())
            .map_err(|_| TransportError::Disconnected)
    }

    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn pump_frames(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    incoming: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
) {
    let (mut sink, mut source) = stream.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if incoming.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => {
                // peers are expected to send text; tolerate utf-8 binary
                if let Ok(text) = String::from_utf8(data) {
                    if incoming.send(text).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    connected.store(false, Ordering::SeqCst);
    writer.abort();
    let _ = writer.await;
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.pump.take() {
            task.abort();
        }
    }
}
