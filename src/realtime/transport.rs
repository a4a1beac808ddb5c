use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::logging::{debug, obj, v_num, Domain};

/// A bidirectional stream of Engine.IO text frames.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: String) -> Result<()>;
    /// Next text frame, or `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String>>;
    async fn close(&mut self) -> Result<()>;
}

/// Opens fresh transports; called again on every reconnect.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    async fn open(&self) -> Result<Self::Transport>;
}

// =============================================================================
// Websocket
// =============================================================================

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    pub async fn connect(url: &Url) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Binary(bytes)) => {
                    debug(
                        Domain::Transport,
                        "binary_frame_skipped",
                        obj(&[("len", v_num(bytes.len() as f64))]),
                    );
                }
                // tungstenite answers pings itself
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn open(&self) -> Result<WsTransport> {
        WsTransport::connect(&self.url).await
    }
}

// =============================================================================
// In-process pair, for driving a client without a network
// =============================================================================

pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

/// Server side of a `MemoryTransport`.
pub struct MemoryPeer {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let (to_client, incoming) = mpsc::unbounded_channel();
    let (outgoing, from_client) = mpsc::unbounded_channel();
    (
        MemoryTransport { incoming, outgoing },
        MemoryPeer {
            to_client,
            from_client,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.outgoing
            .send(frame)
            .map_err(|_| anyhow!("memory peer closed"))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.incoming.close();
        Ok(())
    }
}

/// Hands out queued transports in order, then refuses.
#[derive(Default)]
pub struct MemoryConnector {
    queue: Mutex<VecDeque<MemoryTransport>>,
}

impl MemoryConnector {
    pub fn new(transports: Vec<MemoryTransport>) -> Self {
        Self {
            queue: Mutex::new(transports.into()),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn open(&self) -> Result<MemoryTransport> {
        let next = self
            .queue
            .lock()
            .map_err(|_| anyhow!("memory connector poisoned"))?
            .pop_front();
        next.ok_or_else(|| anyhow!("connection refused"))
    }
}
