use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::config::{Config, Endpoint};
use crate::logging::{debug, info, obj, v_num, v_str, warn, Domain};

use super::packet::{EnginePacket, OpenInfo, RealtimeEvent, SocketPacket, SocketPacketKind};
use super::retry::{retry_async, RetryConfig};
use super::transport::{Connector, Transport, WsConnector};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_LIVENESS: Duration = Duration::from_secs(1);

/// What the connection task reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeMessage {
    Connected { namespace: String },
    Disconnected { reason: String },
    Event(RealtimeEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Our side asked to stop.
    Shutdown,
    /// Nobody is reading events anymore.
    ReceiverDropped,
    /// The server disconnected our namespace; no reconnect.
    ServerDisconnect,
    TransportClosed,
    PingTimeout,
}

impl SessionEnd {
    pub fn reconnects(self) -> bool {
        matches!(self, SessionEnd::TransportClosed | SessionEnd::PingTimeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionEnd::Shutdown => "client shutdown",
            SessionEnd::ReceiverDropped => "receiver dropped",
            SessionEnd::ServerDisconnect => "server disconnect",
            SessionEnd::TransportClosed => "transport close",
            SessionEnd::PingTimeout => "ping timeout",
        }
    }
}

/// One joined namespace over one transport.
pub struct Session<T: Transport> {
    transport: T,
    namespace: String,
    info: OpenInfo,
}

impl<T: Transport> Session<T> {
    /// Read the Engine.IO open packet, then join `namespace`.
    pub async fn handshake(mut transport: T, namespace: &str) -> Result<Self> {
        let info = match next_packet(&mut transport).await? {
            EnginePacket::Open(info) => info,
            other => bail!("expected open packet, got {:?}", other),
        };
        transport
            .send(SocketPacket::connect(namespace).to_frame())
            .await?;

        loop {
            match next_packet(&mut transport).await? {
                EnginePacket::Ping(p) => transport.send(EnginePacket::Pong(p).encode()).await?,
                EnginePacket::Close => bail!("server closed during handshake"),
                EnginePacket::Message(m) => {
                    let packet = SocketPacket::decode(&m)?;
                    if packet.namespace != namespace {
                        continue;
                    }
                    match packet.kind {
                        SocketPacketKind::Connect => break,
                        SocketPacketKind::ConnectError => {
                            let reason = packet
                                .data
                                .as_ref()
                                .and_then(|d| d.get("message"))
                                .and_then(Value::as_str)
                                .unwrap_or("unknown")
                                .to_string();
                            bail!("namespace {} refused: {}", namespace, reason);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            transport,
            namespace: namespace.to_string(),
            info,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Pump frames until the session ends, forwarding namespace events.
    pub async fn run(
        &mut self,
        events: &mpsc::Sender<RealtimeMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let liveness = liveness_window(&self.info);
        loop {
            let frame = tokio::select! {
                _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
                r = timeout(liveness, self.transport.recv()) => match r {
                    Err(_) => return Ok(SessionEnd::PingTimeout),
                    Ok(None) => return Ok(SessionEnd::TransportClosed),
                    Ok(Some(Err(e))) => return Err(e),
                    Ok(Some(Ok(frame))) => frame,
                },
            };

            let packet = match EnginePacket::decode(&frame) {
                Ok(p) => p,
                Err(e) => {
                    warn(Domain::Transport, "bad_frame", obj(&[("error", v_str(&e.to_string()))]));
                    continue;
                }
            };
            match packet {
                EnginePacket::Ping(p) => self.transport.send(EnginePacket::Pong(p).encode()).await?,
                EnginePacket::Close => return Ok(SessionEnd::TransportClosed),
                EnginePacket::Message(m) => {
                    if let Some(end) = self.on_message(&m, events).await {
                        return Ok(end);
                    }
                }
                _ => {}
            }
        }
    }

    async fn on_message(
        &mut self,
        m: &str,
        events: &mpsc::Sender<RealtimeMessage>,
    ) -> Option<SessionEnd> {
        let packet = match SocketPacket::decode(m) {
            Ok(p) => p,
            Err(e) => {
                warn(Domain::Transport, "bad_packet", obj(&[("error", v_str(&e.to_string()))]));
                return None;
            }
        };
        if packet.namespace != self.namespace {
            return None;
        }
        match packet.kind {
            SocketPacketKind::Event => match RealtimeEvent::from_packet(packet) {
                Ok(ev) => {
                    if events.send(RealtimeMessage::Event(ev)).await.is_err() {
                        return Some(SessionEnd::ReceiverDropped);
                    }
                }
                Err(e) => {
                    warn(Domain::Transport, "bad_event", obj(&[("error", v_str(&e.to_string()))]));
                }
            },
            SocketPacketKind::Disconnect => return Some(SessionEnd::ServerDisconnect),
            SocketPacketKind::BinaryEvent | SocketPacketKind::BinaryAck => {
                debug(
                    Domain::Transport,
                    "binary_packet_skipped",
                    obj(&[("attachments", v_num(packet.attachments as f64))]),
                );
            }
            _ => {}
        }
        None
    }

    /// Leave the namespace and close the transport.
    pub async fn close(mut self) -> Result<()> {
        let _ = self
            .transport
            .send(SocketPacket::disconnect(&self.namespace).to_frame())
            .await;
        self.transport.close().await
    }
}

/// How long the server may stay silent before the session counts as dead.
fn liveness_window(info: &OpenInfo) -> Duration {
    Duration::from_millis(info.ping_interval.saturating_add(info.ping_timeout)).max(MIN_LIVENESS)
}

async fn next_packet<T: Transport>(transport: &mut T) -> Result<EnginePacket> {
    match transport.recv().await {
        Some(frame) => EnginePacket::decode(&frame?),
        None => Err(anyhow!("transport closed")),
    }
}

async fn open_session<C: Connector>(
    connector: &C,
    namespace: &str,
) -> Result<Session<C::Transport>> {
    let transport = connector.open().await?;
    match timeout(HANDSHAKE_TIMEOUT, Session::handshake(transport, namespace)).await {
        Ok(session) => session,
        Err(_) => bail!("handshake timed out"),
    }
}

/// Handle to the background connection task.
///
/// Created once at startup and shut down explicitly; events arrive in the
/// order the server emitted them. A failed round of connect attempts is
/// reported as `Disconnected` and followed by another round after a pause
/// capped at `max_delay_ms`, so the stream only ends on shutdown, when the
/// receiver is dropped, or after the server disconnects the namespace.
pub struct RealtimeClient {
    events: mpsc::Receiver<RealtimeMessage>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    namespace: String,
}

impl RealtimeClient {
    /// Connect over websocket to the endpoint in `cfg`. Must run inside a tokio runtime.
    pub fn connect(cfg: &Config) -> Result<Self> {
        let endpoint = cfg.endpoint();
        let connector = WsConnector::new(endpoint.ws_url()?);
        Ok(Self::with_connector(
            connector,
            &endpoint,
            cfg.retry(),
            cfg.event_channel_capacity,
        ))
    }

    pub fn with_connector<C: Connector>(
        connector: C,
        endpoint: &Endpoint,
        retry: RetryConfig,
        capacity: usize,
    ) -> Self {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let namespace = endpoint.namespace.clone();
        let task = tokio::spawn(connection_loop(
            connector,
            namespace.clone(),
            retry,
            tx,
            shutdown_rx,
        ));
        Self {
            events,
            shutdown,
            task,
            namespace,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Next message, or `None` once the connection task has ended.
    pub async fn next_message(&mut self) -> Option<RealtimeMessage> {
        self.events.recv().await
    }

    /// Stop the connection task and wait for it to leave the namespace.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        drop(self.events);
        if let Err(e) = self.task.await {
            warn(Domain::Transport, "task_join_failed", obj(&[("error", v_str(&e.to_string()))]));
        }
    }
}

async fn connection_loop<C: Connector>(
    connector: C,
    namespace: String,
    retry: RetryConfig,
    events: mpsc::Sender<RealtimeMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let connector = &connector;
    let ns = namespace.as_str();
    loop {
        let opened = tokio::select! {
            _ = shutdown.changed() => return,
            r = retry_async(&retry, "connect", || open_session(connector, ns)) => r,
        };
        let mut session = match opened {
            Ok(s) => s,
            Err(e) => {
                let pause = retry.delay_for_attempt(retry.max_retries);
                warn(
                    Domain::Transport,
                    "connect_round_failed",
                    obj(&[
                        ("namespace", v_str(ns)),
                        ("error", v_str(&e.to_string())),
                        ("next_round_ms", v_num(pause.as_millis() as f64)),
                    ]),
                );
                if events
                    .send(RealtimeMessage::Disconnected {
                        reason: e.to_string(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(pause) => continue,
                }
            }
        };

        info(Domain::Transport, "connected", obj(&[("namespace", v_str(ns))]));
        if events
            .send(RealtimeMessage::Connected {
                namespace: session.namespace().to_string(),
            })
            .await
            .is_err()
        {
            let _ = session.close().await;
            return;
        }

        let end = match session.run(&events, &mut shutdown).await {
            Ok(end) => end,
            Err(e) => {
                warn(Domain::Transport, "session_error", obj(&[("error", v_str(&e.to_string()))]));
                SessionEnd::TransportClosed
            }
        };
        info(Domain::Transport, "disconnected", obj(&[("reason", v_str(end.as_str()))]));

        match end {
            SessionEnd::Shutdown | SessionEnd::ReceiverDropped => {
                let _ = session.close().await;
                return;
            }
            _ => {}
        }
        let _ = events
            .send(RealtimeMessage::Disconnected {
                reason: end.as_str().to_string(),
            })
            .await;
        if !end.reconnects() {
            return;
        }
    }
}
