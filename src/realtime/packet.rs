//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Engine.IO frames carry a single type digit followed by the payload. A
//! Socket.IO packet rides inside an Engine.IO `4` (message) frame:
//!
//! ```text
//! <type>[<attachments>-][<namespace>,][<ack id>][<json>]
//! ```

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use serde_json::Value;

/// Handshake data the server sends in its open packet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or_else(|| anyhow!("empty engine.io frame"))?;
        let rest = chars.as_str();
        Ok(match kind {
            '0' => EnginePacket::Open(serde_json::from_str(rest)?),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(rest.to_string()),
            '3' => EnginePacket::Pong(rest.to_string()),
            '4' => EnginePacket::Message(rest.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => bail!("unknown engine.io packet type {:?}", other),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(info) => format!(
                "0{}",
                serde_json::json!({
                    "sid": info.sid,
                    "upgrades": info.upgrades,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                    "maxPayload": info.max_payload,
                })
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(p) => format!("2{}", p),
            EnginePacket::Pong(p) => format!("3{}", p),
            EnginePacket::Message(m) => format!("4{}", m),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl SocketPacketKind {
    fn from_digit(c: char) -> Result<Self> {
        Ok(match c {
            '0' => SocketPacketKind::Connect,
            '1' => SocketPacketKind::Disconnect,
            '2' => SocketPacketKind::Event,
            '3' => SocketPacketKind::Ack,
            '4' => SocketPacketKind::ConnectError,
            '5' => SocketPacketKind::BinaryEvent,
            '6' => SocketPacketKind::BinaryAck,
            other => bail!("unknown socket.io packet type {:?}", other),
        })
    }

    fn digit(self) -> char {
        match self {
            SocketPacketKind::Connect => '0',
            SocketPacketKind::Disconnect => '1',
            SocketPacketKind::Event => '2',
            SocketPacketKind::Ack => '3',
            SocketPacketKind::ConnectError => '4',
            SocketPacketKind::BinaryEvent => '5',
            SocketPacketKind::BinaryAck => '6',
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, SocketPacketKind::BinaryEvent | SocketPacketKind::BinaryAck)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub kind: SocketPacketKind,
    pub namespace: String,
    pub attachments: u32,
    pub ack_id: Option<u64>,
    pub data: Option<Value>,
}

impl SocketPacket {
    pub fn connect(namespace: &str) -> Self {
        Self::new(SocketPacketKind::Connect, namespace, None)
    }

    pub fn disconnect(namespace: &str) -> Self {
        Self::new(SocketPacketKind::Disconnect, namespace, None)
    }

    pub fn event(namespace: &str, name: &str, args: Vec<Value>) -> Self {
        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(Value::String(name.to_string()));
        payload.extend(args);
        Self::new(SocketPacketKind::Event, namespace, Some(Value::Array(payload)))
    }

    fn new(kind: SocketPacketKind, namespace: &str, data: Option<Value>) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            attachments: 0,
            ack_id: None,
            data,
        }
    }

    pub fn decode(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        let kind = SocketPacketKind::from_digit(
            chars.next().ok_or_else(|| anyhow!("empty socket.io packet"))?,
        )?;
        let mut rest = chars.as_str();

        let mut attachments = 0;
        if kind.is_binary() {
            let dash = rest
                .find('-')
                .ok_or_else(|| anyhow!("binary packet without attachment count"))?;
            attachments = rest[..dash].parse()?;
            rest = &rest[dash + 1..];
        }

        let mut namespace = "/".to_string();
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(i) => {
                    namespace = rest[..i].to_string();
                    rest = &rest[i + 1..];
                }
                None => {
                    namespace = rest.to_string();
                    rest = "";
                }
            }
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            Some(rest[..digits].parse()?)
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(Self {
            kind,
            namespace,
            attachments,
            ack_id,
            data,
        })
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.kind.is_binary() {
            out.push_str(&format!("{}-", self.attachments));
        }
        if self.namespace != "/" {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Wrap in an Engine.IO message frame.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

/// A named event pushed by the server on a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
    pub namespace: String,
    pub name: String,
    pub args: Vec<Value>,
}

impl RealtimeEvent {
    pub fn from_packet(packet: SocketPacket) -> Result<Self> {
        if packet.kind != SocketPacketKind::Event {
            bail!("not an event packet: {:?}", packet.kind);
        }
        let mut items = match packet.data {
            Some(Value::Array(items)) => items,
            other => bail!("event payload is not an array: {:?}", other),
        };
        if items.is_empty() {
            bail!("event payload is empty");
        }
        let name = match items.remove(0) {
            Value::String(name) => name,
            other => bail!("event name is not a string: {}", other),
        };
        Ok(Self {
            namespace: packet.namespace,
            name,
            args: items,
        })
    }
}
