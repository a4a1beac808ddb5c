use anyhow::{bail, Result};
use url::Url;

use crate::logging::{obj, v_str, warn, Domain};
use crate::realtime::retry::RetryConfig;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5123;
pub const DEFAULT_NAMESPACE: &str = "/frontend";
pub const DEFAULT_MOUNT_TARGET: &str = "app";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub namespace: String,
    pub mount_target: String,
    pub scout_history_cap: usize,
    pub value_history_cap: usize,
    pub render_min_interval_ms: u64,
    pub reconnect_max_retries: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            namespace: DEFAULT_NAMESPACE.to_string(),
            mount_target: DEFAULT_MOUNT_TARGET.to_string(),
            scout_history_cap: 500,
            value_history_cap: 240,
            render_min_interval_ms: 250,
            reconnect_max_retries: 10,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            event_channel_capacity: 256,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        let mut cfg = Self {
            host: std::env::var("SCOUT_HOST").unwrap_or(d.host),
            port: std::env::var("SCOUT_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.port),
            namespace: std::env::var("SCOUT_NAMESPACE").unwrap_or(d.namespace),
            mount_target: std::env::var("MOUNT_TARGET").unwrap_or(d.mount_target),
            scout_history_cap: std::env::var("SCOUT_HISTORY_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(d.scout_history_cap),
            value_history_cap: std::env::var("VALUE_HISTORY_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(d.value_history_cap),
            render_min_interval_ms: std::env::var("RENDER_MIN_INTERVAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.render_min_interval_ms),
            reconnect_max_retries: std::env::var("RECONNECT_MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(d.reconnect_max_retries),
            reconnect_base_delay_ms: std::env::var("RECONNECT_BASE_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.reconnect_base_delay_ms),
            reconnect_max_delay_ms: std::env::var("RECONNECT_MAX_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.reconnect_max_delay_ms),
            event_channel_capacity: std::env::var("EVENT_CHANNEL_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(d.event_channel_capacity),
        };
        cfg.apply_endpoint_override(std::env::var("SCOUT_ENDPOINT").ok().as_deref());
        cfg
    }

    /// `SCOUT_ENDPOINT` (`host:port/namespace`) wins over the separate vars.
    /// An unparsable value is logged and ignored.
    pub fn apply_endpoint_override(&mut self, raw: Option<&str>) {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return;
        };
        match Endpoint::parse(raw) {
            Ok(ep) => {
                self.host = ep.host;
                self.port = ep.port;
                self.namespace = ep.namespace;
            }
            Err(e) => warn(
                Domain::System,
                "bad_endpoint",
                obj(&[("value", v_str(raw)), ("error", v_str(&e.to_string()))]),
            ),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            namespace: normalize_namespace(&self.namespace),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.reconnect_max_retries,
            base_delay_ms: self.reconnect_base_delay_ms,
            max_delay_ms: self.reconnect_max_delay_ms,
            ..RetryConfig::default()
        }
    }
}

/// Where the realtime connection goes: `host:port/namespace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub namespace: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl Endpoint {
    /// Parse the `host:port/namespace` shorthand socket clients accept.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (authority, namespace) = match s.find('/') {
            Some(i) => (&s[..i], &s[i..]),
            None => (s, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => match p.parse::<u16>() {
                Ok(port) => (h, port),
                Err(_) => bail!("invalid port in endpoint {:?}", s),
            },
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            bail!("missing host in endpoint {:?}", s);
        }
        Ok(Self {
            host: host.to_string(),
            port,
            namespace: normalize_namespace(namespace),
        })
    }

    /// Engine.IO websocket URL for this endpoint.
    pub fn ws_url(&self) -> Result<Url> {
        let raw = format!(
            "ws://{}:{}/socket.io/?EIO=4&transport=websocket",
            self.host, self.port
        );
        Ok(Url::parse(&raw)?)
    }
}

fn normalize_namespace(ns: &str) -> String {
    let trimmed = ns.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
