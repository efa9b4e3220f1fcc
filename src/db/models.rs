//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of configured entity that owns upstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    ProxyHost,
    StreamPort,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ProxyHost => "proxy_host",
            EntityKind::StreamPort => "stream_port",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "proxy_host" => Some(EntityKind::ProxyHost),
            "stream_port" => Some(EntityKind::StreamPort),
            _ => None,
        }
    }
}

/// Result of the most recent reachability check for an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStatus {
    Up,
    Down,
}

impl UpstreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamStatus::Up => "up",
            UpstreamStatus::Down => "down",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "up" => Some(UpstreamStatus::Up),
            "down" => Some(UpstreamStatus::Down),
            _ => None,
        }
    }
}

/// A single appended probe result. Rows are immutable once written;
/// only the retention pruner deletes them.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub entity_id: i64,
    pub entity_kind: EntityKind,
    pub upstream_key: String,
    pub status: UpstreamStatus,
    /// Connect latency in milliseconds. None when status is Down.
    pub response_ms: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

/// A notification group. Entities may belong to at most one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub webhook_url: String,
}

/// A single weighted upstream endpoint.
///
/// Weight matters to the balancer, not to health probing: every listed
/// endpoint is probed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamEndpoint {
    pub server: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// A location block within a proxy host, stored as tagged JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    /// Forwards matching requests to a group of upstreams.
    Proxy {
        path: String,
        upstreams: Vec<UpstreamEndpoint>,
    },
    /// Serves files from disk; owns no upstreams.
    Static { path: String, root: String },
    /// Issues an HTTP redirect; owns no upstreams.
    Redirect { path: String, to: String },
}

/// An HTTP host entry with its location blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyHost {
    pub id: i64,
    pub domain: String,
    pub enabled: bool,
    pub group_id: Option<i64>,
    pub webhook_url: String,
    pub locations: Vec<Location>,
}

/// Transport protocol of a stream port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// A raw TCP/UDP forwarding entry with its upstream list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPort {
    pub id: i64,
    pub listen_port: u16,
    pub protocol: Protocol,
    pub enabled: bool,
    pub group_id: Option<i64>,
    pub webhook_url: String,
    pub upstreams: Vec<UpstreamEndpoint>,
}
