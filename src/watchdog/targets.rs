//! Target enumeration.
//!
//! Flattens the current configuration into the set of upstream
//! endpoints to probe this cycle. Pure read, rebuilt every cycle so
//! configuration edits take effect on the next tick.

use crate::db::{DbError, EntityKind, Location, Store};

/// A single endpoint to probe, tagged with its owning entity.
///
/// The label, group id, and entity-level webhook URL ride along so the
/// notifier can describe the entity and start webhook resolution
/// without re-reading the entity row.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub entity_id: i64,
    pub entity_kind: EntityKind,
    pub entity_label: String,
    pub group_id: Option<i64>,
    pub entity_webhook_url: String,
    pub server: String,
    pub port: u16,
}

impl ProbeTarget {
    /// Stable join key between live probing and stored history.
    pub fn upstream_key(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

/// Enumerate all probe targets from enabled entities.
///
/// Every listed endpoint is probed regardless of weight or balancing
/// method. Disabled entities contribute nothing.
pub fn enumerate(store: &Store) -> Result<Vec<ProbeTarget>, DbError> {
    let mut targets = Vec::new();

    for host in store.enabled_proxy_hosts()? {
        for location in &host.locations {
            let upstreams = match location {
                Location::Proxy { upstreams, .. } => upstreams,
                Location::Static { .. } | Location::Redirect { .. } => continue,
            };
            for upstream in upstreams {
                targets.push(ProbeTarget {
                    entity_id: host.id,
                    entity_kind: EntityKind::ProxyHost,
                    entity_label: host.domain.clone(),
                    group_id: host.group_id,
                    entity_webhook_url: host.webhook_url.clone(),
                    server: upstream.server.clone(),
                    port: upstream.port,
                });
            }
        }
    }

    for stream in store.enabled_stream_ports()? {
        for upstream in &stream.upstreams {
            targets.push(ProbeTarget {
                entity_id: stream.id,
                entity_kind: EntityKind::StreamPort,
                entity_label: format!("{}/{}", stream.protocol.as_str(), stream.listen_port),
                group_id: stream.group_id,
                entity_webhook_url: stream.webhook_url.clone(),
                server: upstream.server.clone(),
                port: upstream.port,
            });
        }
    }

    Ok(targets)
}
