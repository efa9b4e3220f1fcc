//! Transition detection and webhook notification.
//!
//! Every probe result is recorded; a notification is produced only
//! when the new status differs from the immediately preceding stored
//! status for the same upstream. The first observation of an upstream
//! never notifies. Flapping upstreams notify on every transition; there
//! is no debouncing.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::db::{DbError, Group, HealthRecord, Store, UpstreamStatus};

use super::probe::probe;
use super::settings::global_webhook_url;
use super::targets::ProbeTarget;

/// Timeout for a single webhook delivery attempt.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// A health state transition event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEvent {
    UpstreamDown,
    UpstreamUp,
}

/// Decide whether a new status constitutes a transition.
///
/// `prev` is None when the upstream has never been probed; that first
/// observation is not a transition, whatever its result.
pub fn transition_event(
    prev: Option<UpstreamStatus>,
    new: UpstreamStatus,
) -> Option<HealthEvent> {
    match (prev?, new) {
        (UpstreamStatus::Up, UpstreamStatus::Down) => Some(HealthEvent::UpstreamDown),
        (UpstreamStatus::Down, UpstreamStatus::Up) => Some(HealthEvent::UpstreamUp),
        _ => None,
    }
}

/// Pick the notification destination: entity URL, else the owning
/// group's URL, else the global default, else none.
///
/// Callers pass configuration state read at dispatch time, so URL edits
/// apply to transitions detected after the edit.
pub fn resolve_webhook(
    entity_url: &str,
    group: Option<&Group>,
    global_url: Option<&str>,
) -> Option<String> {
    if !entity_url.is_empty() {
        return Some(entity_url.to_string());
    }
    if let Some(group) = group {
        if !group.webhook_url.is_empty() {
            return Some(group.webhook_url.clone());
        }
    }
    global_url
        .filter(|url| !url.is_empty())
        .map(|url| url.to_string())
}

/// JSON body delivered to the resolved webhook URL.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub event: HealthEvent,
    pub host: String,
    pub upstream: String,
    pub group: Option<String>,
    pub timestamp: String,
    pub response_ms: Option<i64>,
    pub message: String,
}

/// A resolved notification, ready to send.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub url: String,
    pub payload: NotificationPayload,
}

/// Probe one target, record the result, and decide whether a
/// notification should go out.
///
/// The prior status is read before the new record is appended; the
/// append happens unconditionally. Returns the dispatch to perform, or
/// None when there is no transition or no webhook URL resolves.
pub async fn process_target(
    store: &Store,
    target: &ProbeTarget,
    timeout: Duration,
) -> Result<Option<Dispatch>, DbError> {
    let upstream_key = target.upstream_key();
    let prev = store.latest_status(target.entity_id, target.entity_kind, &upstream_key)?;

    let outcome = probe(&target.server, target.port, timeout).await;
    let response_ms = match outcome.status {
        UpstreamStatus::Up => Some(outcome.elapsed_ms),
        UpstreamStatus::Down => None,
    };
    let checked_at = Utc::now();

    store.append_health(&HealthRecord {
        entity_id: target.entity_id,
        entity_kind: target.entity_kind,
        upstream_key: upstream_key.clone(),
        status: outcome.status,
        response_ms,
        checked_at,
    })?;

    let event = match transition_event(prev, outcome.status) {
        Some(e) => e,
        None => return Ok(None),
    };

    tracing::info!(
        "{}: upstream {} is now {}",
        target.entity_label,
        upstream_key,
        outcome.status.as_str()
    );

    let group = match target.group_id {
        Some(id) => store.get_group(id)?,
        None => None,
    };
    let global_url = global_webhook_url(store)?;
    let url = resolve_webhook(&target.entity_webhook_url, group.as_ref(), global_url.as_deref());

    let message = match event {
        HealthEvent::UpstreamDown => outcome
            .error
            .unwrap_or_else(|| "connection failed".to_string()),
        HealthEvent::UpstreamUp => "recovered".to_string(),
    };

    let payload = NotificationPayload {
        event,
        host: target.entity_label.clone(),
        upstream: upstream_key,
        group: group.map(|g| g.name),
        timestamp: checked_at.to_rfc3339(),
        response_ms,
        message,
    };

    match url {
        Some(url) => Ok(Some(Dispatch { url, payload })),
        None => {
            tracing::debug!(
                "{}: no webhook configured, dropping {:?}",
                target.entity_label,
                payload.event
            );
            Ok(None)
        }
    }
}

/// Best-effort webhook delivery.
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    /// POST the payload as JSON. Failures are logged and swallowed; the
    /// response status is not inspected and nothing is ever retried.
    pub async fn send(&self, url: &str, payload: &NotificationPayload) {
        match self.client.post(url).json(payload).send().await {
            Ok(_) => {
                tracing::debug!("Webhook delivered to {}", url);
            }
            Err(e) => {
                tracing::warn!("Webhook delivery to {} failed: {}", url, e);
            }
        }
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EntityKind;
    use crate::watchdog::probe::DEFAULT_PROBE_TIMEOUT;
    use crate::watchdog::settings::SETTING_GLOBAL_WEBHOOK_URL;
    use tempfile::NamedTempFile;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn open_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn group(name: &str, url: &str) -> Group {
        Group {
            id: 1,
            name: name.to_string(),
            webhook_url: url.to_string(),
        }
    }

    fn target(entity_id: i64, server: &str, port: u16) -> ProbeTarget {
        ProbeTarget {
            entity_id,
            entity_kind: EntityKind::ProxyHost,
            entity_label: "app.example.com".to_string(),
            group_id: None,
            entity_webhook_url: String::new(),
            server: server.to_string(),
            port,
        }
    }

    #[test]
    fn test_transition_event_table() {
        use UpstreamStatus::*;

        // First observation never notifies, whatever the result
        assert_eq!(transition_event(None, Up), None);
        assert_eq!(transition_event(None, Down), None);

        // Steady state never notifies
        assert_eq!(transition_event(Some(Up), Up), None);
        assert_eq!(transition_event(Some(Down), Down), None);

        // Changes notify with the matching event
        assert_eq!(
            transition_event(Some(Up), Down),
            Some(HealthEvent::UpstreamDown)
        );
        assert_eq!(
            transition_event(Some(Down), Up),
            Some(HealthEvent::UpstreamUp)
        );
    }

    #[test]
    fn test_resolve_webhook_precedence() {
        let g = group("backends", "https://hooks.example.com/group");

        // Entity URL wins over everything
        assert_eq!(
            resolve_webhook("https://hooks.example.com/entity", Some(&g), Some("https://hooks.example.com/global")),
            Some("https://hooks.example.com/entity".to_string())
        );

        // Group URL when the entity URL is empty
        assert_eq!(
            resolve_webhook("", Some(&g), Some("https://hooks.example.com/global")),
            Some("https://hooks.example.com/group".to_string())
        );

        // Global URL when entity and group URLs are empty
        let empty_group = group("backends", "");
        assert_eq!(
            resolve_webhook("", Some(&empty_group), Some("https://hooks.example.com/global")),
            Some("https://hooks.example.com/global".to_string())
        );

        // Nothing configured anywhere
        assert_eq!(resolve_webhook("", None, None), None);
        assert_eq!(resolve_webhook("", Some(&empty_group), Some("")), None);
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = NotificationPayload {
            event: HealthEvent::UpstreamDown,
            host: "app.example.com".to_string(),
            upstream: "10.0.0.5:8080".to_string(),
            group: None,
            timestamp: "2026-08-07T12:00:00+00:00".to_string(),
            response_ms: None,
            message: "connection failed: refused".to_string(),
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&payload).unwrap()).unwrap();
        assert_eq!(json["event"], "upstream_down");
        assert_eq!(json["host"], "app.example.com");
        assert_eq!(json["upstream"], "10.0.0.5:8080");
        assert_eq!(json["group"], serde_json::Value::Null);
        assert_eq!(json["response_ms"], serde_json::Value::Null);
        assert_eq!(json["message"], "connection failed: refused");

        let up = NotificationPayload {
            event: HealthEvent::UpstreamUp,
            response_ms: Some(12),
            group: Some("backends".to_string()),
            ..payload
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&up).unwrap()).unwrap();
        assert_eq!(json["event"], "upstream_up");
        assert_eq!(json["group"], "backends");
        assert_eq!(json["response_ms"], 12);
    }

    #[tokio::test]
    async fn test_first_probe_never_dispatches() {
        let (_tmp, store) = open_store();
        store
            .set_setting(SETTING_GLOBAL_WEBHOOK_URL, "https://hooks.example.com/all")
            .unwrap();

        // Down on first observation: recorded, not notified
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let t = target(1, "127.0.0.1", port);
        let dispatch = process_target(&store, &t, DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap();
        assert!(dispatch.is_none());

        let history = store
            .health_history(1, EntityKind::ProxyHost, &t.upstream_key(), 10)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, UpstreamStatus::Down);
        assert_eq!(history[0].response_ms, None);
    }

    #[tokio::test]
    async fn test_steady_state_never_dispatches() {
        let (_tmp, store) = open_store();
        store
            .set_setting(SETTING_GLOBAL_WEBHOOK_URL, "https://hooks.example.com/all")
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let t = target(1, "127.0.0.1", port);

        for _ in 0..3 {
            let dispatch = process_target(&store, &t, DEFAULT_PROBE_TIMEOUT)
                .await
                .unwrap();
            assert!(dispatch.is_none());
        }

        let history = store
            .health_history(1, EntityKind::ProxyHost, &t.upstream_key(), 10)
            .unwrap();
        assert_eq!(history.len(), 3);
        assert!(history
            .iter()
            .all(|r| r.status == UpstreamStatus::Up && r.response_ms.is_some()));
    }

    #[tokio::test]
    async fn test_up_down_up_dispatches_twice_to_group_url() {
        let (_tmp, store) = open_store();

        let mut g = group("backends", "https://hooks.example.com/group");
        g.id = 0;
        let group_id = store.add_group(&mut g).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let port = addr.port();

        let mut t = target(1, "127.0.0.1", port);
        t.group_id = Some(group_id);

        // Cycle 1: up, first observation
        let d1 = process_target(&store, &t, DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap();
        assert!(d1.is_none());

        // Cycle 2: listener gone, refused
        drop(listener);
        let d2 = process_target(&store, &t, DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap()
            .expect("down transition should dispatch");
        assert_eq!(d2.url, "https://hooks.example.com/group");
        assert_eq!(d2.payload.event, HealthEvent::UpstreamDown);
        assert_eq!(d2.payload.group.as_deref(), Some("backends"));
        assert_eq!(d2.payload.response_ms, None);

        // Cycle 3: listener back on the same port, recovered
        let listener = TcpListener::bind(addr).await.unwrap();
        let d3 = process_target(&store, &t, DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap()
            .expect("up transition should dispatch");
        assert_eq!(d3.url, "https://hooks.example.com/group");
        assert_eq!(d3.payload.event, HealthEvent::UpstreamUp);
        assert_eq!(d3.payload.message, "recovered");
        assert!(d3.payload.response_ms.is_some());
        drop(listener);

        let history = store
            .health_history(1, EntityKind::ProxyHost, &t.upstream_key(), 10)
            .unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_transition_falls_back_to_global_url() {
        let (_tmp, store) = open_store();

        let mut g = group("backends", "");
        g.id = 0;
        let group_id = store.add_group(&mut g).unwrap();
        store
            .set_setting(SETTING_GLOBAL_WEBHOOK_URL, "https://hooks.example.com/all")
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut t = target(2, "127.0.0.1", port);
        t.group_id = Some(group_id);

        process_target(&store, &t, DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap();
        drop(listener);

        let dispatch = process_target(&store, &t, DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap()
            .expect("down transition should dispatch");
        assert_eq!(dispatch.url, "https://hooks.example.com/all");
        assert_eq!(dispatch.payload.group.as_deref(), Some("backends"));
    }

    #[tokio::test]
    async fn test_transition_without_any_url_is_recorded_not_dispatched() {
        let (_tmp, store) = open_store();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let t = target(3, "127.0.0.1", port);

        process_target(&store, &t, DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap();
        drop(listener);

        let dispatch = process_target(&store, &t, DEFAULT_PROBE_TIMEOUT)
            .await
            .unwrap();
        assert!(dispatch.is_none());

        let history = store
            .health_history(3, EntityKind::ProxyHost, &t.upstream_key(), 10)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, UpstreamStatus::Down);
        assert_eq!(history[1].status, UpstreamStatus::Up);
    }

    #[tokio::test]
    async fn test_dispatcher_posts_json_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Read until the headers and the content-length'd body arrive
            let mut data = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&data).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let body_len = text
                        .lines()
                        .find_map(|line| {
                            line.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .and_then(|v| v.trim().parse::<usize>().ok())
                        })
                        .unwrap_or(0);
                    if data.len() >= header_end + 4 + body_len {
                        break;
                    }
                }
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&data).to_string()
        });

        let payload = NotificationPayload {
            event: HealthEvent::UpstreamDown,
            host: "app.example.com".to_string(),
            upstream: "10.0.0.5:8080".to_string(),
            group: None,
            timestamp: Utc::now().to_rfc3339(),
            response_ms: None,
            message: "connection failed".to_string(),
        };

        let dispatcher = WebhookDispatcher::new();
        dispatcher
            .send(&format!("http://{}/hook", addr), &payload)
            .await;

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("content-type: application/json"));
        assert!(request.contains("\"event\":\"upstream_down\""));
    }

    #[tokio::test]
    async fn test_dispatcher_swallows_delivery_failure() {
        // Nothing listening here; send must not panic or error out.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let payload = NotificationPayload {
            event: HealthEvent::UpstreamUp,
            host: "app.example.com".to_string(),
            upstream: "10.0.0.5:8080".to_string(),
            group: None,
            timestamp: Utc::now().to_rfc3339(),
            response_ms: Some(4),
            message: "recovered".to_string(),
        };

        WebhookDispatcher::new()
            .send(&format!("http://{}/hook", addr), &payload)
            .await;
    }
}
