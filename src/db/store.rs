//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Thread-safe database store.
///
/// The configuration tables (groups, hosts, stream ports, settings) are
/// written by the admin application; the watchdog only reads them. The
/// health_history table is owned by the watchdog.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Settings ---

    /// Get a setting value, or None when the key is absent.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a setting value, inserting or replacing the key.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Groups ---

    /// Add a group and return its ID.
    pub fn add_group(&self, group: &mut Group) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO groups (name, webhook_url) VALUES (?1, ?2)",
            params![group.name, group.webhook_url],
        )?;
        let id = conn.last_insert_rowid();
        group.id = id;
        Ok(id)
    }

    /// Get a group by ID, or None when it does not exist.
    pub fn get_group(&self, id: i64) -> Result<Option<Group>, DbError> {
        let conn = self.conn.lock().unwrap();
        let group = conn
            .query_row(
                "SELECT id, name, webhook_url FROM groups WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Group {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        webhook_url: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(group)
    }

    // --- Proxy hosts ---

    /// Add a proxy host and return its ID.
    pub fn add_proxy_host(&self, host: &mut ProxyHost) -> Result<i64, DbError> {
        let locations = serde_json::to_string(&host.locations)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO proxy_hosts (domain, enabled, group_id, webhook_url, locations)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                host.domain,
                host.enabled,
                host.group_id,
                host.webhook_url,
                locations,
            ],
        )?;
        let id = conn.last_insert_rowid();
        host.id = id;
        Ok(id)
    }

    /// Get all enabled proxy hosts.
    ///
    /// A row whose locations payload fails to decode is skipped with a
    /// warning rather than failing the whole read.
    pub fn enabled_proxy_hosts(&self) -> Result<Vec<ProxyHost>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, domain, group_id, webhook_url, locations
             FROM proxy_hosts WHERE enabled = 1",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut hosts = Vec::with_capacity(rows.len());
        for (id, domain, group_id, webhook_url, locations_json) in rows {
            let locations: Vec<Location> = match serde_json::from_str(&locations_json) {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("Skipping proxy host {} ({}): bad locations: {}", id, domain, e);
                    continue;
                }
            };
            hosts.push(ProxyHost {
                id,
                domain,
                enabled: true,
                group_id,
                webhook_url,
                locations,
            });
        }

        Ok(hosts)
    }

    // --- Stream ports ---

    /// Add a stream port and return its ID.
    pub fn add_stream_port(&self, stream: &mut StreamPort) -> Result<i64, DbError> {
        let upstreams = serde_json::to_string(&stream.upstreams)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO stream_ports (listen_port, protocol, enabled, group_id, webhook_url, upstreams)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stream.listen_port,
                stream.protocol.as_str(),
                stream.enabled,
                stream.group_id,
                stream.webhook_url,
                upstreams,
            ],
        )?;
        let id = conn.last_insert_rowid();
        stream.id = id;
        Ok(id)
    }

    /// Get all enabled stream ports, skipping rows with bad payloads.
    pub fn enabled_stream_ports(&self) -> Result<Vec<StreamPort>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, listen_port, protocol, group_id, webhook_url, upstreams
             FROM stream_ports WHERE enabled = 1",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, u16>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut streams = Vec::with_capacity(rows.len());
        for (id, listen_port, protocol, group_id, webhook_url, upstreams_json) in rows {
            let protocol = match Protocol::from_str(&protocol) {
                Some(p) => p,
                None => {
                    tracing::warn!("Skipping stream port {}: unknown protocol {}", id, protocol);
                    continue;
                }
            };
            let upstreams: Vec<UpstreamEndpoint> = match serde_json::from_str(&upstreams_json) {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!("Skipping stream port {}: bad upstreams: {}", id, e);
                    continue;
                }
            };
            streams.push(StreamPort {
                id,
                listen_port,
                protocol,
                enabled: true,
                group_id,
                webhook_url,
                upstreams,
            });
        }

        Ok(streams)
    }

    // --- Health history ---

    /// Get the most recent recorded status for an upstream, or None when
    /// it has never been probed. Ties on checked_at resolve to the latest
    /// insertion.
    pub fn latest_status(
        &self,
        entity_id: i64,
        entity_kind: EntityKind,
        upstream_key: &str,
    ) -> Result<Option<UpstreamStatus>, DbError> {
        let conn = self.conn.lock().unwrap();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM health_history
                 WHERE entity_id = ?1 AND entity_kind = ?2 AND upstream_key = ?3
                 ORDER BY checked_at DESC, id DESC LIMIT 1",
                params![entity_id, entity_kind.as_str(), upstream_key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(status.and_then(|s| UpstreamStatus::from_str(&s)))
    }

    /// Append a health record. Records are never updated in place.
    pub fn append_health(&self, record: &HealthRecord) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO health_history (entity_id, entity_kind, upstream_key, status, response_ms, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.entity_id,
                record.entity_kind.as_str(),
                record.upstream_key,
                record.status.as_str(),
                record.response_ms,
                fmt_db_time(record.checked_at),
            ],
        )?;
        Ok(())
    }

    /// Get recent health records for an upstream, newest first.
    pub fn health_history(
        &self,
        entity_id: i64,
        entity_kind: EntityKind,
        upstream_key: &str,
        limit: i64,
    ) -> Result<Vec<HealthRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT entity_id, entity_kind, upstream_key, status, response_ms, checked_at
             FROM health_history
             WHERE entity_id = ?1 AND entity_kind = ?2 AND upstream_key = ?3
             ORDER BY checked_at DESC, id DESC LIMIT ?4",
        )?;

        let rows = stmt
            .query_map(
                params![entity_id, entity_kind.as_str(), upstream_key, limit],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        let records = rows
            .into_iter()
            .filter_map(|(entity_id, kind, upstream_key, status, response_ms, checked_at)| {
                Some(HealthRecord {
                    entity_id,
                    entity_kind: EntityKind::from_str(&kind)?,
                    upstream_key,
                    status: UpstreamStatus::from_str(&status)?,
                    response_ms,
                    checked_at: parse_db_time(&checked_at)?,
                })
            })
            .collect();

        Ok(records)
    }

    /// Delete health records strictly older than the cutoff, across all
    /// entities. Returns the number of rows deleted.
    pub fn delete_health_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM health_history WHERE checked_at < ?1",
            params![fmt_db_time(cutoff)],
        )?;
        Ok(deleted)
    }
}

/// Format a datetime for storage. Lexicographic order matches
/// chronological order, so range comparisons work on the text column.
fn fmt_db_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
