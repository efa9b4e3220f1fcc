//! TCP reachability probe.
//!
//! A probe is a bare connect: the socket is closed as soon as it opens,
//! no application data is exchanged.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::db::UpstreamStatus;

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Outcome of a single reachability check.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status: UpstreamStatus,
    /// Wall-clock time from probe start to resolution.
    pub elapsed_ms: i64,
    /// Diagnostic for Down outcomes; None when Up.
    pub error: Option<String>,
}

/// Probe a single (server, port) endpoint.
///
/// Resolves exactly once: the connect races the timer, and the losing
/// branch is dropped, which closes any socket that arrives late. DNS
/// failures and refused connections surface through the connect error.
pub async fn probe(server: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    let addr = format!("{}:{}", server, port);
    let start = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            let elapsed_ms = start.elapsed().as_millis() as i64;
            drop(stream);
            ProbeOutcome {
                status: UpstreamStatus::Up,
                elapsed_ms,
                error: None,
            }
        }
        Ok(Err(e)) => ProbeOutcome {
            status: UpstreamStatus::Down,
            elapsed_ms: start.elapsed().as_millis() as i64,
            error: Some(format!("connection failed: {}", e)),
        },
        Err(_) => ProbeOutcome {
            status: UpstreamStatus::Down,
            elapsed_ms: start.elapsed().as_millis() as i64,
            error: Some(format!("timed out after {}ms", timeout.as_millis())),
        },
    }
}
