//! Time utilities

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Split a duration into whole minutes and leftover whole seconds
pub fn minutes_seconds(remaining: Duration) -> (u64, u64) {
    let millis = remaining.as_millis() as u64;
    (millis / 60_000, (millis % 60_000) / 1_000)
}
