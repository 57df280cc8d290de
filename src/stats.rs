// src/stats.rs
use crate::config::Mode;

/// Per-proxy counters. The event loop is the only writer, so these are plain
/// integers rather than atomics.
#[derive(Debug, Default, Clone)]
pub struct ProxyStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub errors: u64,
    pub requests_total: u64,
    pub requests_get: u64,
    pub requests_post: u64,
    pub requests_error: u64,
    pub keep_alive_reused: u64,
}

impl ProxyStats {
    /// Emit the lifetime counters, typically once at shutdown.
    pub fn report(&self, mode: Mode) {
        tracing::info!(
            %mode,
            total_connections = self.total_connections,
            active_connections = self.active_connections,
            bytes_received = self.bytes_received,
            bytes_sent = self.bytes_sent,
            errors = self.errors,
            "proxy statistics"
        );
        if mode == Mode::Http {
            tracing::info!(
                requests_total = self.requests_total,
                requests_get = self.requests_get,
                requests_post = self.requests_post,
                requests_error = self.requests_error,
                keep_alive_reused = self.keep_alive_reused,
                "http statistics"
            );
        }
    }
}
