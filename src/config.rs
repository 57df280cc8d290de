// src/config.rs
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{RavelError, RavelResult};

/// Maximum number of simultaneous connections (clients + backends).
pub const MAX_CONNECTIONS: usize = 10_000;

/// Maximum events retrieved per epoll_wait call.
pub const MAX_EVENTS_PER_WAIT: usize = 256;

/// Per-direction buffer capacity. 16 KiB holds most request heads plus a
/// small body without a second read.
pub const BUFFER_SIZE: usize = 16_384;

/// Kernel accept queue depth.
pub const LISTEN_BACKLOG: i32 = 511;

/// Backends stuck in the connecting state longer than this are failed.
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Connections idle longer than this are swept.
pub const IDLE_TIMEOUT_MS: u64 = 60_000;

/// Keep-alive reuse cap per client connection.
pub const MAX_REQUESTS_PER_CONN: u32 = 1_000;

/// Upper bound on a buffered request (head + body prefix).
pub const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// epoll_wait timeout; also the cadence of the maintenance sweep.
pub const WAIT_TIMEOUT_MS: i32 = 1_000;

/// HTTP head limits.
pub const MAX_HEADERS: usize = 64;
pub const MAX_HEADER_NAME: usize = 128;
pub const MAX_HEADER_VALUE: usize = 8_192;
pub const MAX_PATH: usize = 8_192;
pub const MAX_HOST: usize = 256;
pub const MAX_METHOD: usize = 16;

/// Forwarding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Byte-transparent TCP relay; one backend dialed per accepted client.
    Tcp,
    /// HTTP/1.x aware: parse and validate the request head, dial a fresh
    /// backend per request, keep the client alive across requests.
    Http,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Tcp => f.write_str("tcp"),
            Mode::Http => f.write_str("http"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Mode::Tcp),
            "http" => Ok(Mode::Http),
            other => Err(format!("unknown mode '{other}' (expected 'tcp' or 'http')")),
        }
    }
}

/// Runtime configuration for one proxy instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: Ipv4Addr,
    pub listen_port: u16,
    pub backend_addr: Ipv4Addr,
    pub backend_port: u16,
    pub mode: Mode,
    /// Pool capacity; defaults to [`MAX_CONNECTIONS`]. Kept configurable so
    /// exhaustion behavior is observable at small sizes.
    pub max_connections: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: Ipv4Addr::UNSPECIFIED,
            listen_port: 8080,
            backend_addr: Ipv4Addr::LOCALHOST,
            backend_port: 8081,
            mode: Mode::Http,
            max_connections: MAX_CONNECTIONS,
        }
    }
}

impl ProxyConfig {
    /// Reject configurations that cannot work before any socket is created.
    pub fn validate(&self) -> RavelResult<()> {
        if self.listen_port == 0 {
            return Err(RavelError::Config("listen port must be 1-65535".into()));
        }
        if self.backend_port == 0 {
            return Err(RavelError::Config("backend port must be 1-65535".into()));
        }
        if self.listen_addr == self.backend_addr && self.listen_port == self.backend_port {
            return Err(RavelError::Config(
                "listen and backend endpoints are identical; this would forward to itself".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(RavelError::Config("max_connections must be at least 1".into()));
        }
        if self.listen_port < 1024 {
            tracing::warn!(
                port = self.listen_port,
                "listen port is privileged; bind may require elevated rights"
            );
        }
        Ok(())
    }
}
