//! ravel — a single-threaded, edge-triggered epoll reverse proxy.
//!
//! Two modes share one forwarding engine: `tcp` relays bytes transparently
//! between each accepted client and a dedicated upstream connection; `http`
//! parses and validates the HTTP/1.x request head first, dials a fresh
//! upstream per request, and keeps the client connection alive across
//! requests.

pub mod buffer;
pub mod config;
pub mod conn;
pub mod error;
pub mod http;
pub mod logging;
pub mod parser;
pub mod proxy;
pub mod slab;
pub mod stats;
pub mod syscalls;

pub use config::{Mode, ProxyConfig};
pub use error::{RavelError, RavelResult};
pub use proxy::Proxy;
pub use stats::ProxyStats;
