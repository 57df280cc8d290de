// src/conn.rs
use std::os::fd::RawFd;

use crate::buffer::Buffer;
use crate::config::BUFFER_SIZE;
use crate::http::HttpRequest;

/// Stable slot identifier inside the connection pool.
pub type ConnId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Slot free; fd invalid, never paired.
    Closed,
    /// Backend with an async connect in flight.
    Connecting,
    /// Established and relaying.
    Connected,
    /// HTTP client accumulating its request head.
    ReadingRequest,
    /// HTTP client with a complete, validated request (transient).
    RequestComplete,
    /// HTTP client receiving its response.
    WritingResponse,
    /// Teardown in progress (transient).
    Closing,
}

/// Per-socket record. One per client, one per backend; the `peer` link ties
/// the two halves of a relay together.
pub struct Conn {
    pub fd: RawFd,
    pub role: Role,
    pub state: ConnState,
    pub peer: Option<ConnId>,
    /// Bytes read FROM this socket, awaiting forwarding to the peer.
    pub read_buf: Buffer,
    /// Bytes to be written TO this socket, produced by the peer.
    pub write_buf: Buffer,
    /// Monotonic milliseconds of the last successful I/O.
    pub last_active: u64,
    /// HTTP clients only: parse state of the in-flight request head.
    pub request: Option<HttpRequest>,
    pub keep_alive: bool,
    pub requests_handled: u32,
}

impl Conn {
    pub fn empty() -> Self {
        Self {
            fd: -1,
            role: Role::Client,
            state: ConnState::Closed,
            peer: None,
            read_buf: Buffer::new(BUFFER_SIZE),
            write_buf: Buffer::new(BUFFER_SIZE),
            last_active: 0,
            request: None,
            keep_alive: false,
            requests_handled: 0,
        }
    }

    /// Prepare a freshly-allocated slot for a new socket.
    pub fn init(&mut self, fd: RawFd, role: Role, state: ConnState, now: u64) {
        self.fd = fd;
        self.role = role;
        self.state = state;
        self.peer = None;
        self.read_buf.clear();
        self.write_buf.clear();
        self.last_active = now;
        self.request = None;
        self.keep_alive = false;
        self.requests_handled = 0;
    }

    /// Return the slot to its tombstone state. The fd must already be closed
    /// and the pairing already broken.
    pub fn reset(&mut self) {
        self.fd = -1;
        self.state = ConnState::Closed;
        self.peer = None;
        self.read_buf.clear();
        self.write_buf.clear();
        self.request = None;
        self.keep_alive = false;
        self.requests_handled = 0;
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state != ConnState::Closed && self.fd >= 0
    }

    #[inline]
    pub fn touch(&mut self, now: u64) {
        self.last_active = now;
    }
}
