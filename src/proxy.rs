//! The readiness-driven forwarding engine and the proxy core around it.
//!
//! One thread, one epoll instance. Every handler runs to completion without
//! blocking; the only suspension point is the epoll wait. Because the
//! registrations are edge-triggered, readable handlers drain their socket
//! until `WouldBlock` and writable handlers drain their buffer until empty
//! or `WouldBlock` — anything less would miss edges and wedge a connection.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::buffer::{ReadOutcome, WriteOutcome};
use crate::config::{
    Mode, ProxyConfig, CONNECT_TIMEOUT_MS, IDLE_TIMEOUT_MS, MAX_EVENTS_PER_WAIT,
    MAX_REQUESTS_PER_CONN, MAX_REQUEST_SIZE, WAIT_TIMEOUT_MS,
};
use crate::conn::{ConnId, ConnState, Role};
use crate::error::{RavelError, RavelResult};
use crate::http::{self, HttpRequest, Method};
use crate::parser::{self, ParseStatus};
use crate::slab::ConnectionSlab;
use crate::stats::ProxyStats;
use crate::syscalls::{self, epoll_event, Dial, Epoll, EV_ERROR, EV_READ, EV_WRITE};

/// Token the listener is registered under; never a valid slot id.
const LISTENER_TOKEN: u64 = u64::MAX;

/// Compact a fragmented write buffer once its tail shrinks below this.
const COMPACT_THRESHOLD: usize = 1024;

pub struct Proxy {
    config: ProxyConfig,
    epoll: Epoll,
    listen_fd: RawFd,
    slab: ConnectionSlab,
    stats: ProxyStats,
    shutdown_flag: Arc<AtomicBool>,
    finished: bool,
}

impl Proxy {
    /// Create the epoll instance, bind the listener and register it. Any
    /// failure here is fatal; the event loop is never entered.
    pub fn new(config: ProxyConfig) -> RavelResult<Self> {
        config.validate()?;

        let epoll = Epoll::new()?;
        let listen_fd = syscalls::create_listen_socket(config.listen_addr, config.listen_port)?;
        if let Err(e) = epoll.add(listen_fd, EV_READ, LISTENER_TOKEN) {
            syscalls::close_fd(listen_fd);
            return Err(e);
        }

        info!(
            listen = %format_args!("{}:{}", config.listen_addr, config.listen_port),
            backend = %format_args!("{}:{}", config.backend_addr, config.backend_port),
            mode = %config.mode,
            max_connections = config.max_connections,
            "proxy listening"
        );

        let slab = ConnectionSlab::new(config.max_connections);
        Ok(Self {
            config,
            epoll,
            listen_fd,
            slab,
            stats: ProxyStats::default(),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            finished: false,
        })
    }

    /// Flag that makes `run` return; safe to store from a signal handler.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown_flag.clone()
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Event loop. Blocks until the shutdown flag is observed; per-connection
    /// failures never escape, only a broken epoll wait does.
    pub fn run(&mut self) -> RavelResult<()> {
        syscalls::ignore_sigpipe();

        let mut events = vec![epoll_event { events: 0, u64: 0 }; MAX_EVENTS_PER_WAIT];
        let mut last_maintenance = syscalls::monotonic_ms();
        info!(mode = %self.config.mode, "proxy running");

        while !self.shutdown_flag.load(Ordering::Acquire) {
            let n = self.epoll.wait(&mut events, WAIT_TIMEOUT_MS)?;
            for i in 0..n {
                let token = events[i].u64;
                let flags = events[i].events;
                self.dispatch(token, flags);
            }

            let now = syscalls::monotonic_ms();
            if now.saturating_sub(last_maintenance) >= 1000 {
                last_maintenance = now;
                self.sweep(now);
            }
        }

        info!("shutdown requested; leaving event loop");
        Ok(())
    }

    /// Close every live connection and the listener, then report counters.
    /// Safe to call more than once; later calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        for id in self.slab.live_ids() {
            self.close_connection(id);
        }
        if self.listen_fd >= 0 {
            self.epoll.delete(self.listen_fd);
            syscalls::close_fd(self.listen_fd);
            self.listen_fd = -1;
        }
        self.stats.report(self.config.mode);
    }

    // ---- Event dispatch ----

    fn dispatch(&mut self, token: u64, flags: u32) {
        if token == LISTENER_TOKEN {
            self.handle_accept();
            return;
        }

        let id = token as ConnId;
        let Some(conn) = self.slab.get(id) else { return };
        // Slots recycle; an event for a slot that was closed earlier in this
        // same wake-up must be dropped on the floor.
        if !conn.is_valid() {
            return;
        }
        let state = conn.state;

        if flags & EV_ERROR != 0 {
            self.handle_error(id);
            return;
        }

        // Async connect completion rides the first writability edge.
        if state == ConnState::Connecting && flags & EV_WRITE != 0 {
            self.handle_connect(id);
            if self
                .slab
                .get(id)
                .is_some_and(|c| c.is_valid() && c.state == ConnState::Connected)
            {
                self.handle_write(id);
            }
            return;
        }

        // Writes before reads: draining outbound buffers first frees space
        // that the backpressure predicate needs before it re-enables reads.
        if flags & EV_WRITE != 0 {
            self.handle_write(id);
        }
        if flags & EV_READ != 0 && self.slab.get(id).is_some_and(|c| c.is_valid()) {
            self.handle_read(id);
        }
    }

    // ---- Accept ----

    fn handle_accept(&mut self) {
        loop {
            let client_fd = match syscalls::accept_connection(self.listen_fd) {
                Ok(Some(fd)) => fd,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            };

            if let Err(e) = syscalls::set_socket_options(client_fd) {
                debug!(error = %e, "client socket options");
                syscalls::close_fd(client_fd);
                continue;
            }

            let Some(client_id) = self.alloc_conn() else {
                warn!("connection pool exhausted; rejecting client");
                syscalls::close_fd(client_fd);
                continue;
            };

            let now = syscalls::monotonic_ms();
            match self.config.mode {
                Mode::Http => {
                    let conn = self.slab.get_mut(client_id).expect("allocated slot");
                    conn.init(client_fd, Role::Client, ConnState::ReadingRequest, now);
                    conn.request = Some(HttpRequest::new());
                    if let Err(e) = self.epoll.add(client_fd, EV_READ, client_id as u64) {
                        debug!(error = %e, "register client");
                        self.close_connection(client_id);
                    }
                }
                Mode::Tcp => {
                    self.slab
                        .get_mut(client_id)
                        .expect("allocated slot")
                        .init(client_fd, Role::Client, ConnState::Connected, now);
                    if let Err(e) = self.epoll.add(client_fd, EV_READ, client_id as u64) {
                        debug!(error = %e, "register client");
                        self.close_connection(client_id);
                        continue;
                    }
                    // TCP relay pairs eagerly: one upstream per client.
                    self.dial_backend(client_id);
                }
            }
        }
    }

    fn alloc_conn(&mut self) -> Option<ConnId> {
        let id = self.slab.alloc()?;
        self.stats.total_connections += 1;
        self.stats.active_connections += 1;
        Some(id)
    }

    /// Dial the upstream for `client_id`, allocate, pair and register a
    /// backend slot. On failure the client is torn down (TCP) or answered
    /// with 502/503 (HTTP) and `None` is returned.
    fn dial_backend(&mut self, client_id: ConnId) -> Option<ConnId> {
        let dial =
            match syscalls::connect_backend(self.config.backend_addr, self.config.backend_port) {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "backend dial failed");
                    self.stats.errors += 1;
                    match self.config.mode {
                        Mode::Tcp => self.close_connection(client_id),
                        Mode::Http => self.queue_http_error(client_id, 502, "Bad Gateway"),
                    }
                    return None;
                }
            };

        let (backend_fd, state) = match dial {
            Dial::Connected(fd) => (fd, ConnState::Connected),
            Dial::Connecting(fd) => (fd, ConnState::Connecting),
        };

        let Some(backend_id) = self.alloc_conn() else {
            warn!("connection pool exhausted for backend");
            syscalls::close_fd(backend_fd);
            match self.config.mode {
                Mode::Tcp => self.close_connection(client_id),
                Mode::Http => self.queue_http_error(client_id, 503, "Service Unavailable"),
            }
            return None;
        };

        let now = syscalls::monotonic_ms();
        self.slab
            .get_mut(backend_id)
            .expect("allocated slot")
            .init(backend_fd, Role::Backend, state, now);
        self.pair(client_id, backend_id);

        if let Err(e) = self
            .epoll
            .add(backend_fd, self.interest_for(backend_id), backend_id as u64)
        {
            warn!(error = %e, "register backend");
            self.stats.errors += 1;
            match self.config.mode {
                Mode::Tcp => self.close_pair(backend_id),
                Mode::Http => {
                    self.close_connection(backend_id);
                    self.queue_http_error(client_id, 502, "Bad Gateway");
                }
            }
            return None;
        }

        Some(backend_id)
    }

    // ---- Read path ----

    fn handle_read(&mut self, id: ConnId) {
        let Some(conn) = self.slab.get(id) else { return };
        if !conn.is_valid() {
            return;
        }
        if self.config.mode == Mode::Http && conn.role == Role::Client {
            self.handle_read_http_client(id);
        } else {
            self.handle_read_relay(id);
        }
    }

    /// Byte relay: drain the socket, forwarding to the peer after each read.
    /// Used by both sides in TCP mode and by backends in HTTP mode.
    fn handle_read_relay(&mut self, id: ConnId) {
        // No re-arm on a backpressured entry; the next edge arrives either
        // with fresh data or via the peer's drain re-enabling us.
        if !self.slab.can_read(id) {
            return;
        }
        let Some(peer) = self.slab.get(id).and_then(|c| c.peer) else { return };

        loop {
            let outcome = {
                let conn = self.slab.get_mut(id).expect("checked above");
                let fd = conn.fd;
                conn.read_buf.read_from(fd)
            };
            match outcome {
                Ok(ReadOutcome::Data(n)) => {
                    let now = syscalls::monotonic_ms();
                    if let Some(c) = self.slab.get_mut(id) {
                        c.touch(now);
                    }
                    self.stats.bytes_received += n as u64;
                    self.forward(id, peer);
                    if !self.slab.can_read(id) {
                        // Peer filled up mid-drain; stop reading and let the
                        // kernel window absorb the rest.
                        break;
                    }
                }
                Ok(ReadOutcome::Eof) => {
                    self.close_pair(id);
                    return;
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Err(RavelError::NoSpace) => break,
                Err(RavelError::Io(e)) => {
                    if e.raw_os_error() != Some(libc::ECONNRESET) {
                        warn!(error = %e, "relay read failed");
                    }
                    self.stats.errors += 1;
                    self.close_pair(id);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "relay read failed");
                    self.stats.errors += 1;
                    self.close_pair(id);
                    return;
                }
            }
        }

        self.update_interest(id);
        self.update_interest(peer);
    }

    /// HTTP clients do not forward raw bytes; every read feeds the head
    /// parser until a complete request is recognized or rejected.
    fn handle_read_http_client(&mut self, id: ConnId) {
        if !self
            .slab
            .get(id)
            .is_some_and(|c| c.is_valid() && c.state == ConnState::ReadingRequest)
        {
            return;
        }

        loop {
            let outcome = {
                let conn = self.slab.get_mut(id).expect("checked above");
                let fd = conn.fd;
                conn.read_buf.read_from(fd)
            };
            match outcome {
                Ok(ReadOutcome::Data(n)) => {
                    let now = syscalls::monotonic_ms();
                    self.stats.bytes_received += n as u64;

                    // (complete?, valid?, method) of the parse attempt; an
                    // error is reported as None.
                    let step: Option<(bool, bool, Method)> = {
                        let conn = self.slab.get_mut(id).expect("checked above");
                        conn.touch(now);
                        let req = conn.request.get_or_insert_with(HttpRequest::new);
                        match parser::parse(req, conn.read_buf.readable()) {
                            Ok(ParseStatus::Complete) => {
                                conn.state = ConnState::RequestComplete;
                                Some((true, req.is_valid(), req.method))
                            }
                            Ok(ParseStatus::NeedMore) => {
                                // With the head parsed, semantic limits can
                                // already be enforced; no point waiting for a
                                // body that is over the cap.
                                let head_invalid = req.head_end > 0 && !req.is_valid();
                                Some((false, !head_invalid, req.method))
                            }
                            Err(e) => {
                                debug!(error = %e, "rejecting request");
                                None
                            }
                        }
                    };

                    match step {
                        Some((true, true, method)) => {
                            self.stats.requests_total += 1;
                            match method {
                                Method::Get => self.stats.requests_get += 1,
                                Method::Post => self.stats.requests_post += 1,
                                _ => {}
                            }
                            self.dispatch_http_request(id);
                            return;
                        }
                        Some((_, false, _)) => {
                            self.stats.requests_error += 1;
                            self.queue_http_error(id, 400, "Bad Request");
                            return;
                        }
                        Some((false, true, _)) => continue,
                        None => {
                            self.stats.requests_error += 1;
                            self.queue_http_error(id, 400, "Malformed Request");
                            return;
                        }
                    }
                }
                Ok(ReadOutcome::Eof) => {
                    self.close_connection(id);
                    return;
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Err(RavelError::NoSpace) => {
                    // Head plus body prefix outgrew the connection buffer.
                    self.stats.requests_error += 1;
                    self.queue_http_error(id, 413, "Request Too Large");
                    return;
                }
                Err(e) => {
                    debug!(error = %e, "client read failed");
                    self.stats.errors += 1;
                    self.close_connection(id);
                    return;
                }
            }
        }

        // Belt over the buffer-full check for configurations where the
        // buffer outsizes the request cap.
        let oversized = self
            .slab
            .get(id)
            .is_some_and(|c| c.read_buf.readable_len() > MAX_REQUEST_SIZE);
        if oversized {
            self.stats.requests_error += 1;
            self.queue_http_error(id, 413, "Request Too Large");
        }
    }

    /// A complete, valid request sits at the front of the client read
    /// buffer: dial a fresh upstream and hand the head (plus any buffered
    /// body prefix) to it.
    fn dispatch_http_request(&mut self, client_id: ConnId) {
        let (total_length, keep_alive, buffered) = {
            let conn = self.slab.get(client_id).expect("caller validated");
            let req = conn.request.as_ref().expect("complete request");
            (req.total_length, req.keep_alive, conn.read_buf.readable_len())
        };
        if total_length > buffered {
            // Completeness said otherwise; treat as a framing failure.
            self.stats.requests_error += 1;
            self.queue_http_error(client_id, 400, "Bad Request");
            return;
        }

        let Some(backend_id) = self.dial_backend(client_id) else {
            return;
        };

        {
            let (client, backend) = self
                .slab
                .get2_mut(client_id, backend_id)
                .expect("distinct live slots");
            let copied = backend
                .write_buf
                .append(&client.read_buf.readable()[..total_length]);
            debug_assert_eq!(copied, total_length);
            client.read_buf.clear();
            client.keep_alive = keep_alive;
            client.state = ConnState::WritingResponse;
        }

        self.update_interest(client_id);
        self.update_interest(backend_id);
    }

    // ---- Write path ----

    fn handle_write(&mut self, id: ConnId) {
        if !self.slab.can_write(id) {
            return;
        }
        let role = self.slab.get(id).expect("checked above").role;

        loop {
            let outcome = {
                let conn = self.slab.get_mut(id).expect("checked above");
                let fd = conn.fd;
                conn.write_buf.write_to(fd)
            };
            match outcome {
                Ok(WriteOutcome::Data(n)) => {
                    let now = syscalls::monotonic_ms();
                    let conn = self.slab.get_mut(id).expect("checked above");
                    conn.touch(now);
                    self.stats.bytes_sent += n as u64;
                    if conn.write_buf.is_empty() {
                        break;
                    }
                }
                Ok(WriteOutcome::WouldBlock) => break,
                Err(RavelError::Io(e)) => {
                    let quiet = matches!(
                        e.raw_os_error(),
                        Some(libc::EPIPE) | Some(libc::ECONNRESET)
                    );
                    if !quiet {
                        warn!(error = %e, "write failed");
                    }
                    self.stats.errors += 1;
                    if self.config.mode == Mode::Http && role == Role::Client {
                        self.close_connection(id);
                    } else {
                        self.close_pair(id);
                    }
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "write failed");
                    self.stats.errors += 1;
                    self.close_pair(id);
                    return;
                }
            }
        }

        // An HTTP client that flushed its response either goes around for
        // the next request or is done.
        if self.config.mode == Mode::Http && role == Role::Client {
            let flushed = self.slab.get(id).is_some_and(|c| {
                c.is_valid() && c.state == ConnState::WritingResponse && c.write_buf.is_empty()
            });
            if flushed {
                let keep_alive = self.slab.get(id).expect("checked above").keep_alive;
                if !keep_alive {
                    self.close_connection(id);
                    return;
                }
                let conn = self.slab.get_mut(id).expect("checked above");
                conn.requests_handled += 1;
                let handled = conn.requests_handled;
                if handled >= MAX_REQUESTS_PER_CONN {
                    debug!(id, "keep-alive reuse limit reached");
                    self.close_connection(id);
                    return;
                }
                conn.read_buf.clear();
                conn.write_buf.clear();
                conn.request = Some(HttpRequest::new());
                conn.state = ConnState::ReadingRequest;
                // The first response on a connection is not a reuse.
                if handled > 1 {
                    self.stats.keep_alive_reused += 1;
                }
            }
        }

        self.update_interest(id);
        if let Some(peer) = self.slab.get(id).and_then(|c| c.peer) {
            self.update_interest(peer);
        }
    }

    // ---- Connect completion / errors ----

    fn handle_connect(&mut self, id: ConnId) {
        let Some(conn) = self.slab.get(id) else { return };
        let fd = conn.fd;

        match syscalls::take_socket_error(fd) {
            Ok(None) => {
                let now = syscalls::monotonic_ms();
                let conn = self.slab.get_mut(id).expect("checked above");
                conn.state = ConnState::Connected;
                conn.touch(now);
                self.update_interest(id);
            }
            Ok(Some(err)) => {
                debug!(error = %err, "backend connect failed");
                self.stats.errors += 1;
                self.fail_backend_connect(id);
            }
            Err(err) => {
                debug!(error = %err, "SO_ERROR probe failed");
                self.stats.errors += 1;
                self.fail_backend_connect(id);
            }
        }
    }

    /// A backend that never became usable: in HTTP mode the paired client
    /// gets a 502 and lives to hear it; in TCP mode the pair dies.
    fn fail_backend_connect(&mut self, backend_id: ConnId) {
        let client = self.slab.get(backend_id).and_then(|c| c.peer);
        match (self.config.mode, client) {
            (Mode::Http, Some(client_id)) => {
                self.close_connection(backend_id);
                self.queue_http_error(client_id, 502, "Bad Gateway");
            }
            _ => self.close_pair(backend_id),
        }
    }

    fn handle_error(&mut self, id: ConnId) {
        let Some(conn) = self.slab.get(id) else { return };
        if !conn.is_valid() {
            return;
        }
        let (fd, role, state) = (conn.fd, conn.role, conn.state);

        if let Ok(Some(err)) = syscalls::take_socket_error(fd) {
            if !matches!(
                err.raw_os_error(),
                Some(libc::ECONNRESET) | Some(libc::EPIPE)
            ) {
                debug!(fd, error = %err, "connection error");
            }
        }
        self.stats.errors += 1;

        match (self.config.mode, role, state) {
            // A failing client must not take its backend down mid-exchange.
            (Mode::Http, Role::Client, _) => self.close_connection(id),
            // Refused dials surface as error edges; the client still gets
            // its 502.
            (Mode::Http, Role::Backend, ConnState::Connecting) => self.fail_backend_connect(id),
            _ => self.close_pair(id),
        }
    }

    // ---- Forwarding and bookkeeping ----

    /// Move bytes from `src`'s read buffer into `dst`'s write buffer.
    fn forward(&mut self, src: ConnId, dst: ConnId) -> usize {
        let Some((s, d)) = self.slab.get2_mut(src, dst) else {
            return 0;
        };
        if d.write_buf.writable_len() < COMPACT_THRESHOLD {
            d.write_buf.compact();
        }
        let n = d.write_buf.append(s.read_buf.readable());
        s.read_buf.consume(n);
        n
    }

    /// Queue a self-generated error response on an HTTP client. The
    /// connection always closes after the flush; if even the canned head
    /// does not fit, close now rather than truncate.
    fn queue_http_error(&mut self, id: ConnId, status: u16, reason: &str) {
        let Some(conn) = self.slab.get_mut(id) else { return };
        if !conn.is_valid() {
            return;
        }
        let response = http::error_response(status, reason);
        if conn.write_buf.writable_len() < response.len() {
            self.close_connection(id);
            return;
        }
        conn.write_buf.append(response.as_bytes());
        conn.keep_alive = false;
        conn.state = ConnState::WritingResponse;
        conn.request = None;
        debug!(status, "queued error response");
        self.update_interest(id);
    }

    /// Link two slots as a relay pair, breaking any stale link first so the
    /// relationship stays bidirectional.
    fn pair(&mut self, a: ConnId, b: ConnId) {
        self.unpair(a);
        self.unpair(b);
        if let Some(c) = self.slab.get_mut(a) {
            c.peer = Some(b);
        }
        if let Some(c) = self.slab.get_mut(b) {
            c.peer = Some(a);
        }
    }

    fn unpair(&mut self, id: ConnId) {
        let peer = self.slab.get_mut(id).and_then(|c| c.peer.take());
        if let Some(p) = peer {
            if let Some(pc) = self.slab.get_mut(p) {
                pc.peer = None;
            }
        }
    }

    /// Tear one connection down: deregister, close the fd, null the pairing
    /// on both sides, release the slot. Idempotent.
    fn close_connection(&mut self, id: ConnId) {
        let Some(conn) = self.slab.get_mut(id) else { return };
        if conn.state == ConnState::Closed {
            return;
        }
        conn.state = ConnState::Closing;
        let fd = conn.fd;
        let peer = conn.peer.take();

        if let Some(p) = peer {
            if let Some(pc) = self.slab.get_mut(p) {
                pc.peer = None;
            }
        }
        if fd >= 0 {
            self.epoll.delete(fd);
            syscalls::close_fd(fd);
        }
        self.slab.free(id);
        self.stats.active_connections = self.stats.active_connections.saturating_sub(1);
    }

    /// Close both halves of a relay. The peer id is snapshotted first
    /// because closing one side unpairs the other.
    fn close_pair(&mut self, id: ConnId) {
        let peer = self.slab.get(id).and_then(|c| c.peer);
        self.close_connection(id);
        if let Some(p) = peer {
            self.close_connection(p);
        }
    }

    fn interest_for(&self, id: ConnId) -> u32 {
        let mut interest = 0;
        if self.slab.can_read(id) {
            interest |= EV_READ;
        }
        if self.slab.wants_write(id) {
            interest |= EV_WRITE;
        }
        if interest == 0 {
            // Keep a minimal registration so error and hangup edges still
            // arrive for an otherwise-quiescent connection.
            interest = EV_READ;
        }
        interest
    }

    /// Re-sync the epoll mask with the predicates. Called after every
    /// handler that may have changed buffer occupancy or state.
    fn update_interest(&mut self, id: ConnId) {
        let Some(conn) = self.slab.get(id) else { return };
        if !conn.is_valid() {
            return;
        }
        let fd = conn.fd;
        let interest = self.interest_for(id);
        if let Err(e) = self.epoll.modify(fd, interest, id as u64) {
            debug!(fd, error = %e, "epoll modify on dying fd");
        }
    }

    // ---- Maintenance ----

    /// Once-per-second scan: fail backends stuck in their connect, reap
    /// idle connections.
    fn sweep(&mut self, now: u64) {
        for id in self.slab.live_ids() {
            let Some(conn) = self.slab.get(id) else { continue };
            if !conn.is_valid() {
                continue;
            }
            let idle = now.saturating_sub(conn.last_active);
            if conn.state == ConnState::Connecting && idle > CONNECT_TIMEOUT_MS {
                debug!(id, "backend connect timed out");
                self.stats.errors += 1;
                self.fail_backend_connect(id);
            } else if idle > IDLE_TIMEOUT_MS {
                debug!(id, idle_ms = idle, "reaping idle connection");
                self.close_pair(id);
            }
        }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}
