//! End-to-end tests: a live proxy on a background thread, real sockets on
//! loopback, and scripted upstreams.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ravel::{Mode, Proxy, ProxyConfig};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct ProxyHandle {
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<Proxy>,
    port: u16,
}

impl ProxyHandle {
    fn start(mode: Mode, backend_port: u16, max_connections: usize) -> Self {
        let port = free_port();
        let config = ProxyConfig {
            listen_addr: Ipv4Addr::LOCALHOST,
            listen_port: port,
            backend_addr: Ipv4Addr::LOCALHOST,
            backend_port,
            mode,
            max_connections,
        };
        let mut proxy = Proxy::new(config).expect("proxy startup");
        let shutdown = proxy.shutdown_handle();
        let thread = thread::spawn(move || {
            proxy.run().expect("event loop");
            proxy.shutdown();
            proxy
        });
        Self {
            shutdown,
            thread,
            port,
        }
    }

    fn connect(&self) -> TcpStream {
        for _ in 0..100 {
            if let Ok(stream) = TcpStream::connect(("127.0.0.1", self.port)) {
                stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
                stream.set_nodelay(true).unwrap();
                return stream;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("could not connect to proxy on port {}", self.port);
    }

    /// Signal shutdown and hand back the proxy for counter inspection.
    fn stop(self) -> Proxy {
        self.shutdown.store(true, Ordering::SeqCst);
        self.thread.join().expect("proxy thread")
    }
}

/// Upstream that echoes every byte back, one thread per connection.
fn start_echo_upstream() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        while let Ok((mut conn, _)) = listener.accept() {
            thread::spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match conn.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if conn.write_all(&buf[..n]).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

const UPSTREAM_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

/// Read one HTTP request (head, plus Content-Length body if present).
fn read_http_request(conn: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let head_end = data
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|p| p + 4);
        if let Some(head_end) = head_end {
            let head = String::from_utf8_lossy(&data[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if data.len() >= head_end + content_length {
                return Ok(data);
            }
        }
        let n = conn.read(&mut buf)?;
        if n == 0 {
            return Ok(data);
        }
        data.extend_from_slice(&buf[..n]);
    }
}

/// HTTP upstream: answers every request with `UPSTREAM_RESPONSE`, records
/// what it received, and holds each connection open until the peer closes.
fn start_http_upstream() -> (u16, Arc<AtomicUsize>, Arc<Mutex<Vec<Vec<u8>>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let conns = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let conns_clone = conns.clone();
    let requests_clone = requests.clone();
    thread::spawn(move || {
        while let Ok((mut conn, _)) = listener.accept() {
            conns_clone.fetch_add(1, Ordering::SeqCst);
            let requests = requests_clone.clone();
            thread::spawn(move || {
                conn.set_read_timeout(Some(Duration::from_secs(30))).ok();
                if let Ok(request) = read_http_request(&mut conn) {
                    if !request.is_empty() {
                        requests.lock().unwrap().push(request);
                        let _ = conn.write_all(UPSTREAM_RESPONSE);
                    }
                }
                // Stay open; the proxy decides when this connection dies.
                let mut sink = [0u8; 256];
                loop {
                    match conn.read(&mut sink) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            });
        }
    });

    (port, conns, requests)
}

/// Client sockets should stay open: a read must time out, not return EOF.
fn assert_still_open(stream: &mut TcpStream) {
    stream
        .set_read_timeout(Some(Duration::from_millis(300)))
        .unwrap();
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(0) => panic!("connection was closed by the proxy"),
        Ok(_) => panic!("unexpected data from the proxy"),
        Err(e) => assert!(
            matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
            "unexpected error: {e}"
        ),
    }
    stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
}

#[test]
fn tcp_mode_round_trips_bytes() {
    let upstream_port = start_echo_upstream();
    let proxy = ProxyHandle::start(Mode::Tcp, upstream_port, 64);

    let mut client = proxy.connect();
    client.write_all(b"hello\n").unwrap();

    let mut echoed = [0u8; 6];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"hello\n");

    drop(client);
    let proxy = proxy.stop();
    assert!(proxy.stats().bytes_received >= 6);
    assert!(proxy.stats().bytes_sent >= 6);
}

#[test]
fn tcp_mode_round_trips_large_payload_in_order() {
    let upstream_port = start_echo_upstream();
    let proxy = ProxyHandle::start(Mode::Tcp, upstream_port, 64);

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

    let mut client = proxy.connect();
    let mut writer = client.try_clone().unwrap();
    let to_send = payload.clone();
    let sender = thread::spawn(move || {
        writer.write_all(&to_send).unwrap();
    });

    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).unwrap();
    sender.join().unwrap();

    assert_eq!(echoed, payload);
    proxy.stop();
}

#[test]
fn http_get_keep_alive_reuses_the_client_connection() {
    let (upstream_port, conns, _) = start_http_upstream();
    let proxy = ProxyHandle::start(Mode::Http, upstream_port, 64);

    let mut client = proxy.connect();
    let mut response = vec![0u8; UPSTREAM_RESPONSE.len()];

    client
        .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    client.read_exact(&mut response).unwrap();
    assert_eq!(response, UPSTREAM_RESPONSE);

    client
        .write_all(b"GET /b HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    client.read_exact(&mut response).unwrap();
    assert_eq!(response, UPSTREAM_RESPONSE);

    // One upstream dial per request, and the client survived both.
    assert_eq!(conns.load(Ordering::SeqCst), 2);
    assert_still_open(&mut client);

    drop(client);
    let proxy = proxy.stop();
    assert_eq!(proxy.stats().requests_total, 2);
    assert_eq!(proxy.stats().requests_get, 2);
    assert_eq!(proxy.stats().keep_alive_reused, 1);
}

#[test]
fn http_post_forwards_exactly_the_declared_body() {
    let (upstream_port, _, requests) = start_http_upstream();
    let proxy = ProxyHandle::start(Mode::Http, upstream_port, 64);

    let raw = b"POST /p HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
    let mut client = proxy.connect();
    client.write_all(raw).unwrap();

    let mut response = vec![0u8; UPSTREAM_RESPONSE.len()];
    client.read_exact(&mut response).unwrap();
    assert_eq!(response, UPSTREAM_RESPONSE);

    let seen = requests.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], raw.to_vec());

    drop(seen);
    drop(client);
    let proxy = proxy.stop();
    assert_eq!(proxy.stats().requests_post, 1);
}

#[test]
fn http_connection_close_is_honored() {
    let (upstream_port, _, _) = start_http_upstream();
    let proxy = ProxyHandle::start(Mode::Http, upstream_port, 64);

    let mut client = proxy.connect();
    client
        .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut everything = Vec::new();
    client.read_to_end(&mut everything).unwrap();
    assert_eq!(everything, UPSTREAM_RESPONSE);

    proxy.stop();
}

#[test]
fn http_malformed_request_gets_400_then_close() {
    let (upstream_port, conns, _) = start_http_upstream();
    let proxy = ProxyHandle::start(Mode::Http, upstream_port, 64);

    let mut client = proxy.connect();
    client.write_all(b"GET\r\n\r\n").unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(
        text.starts_with("HTTP/1.1 400 Bad Request\r\n"),
        "got: {text}"
    );
    assert!(text.contains("Connection: close\r\n"));

    // The bad request never reached the upstream.
    assert_eq!(conns.load(Ordering::SeqCst), 0);

    let proxy = proxy.stop();
    assert_eq!(proxy.stats().requests_error, 1);
}

#[test]
fn http_unreachable_upstream_gets_502() {
    let dead_port = free_port();
    let proxy = ProxyHandle::start(Mode::Http, dead_port, 64);

    let mut client = proxy.connect();
    client
        .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(
        text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"),
        "got: {text}"
    );

    proxy.stop();
}

#[test]
fn http_oversized_content_length_gets_400() {
    let (upstream_port, conns, _) = start_http_upstream();
    let proxy = ProxyHandle::start(Mode::Http, upstream_port, 64);

    // 100 MiB + 1: parses fine, fails validation.
    let raw = format!(
        "POST /big HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
        100 * 1024 * 1024 + 1
    );
    let mut client = proxy.connect();
    client.write_all(raw.as_bytes()).unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(
        text.starts_with("HTTP/1.1 400 Bad Request\r\n"),
        "got: {text}"
    );
    assert_eq!(conns.load(Ordering::SeqCst), 0);

    proxy.stop();
}

#[test]
fn tcp_pool_exhaustion_rejects_new_clients_only() {
    let upstream_port = start_echo_upstream();
    // Two slots: exactly one client+backend pair fits.
    let proxy = ProxyHandle::start(Mode::Tcp, upstream_port, 2);

    let mut first = proxy.connect();
    first.write_all(b"ping").unwrap();
    let mut buf = [0u8; 4];
    first.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    // The second client is accepted by the kernel but dropped by the proxy.
    let mut second = proxy.connect();
    second.write_all(b"x").ok();
    let mut sink = Vec::new();
    let n = second.read_to_end(&mut sink).unwrap_or(0);
    assert_eq!(n, 0, "rejected client should see EOF");

    // The established pair is undisturbed.
    first.write_all(b"pong").unwrap();
    first.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"pong");

    drop(first);
    let proxy = proxy.stop();
    assert_eq!(proxy.stats().total_connections, 2);
}

#[test]
fn shutdown_is_idempotent() {
    let upstream_port = start_echo_upstream();
    let proxy = ProxyHandle::start(Mode::Tcp, upstream_port, 8);
    let _client = proxy.connect();
    thread::sleep(Duration::from_millis(100));

    let mut proxy = proxy.stop();
    // run() already triggered shutdown in the proxy thread; these must be
    // harmless no-ops (Drop adds a third call).
    proxy.shutdown();
    proxy.shutdown();
}
