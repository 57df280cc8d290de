//! Raw socket and epoll plumbing.
//!
//! Everything here is non-blocking: descriptors get `O_NONBLOCK` before any
//! I/O, and the epoll registration is always edge-triggered. Callers own the
//! drain-until-`WouldBlock` discipline that edge triggering demands.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;
use std::ptr;

use libc::{c_int, c_void, socklen_t};

use crate::config::LISTEN_BACKLOG;
use crate::error::RavelResult;

pub const EV_READ: u32 = libc::EPOLLIN as u32;
pub const EV_WRITE: u32 = libc::EPOLLOUT as u32;
pub const EV_ERROR: u32 =
    (libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLRDHUP) as u32;

pub use libc::epoll_event;

/// Monotonic clock in milliseconds; immune to wall-clock adjustments.
pub fn monotonic_ms() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000
}

/// SIGPIPE would kill the process on a write to a reset connection; EPIPE
/// from `write` is handled per-connection instead.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

pub fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

pub fn set_nonblocking(fd: RawFd) -> RavelResult<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}

fn setsockopt_int(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    unsafe {
        if libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const c_void,
            mem::size_of_val(&value) as socklen_t,
        ) < 0
        {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Apply the standard option set, in order: SO_REUSEADDR, SO_REUSEPORT,
/// SO_KEEPALIVE, TCP_NODELAY. Only SO_REUSEADDR failure is fatal; the rest
/// are quality-of-service options.
pub fn set_socket_options(fd: RawFd) -> RavelResult<()> {
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
    if let Err(e) = setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1) {
        tracing::debug!(error = %e, "setsockopt SO_REUSEPORT");
    }
    if let Err(e) = setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1) {
        tracing::debug!(error = %e, "setsockopt SO_KEEPALIVE");
    }
    if let Err(e) = setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1) {
        tracing::debug!(error = %e, "setsockopt TCP_NODELAY");
    }
    Ok(())
}

fn sockaddr_v4(addr: Ipv4Addr, port: u16) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.octets()),
        },
        sin_zero: [0; 8],
    }
}

/// Create, configure, bind and listen. The socket is non-blocking before it
/// is ever handed to epoll, so the accept loop can drain until `WouldBlock`.
pub fn create_listen_socket(addr: Ipv4Addr, port: u16) -> RavelResult<RawFd> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        if let Err(e) = set_socket_options(fd).and_then(|_| set_nonblocking(fd)) {
            libc::close(fd);
            return Err(e);
        }

        // Wake only when the first data segment arrives; spares one
        // round-trip of idle wakeups per connection in HTTP mode.
        if let Err(e) = setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_DEFER_ACCEPT, 1) {
            tracing::debug!(error = %e, "setsockopt TCP_DEFER_ACCEPT");
        }

        let sin = sockaddr_v4(addr, port);
        if libc::bind(
            fd,
            &sin as *const _ as *const libc::sockaddr,
            mem::size_of_val(&sin) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        if libc::listen(fd, LISTEN_BACKLOG) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        Ok(fd)
    }
}

/// One step of the accept loop. `Ok(None)` means the queue is drained.
pub fn accept_connection(listen_fd: RawFd) -> RavelResult<Option<RawFd>> {
    unsafe {
        let fd = libc::accept4(
            listen_fd,
            ptr::null_mut(),
            ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        );
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err.into());
        }
        Ok(Some(fd))
    }
}

/// Result of initiating a non-blocking backend connect.
#[derive(Debug)]
pub enum Dial {
    /// `connect()` completed synchronously (loopback fast path).
    Connected(RawFd),
    /// `EINPROGRESS`; completion is observed as a writability edge.
    Connecting(RawFd),
}

pub fn connect_backend(addr: Ipv4Addr, port: u16) -> RavelResult<Dial> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        if let Err(e) = set_nonblocking(fd).and_then(|_| set_socket_options(fd)) {
            libc::close(fd);
            return Err(e);
        }

        let sin = sockaddr_v4(addr, port);
        let ret = libc::connect(
            fd,
            &sin as *const _ as *const libc::sockaddr,
            mem::size_of_val(&sin) as socklen_t,
        );
        if ret == 0 {
            return Ok(Dial::Connected(fd));
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINPROGRESS) {
            Ok(Dial::Connecting(fd))
        } else {
            libc::close(fd);
            Err(err.into())
        }
    }
}

/// Fetch and clear the pending socket error; `Ok(None)` means the async
/// connect (or the socket in general) is healthy.
pub fn take_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut err: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;
    unsafe {
        if libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut c_void,
            &mut len,
        ) < 0
        {
            return Err(io::Error::last_os_error());
        }
    }
    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(err)))
    }
}

pub fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

pub fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Edge-triggered epoll instance.
///
/// Every registration carries `EPOLLET | EPOLLRDHUP | EPOLLHUP | EPOLLERR`
/// on top of the requested interest, so error and remote-close edges are
/// always delivered even when the interest mask is minimal.
pub struct Epoll {
    fd: RawFd,
}

impl Epoll {
    pub fn new() -> RavelResult<Self> {
        unsafe {
            let fd = libc::epoll_create1(libc::EPOLL_CLOEXEC);
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { fd })
        }
    }

    fn ctl(&self, op: c_int, fd: RawFd, interest: u32, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest | libc::EPOLLET as u32 | EV_ERROR,
            u64: token,
        };
        unsafe {
            if libc::epoll_ctl(self.fd, op, fd, &mut event) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    pub fn add(&self, fd: RawFd, interest: u32, token: u64) -> RavelResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest, token)?;
        Ok(())
    }

    /// Replace the interest set. Must be called on every interest change;
    /// re-arming also re-delivers an edge for conditions that already hold.
    pub fn modify(&self, fd: RawFd, interest: u32, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest, token)
    }

    /// Tolerant of fds that are already closed or were never registered.
    pub fn delete(&self, fd: RawFd) {
        unsafe {
            if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                let err = io::Error::last_os_error();
                if !matches!(err.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) {
                    tracing::debug!(fd, error = %err, "epoll_ctl DEL");
                }
            }
        }
    }

    /// Block up to `timeout_ms`. Signal interruption reports as zero events,
    /// letting the caller's loop re-check its shutdown flag.
    pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> RavelResult<usize> {
        unsafe {
            let n = libc::epoll_wait(
                self.fd,
                events.as_mut_ptr(),
                events.len() as c_int,
                timeout_ms,
            );
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                return Err(err.into());
            }
            Ok(n as usize)
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
