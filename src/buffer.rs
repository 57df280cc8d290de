// src/buffer.rs
use std::os::fd::RawFd;

use crate::error::{RavelError, RavelResult};
use crate::syscalls;

/// Outcome of one non-blocking read into the buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// n > 0 bytes appended at the tail.
    Data(usize),
    /// Peer closed its write side.
    Eof,
    /// Socket drained; wait for the next readiness edge.
    WouldBlock,
}

/// Outcome of one non-blocking write from the buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// n bytes drained from the head (0 when the buffer was already empty).
    Data(usize),
    /// Socket send queue full; wait for the next writability edge.
    WouldBlock,
}

/// Fixed-capacity byte window: append at `tail`, drain from `head`.
///
/// The readable span is `[head, tail)`, the writable tail `[tail, capacity)`.
/// Draining to empty resets both cursors to 0, which is the primary space
/// reclamation path; `compact` exists for the rare partial-drain case.
pub struct Buffer {
    data: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head >= self.tail
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.tail >= self.data.len()
    }

    #[inline]
    pub fn readable_len(&self) -> usize {
        self.tail - self.head
    }

    #[inline]
    pub fn writable_len(&self) -> usize {
        self.data.len() - self.tail
    }

    #[inline]
    pub fn readable(&self) -> &[u8] {
        &self.data[self.head..self.tail]
    }

    /// Reset both cursors. Contents are not zeroed; the next append
    /// overwrites them.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Advance the drain cursor by `n`, resetting both cursors once the
    /// buffer empties.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.readable_len());
        self.head += n;
        if self.head >= self.tail {
            self.head = 0;
            self.tail = 0;
        }
    }

    /// Copy as much of `src` as fits into the writable tail; returns the
    /// number of bytes taken.
    pub fn append(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.writable_len());
        self.data[self.tail..self.tail + n].copy_from_slice(&src[..n]);
        self.tail += n;
        n
    }

    /// Shift the readable span to offset 0, reclaiming the drained prefix.
    /// No-op when `head` is already 0.
    pub fn compact(&mut self) {
        if self.head == 0 {
            return;
        }
        if self.head >= self.tail {
            self.head = 0;
            self.tail = 0;
            return;
        }
        self.data.copy_within(self.head..self.tail, 0);
        self.tail -= self.head;
        self.head = 0;
    }

    /// Fill the writable tail from a non-blocking socket.
    ///
    /// Fails with [`RavelError::NoSpace`] when the writable tail is empty;
    /// the caller decides between compaction and backpressure.
    pub fn read_from(&mut self, fd: RawFd) -> RavelResult<ReadOutcome> {
        if self.writable_len() == 0 {
            return Err(RavelError::NoSpace);
        }
        match syscalls::read_fd(fd, &mut self.data[self.tail..]) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => {
                self.tail += n;
                Ok(ReadOutcome::Data(n))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// Drain the readable span to a non-blocking socket. Partial writes only
    /// advance `head`; a full drain resets both cursors.
    pub fn write_to(&mut self, fd: RawFd) -> RavelResult<WriteOutcome> {
        if self.is_empty() {
            return Ok(WriteOutcome::Data(0));
        }
        match syscalls::write_fd(fd, &self.data[self.head..self.tail]) {
            Ok(n) => {
                self.consume(n);
                Ok(WriteOutcome::Data(n))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsRawFd;

    #[test]
    fn append_and_consume_track_cursors() {
        let mut buf = Buffer::new(8);
        assert_eq!(buf.append(b"abcde"), 5);
        assert_eq!(buf.readable(), b"abcde");
        assert_eq!(buf.writable_len(), 3);

        buf.consume(2);
        assert_eq!(buf.readable(), b"cde");

        // Draining the rest resets both cursors.
        buf.consume(3);
        assert!(buf.is_empty());
        assert_eq!(buf.writable_len(), 8);
    }

    #[test]
    fn append_is_bounded_by_capacity() {
        let mut buf = Buffer::new(4);
        assert_eq!(buf.append(b"abcdef"), 4);
        assert!(buf.is_full());
        assert_eq!(buf.append(b"x"), 0);
    }

    #[test]
    fn compact_moves_readable_span_to_front() {
        let mut buf = Buffer::new(8);
        buf.append(b"abcdefgh");
        buf.consume(5);
        assert_eq!(buf.writable_len(), 0);

        buf.compact();
        assert_eq!(buf.readable(), b"fgh");
        assert_eq!(buf.writable_len(), 5);

        // Compacting again is a no-op.
        buf.compact();
        assert_eq!(buf.readable(), b"fgh");
    }

    #[test]
    fn clear_resets_without_zeroing() {
        let mut buf = Buffer::new(8);
        buf.append(b"abc");
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.writable_len(), 8);
    }

    fn nonblocking_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let a = TcpStream::connect(addr).unwrap();
        let (b, _) = listener.accept().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn read_from_reports_data_wouldblock_and_eof() {
        let (mut a, b) = nonblocking_pair();
        let mut buf = Buffer::new(64);

        assert_eq!(buf.read_from(b.as_raw_fd()).unwrap(), ReadOutcome::WouldBlock);

        a.write_all(b"hello").unwrap();
        // Give the loopback a moment to deliver.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(buf.read_from(b.as_raw_fd()).unwrap(), ReadOutcome::Data(5));
        assert_eq!(buf.readable(), b"hello");

        drop(a);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(buf.read_from(b.as_raw_fd()).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn read_from_full_buffer_is_no_space() {
        let (mut a, b) = nonblocking_pair();
        a.write_all(b"xyz").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut buf = Buffer::new(2);
        assert_eq!(buf.read_from(b.as_raw_fd()).unwrap(), ReadOutcome::Data(2));
        assert!(matches!(
            buf.read_from(b.as_raw_fd()),
            Err(RavelError::NoSpace)
        ));
    }

    #[test]
    fn write_to_drains_and_resets() {
        let (a, b) = nonblocking_pair();
        let mut buf = Buffer::new(64);
        buf.append(b"ping");

        match buf.write_to(a.as_raw_fd()).unwrap() {
            WriteOutcome::Data(4) => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(buf.is_empty());
        assert_eq!(buf.writable_len(), 64);
        drop(b);
    }
}
