// src/slab.rs
use crate::conn::{Conn, ConnId, ConnState};

/// Fixed-capacity pool of connection slots with an array-backed LIFO
/// free-list. Allocation and release are O(1); slot ids stay stable for the
/// lifetime of a slot's use, which is what the epoll tokens rely on.
pub struct ConnectionSlab {
    entries: Box<[Conn]>,
    free_list: Vec<ConnId>,
}

impl ConnectionSlab {
    /// All slots are allocated up front; the hot path never touches the
    /// allocator.
    pub fn new(capacity: usize) -> Self {
        let entries: Vec<Conn> = (0..capacity).map(|_| Conn::empty()).collect();
        // LIFO pop yields index 0 first; handy when reading logs.
        let free_list: Vec<ConnId> = (0..capacity).rev().collect();
        Self {
            entries: entries.into_boxed_slice(),
            free_list,
        }
    }

    /// Pop a free slot. `None` means the pool limit was hit; the caller
    /// rejects the new connection rather than evicting an existing one.
    pub fn alloc(&mut self) -> Option<ConnId> {
        let id = self.free_list.pop()?;
        let conn = &mut self.entries[id];
        if conn.state != ConnState::Closed {
            tracing::error!(id, state = ?conn.state, "allocated slot was not closed");
            conn.reset();
        }
        Some(id)
    }

    /// Push a slot back, resetting it to the tombstone state. The caller
    /// must have closed the fd and broken the pairing first. Double-free is
    /// logged and ignored.
    pub fn free(&mut self, id: ConnId) {
        let Some(conn) = self.entries.get_mut(id) else {
            tracing::error!(id, "free of out-of-range slot");
            return;
        };
        if conn.state == ConnState::Closed {
            tracing::error!(id, "double free of connection slot");
            return;
        }
        conn.reset();
        self.free_list.push(id);
    }

    #[inline]
    pub fn get(&self, id: ConnId) -> Option<&Conn> {
        self.entries.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Conn> {
        self.entries.get_mut(id)
    }

    /// Distinct mutable borrows of two slots, used by the forwarder to move
    /// bytes between a connection and its peer.
    pub fn get2_mut(&mut self, a: ConnId, b: ConnId) -> Option<(&mut Conn, &mut Conn)> {
        if a == b || a >= self.entries.len() || b >= self.entries.len() {
            return None;
        }
        if a < b {
            let (lo, hi) = self.entries.split_at_mut(b);
            Some((&mut lo[a], &mut hi[0]))
        } else {
            let (lo, hi) = self.entries.split_at_mut(a);
            let (first, second) = (&mut hi[0], &mut lo[b]);
            Some((first, second))
        }
    }

    /// Should this connection be reading?
    ///
    /// True while the state permits reads and the forwarding destination has
    /// room. An HTTP client that has not been paired yet is accumulating its
    /// own request head and always reads; once a peer exists, a full peer
    /// write buffer de-registers reads until the slow side drains
    /// (backpressure that ultimately shrinks the remote sender's TCP window).
    pub fn can_read(&self, id: ConnId) -> bool {
        let Some(conn) = self.get(id) else { return false };
        if !conn.is_valid() {
            return false;
        }
        match conn.state {
            ConnState::Connected | ConnState::ReadingRequest => {}
            _ => return false,
        }
        match conn.peer {
            Some(p) => self.get(p).is_some_and(|pc| !pc.write_buf.is_full()),
            None => conn.state == ConnState::ReadingRequest,
        }
    }

    /// Should this connection be written to right now? Requires buffered
    /// bytes; writing an empty buffer is a wasted syscall.
    pub fn can_write(&self, id: ConnId) -> bool {
        let Some(conn) = self.get(id) else { return false };
        conn.is_valid()
            && !conn.write_buf.is_empty()
            && matches!(
                conn.state,
                ConnState::Connected | ConnState::WritingResponse
            )
    }

    /// Should writability be in the interest mask? Either an async connect
    /// is in flight (completion surfaces as a writability edge) or there is
    /// buffered output. Anything else would busy-wake: sockets are writable
    /// almost all the time.
    pub fn wants_write(&self, id: ConnId) -> bool {
        let Some(conn) = self.get(id) else { return false };
        conn.is_valid()
            && (conn.state == ConnState::Connecting || !conn.write_buf.is_empty())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        self.entries.len() - self.free_list.len()
    }

    /// Iterate ids of every slot currently in use.
    pub fn live_ids(&self) -> Vec<ConnId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state != ConnState::Closed)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Role;

    #[test]
    fn alloc_and_free_are_lifo() {
        let mut slab = ConnectionSlab::new(4);
        assert_eq!(slab.capacity(), 4);
        assert_eq!(slab.in_use(), 0);

        let a = slab.alloc().unwrap();
        let b = slab.alloc().unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(slab.in_use(), 2);

        // Mark as live so free() treats it as a real release.
        slab.get_mut(a).unwrap().init(10, Role::Client, ConnState::Connected, 0);
        slab.free(a);
        assert_eq!(slab.in_use(), 1);

        // Freshly-freed slot comes back first.
        assert_eq!(slab.alloc().unwrap(), a);
    }

    #[test]
    fn exhaustion_returns_none_without_disturbing_slots() {
        let mut slab = ConnectionSlab::new(2);
        let a = slab.alloc().unwrap();
        let _b = slab.alloc().unwrap();
        assert!(slab.alloc().is_none());

        slab.get_mut(a).unwrap().init(10, Role::Client, ConnState::Connected, 0);
        assert_eq!(slab.get(a).unwrap().fd, 10);
    }

    #[test]
    fn double_free_pushes_exactly_once() {
        let mut slab = ConnectionSlab::new(2);
        let a = slab.alloc().unwrap();
        slab.get_mut(a).unwrap().init(10, Role::Client, ConnState::Connected, 0);

        slab.free(a);
        let before = slab.in_use();
        slab.free(a);
        assert_eq!(slab.in_use(), before);

        // Every slot is either free or in use, never both.
        assert_eq!(slab.in_use(), 0);
        assert!(slab.alloc().is_some());
        assert!(slab.alloc().is_some());
        assert!(slab.alloc().is_none());
    }

    #[test]
    fn read_interest_follows_peer_buffer_space() {
        let mut slab = ConnectionSlab::new(4);
        let client = slab.alloc().unwrap();
        let backend = slab.alloc().unwrap();
        slab.get_mut(client)
            .unwrap()
            .init(10, Role::Client, ConnState::Connected, 0);
        slab.get_mut(backend)
            .unwrap()
            .init(11, Role::Backend, ConnState::Connected, 0);

        // Connected but unpaired: nowhere to forward, so no read interest.
        assert!(!slab.can_read(client));

        slab.get_mut(client).unwrap().peer = Some(backend);
        slab.get_mut(backend).unwrap().peer = Some(client);
        assert!(slab.can_read(client));

        // Fill the backend's write buffer: backpressure kicks in.
        let big = vec![0u8; crate::config::BUFFER_SIZE];
        slab.get_mut(backend).unwrap().write_buf.append(&big);
        assert!(!slab.can_read(client));
        assert!(slab.can_read(backend));
    }

    #[test]
    fn http_client_reads_its_own_head_without_a_peer() {
        let mut slab = ConnectionSlab::new(2);
        let client = slab.alloc().unwrap();
        slab.get_mut(client)
            .unwrap()
            .init(10, Role::Client, ConnState::ReadingRequest, 0);
        assert!(slab.can_read(client));
    }

    #[test]
    fn write_interest_requires_connecting_or_buffered_bytes() {
        let mut slab = ConnectionSlab::new(4);
        let id = slab.alloc().unwrap();
        slab.get_mut(id)
            .unwrap()
            .init(10, Role::Backend, ConnState::Connecting, 0);
        assert!(slab.wants_write(id));
        assert!(!slab.can_write(id));

        let conn = slab.get_mut(id).unwrap();
        conn.state = ConnState::Connected;
        assert!(!slab.wants_write(id));

        slab.get_mut(id).unwrap().write_buf.append(b"data");
        assert!(slab.wants_write(id));
        assert!(slab.can_write(id));
    }

    #[test]
    fn get2_mut_borrows_both_orders() {
        let mut slab = ConnectionSlab::new(4);
        let a = slab.alloc().unwrap();
        let b = slab.alloc().unwrap();
        {
            let (ca, cb) = slab.get2_mut(a, b).unwrap();
            ca.fd = 11;
            cb.fd = 22;
        }
        {
            let (cb, ca) = slab.get2_mut(b, a).unwrap();
            assert_eq!(cb.fd, 22);
            assert_eq!(ca.fd, 11);
        }
        assert!(slab.get2_mut(a, a).is_none());
    }
}
