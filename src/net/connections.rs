//! Live client sockets, keyed by the same opaque id the queue stores on
//! an [`crate::queue::Item`] as `client_fd`.
//!
//! The original daemon uses the raw OS fd both as the queue's bookkeeping
//! key and as the handle it writes a reply to, since everything runs
//! through one `select()` loop in one thread. Here a render worker lives
//! on a different thread than the connection it must eventually reply on,
//! so something has to stand between "an id the queue can carry" and "a
//! socket I can write to" - this table is that something (spec §9 design
//! notes).

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use crate::wire::{write_response, Response};

/// Either transport a listener can hand back from `accept()`.
pub enum Conn {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Conn {
    pub fn try_clone(&self) -> io::Result<Conn> {
        match self {
            Conn::Unix(s) => s.try_clone().map(Conn::Unix),
            Conn::Tcp(s) => s.try_clone().map(Conn::Tcp),
        }
    }
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Conn::Unix(s) => s.read(buf),
            Conn::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Conn::Unix(s) => s.write(buf),
            Conn::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Conn::Unix(s) => s.flush(),
            Conn::Tcp(s) => s.flush(),
        }
    }
}

/// Registry of live client sockets, one per accepted connection. A
/// connection's read half runs on its own thread doing blocking
/// `read_request`/immediate-reply round trips; this table holds the
/// write half a render worker reaches for later, once a `Done` or
/// `NotDone` is ready, identified only by the id the acceptor minted
/// when the connection came in.
#[derive(Default)]
pub struct ConnectionTable {
    next_id: AtomicI32,
    conns: Mutex<HashMap<i32, Conn>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        ConnectionTable {
            next_id: AtomicI32::new(1),
            conns: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a freshly accepted connection, returning the id it is now
    /// known by plus a cloned handle for the caller's own read loop. The
    /// original `conn` stays in the table as the write half.
    pub fn register(&self, conn: Conn) -> io::Result<(i32, Conn)> {
        let reader = conn.try_clone()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.conns.lock().unwrap().insert(id, conn);
        Ok((id, reader))
    }

    /// Writes `resp` to the connection registered under `id`, if it is
    /// still open. A write failure drops the entry; the reader thread
    /// will notice independently on its next read and call
    /// `RequestQueue::clear_by_fd`.
    pub fn send(&self, id: i32, resp: &Response) {
        let mut conns = self.conns.lock().unwrap();
        let Some(conn) = conns.get_mut(&id) else {
            return;
        };
        if write_response(conn, resp).is_err() {
            conns.remove(&id);
        }
    }

    pub fn remove(&self, id: i32) {
        self.conns.lock().unwrap().remove(&id);
    }

    /// Count of currently live connections, used by the acceptor to
    /// enforce `MAX_CONNECTIONS` (spec §4.F).
    pub fn len(&self) -> usize {
        self.conns.lock().unwrap().len()
    }
}
