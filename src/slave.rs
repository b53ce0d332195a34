//! Forwarding to peer `renderd` instances (spec §5, the `[renderd1..N]`
//! sections in the config).
//!
//! Mirrors `slave_thread` in the original: one dispatch thread per unit
//! of a peer's advertised render capacity (`num_threads`), each popping
//! one request from the shared queue, forwarding it verbatim with `cmd`
//! forced to `Render`, and blocking for exactly one reply before popping
//! again. Nothing queues up on the peer by construction - there are
//! never more outstanding requests against it than it has render
//! threads to answer them with.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::RenderdSection;
use crate::context::AppContext;
use crate::queue::{Item, ItemId};
use crate::wire::{read_response, write_request, Command, Request, Response, PROTO_VER};

/// Upper bound on configured `[renderd1..N]` peer sections.
pub const MAX_SLAVES: usize = 5;

/// How long to wait before retrying a failed connect, matching the
/// original's hard-coded 30 second backoff.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Extra send attempts for one in-flight dispatch before giving up and
/// replying `NotDone`, matching the original's `retry = 2`.
const SEND_RETRIES: u32 = 2;

enum PeerConn {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Read for PeerConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PeerConn::Unix(s) => s.read(buf),
            PeerConn::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for PeerConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PeerConn::Unix(s) => s.write(buf),
            PeerConn::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PeerConn::Unix(s) => s.flush(),
            PeerConn::Tcp(s) => s.flush(),
        }
    }
}

fn connect(section: &RenderdSection) -> io::Result<PeerConn> {
    if let (Some(host), Some(port)) = (&section.ip_hostname, section.ip_port) {
        Ok(PeerConn::Tcp(TcpStream::connect((host.as_str(), port))?))
    } else {
        let path = section
            .socket_name
            .as_deref()
            .unwrap_or("/run/renderd/renderd.sock");
        Ok(PeerConn::Unix(UnixStream::connect(path)?))
    }
}

/// Spawns one dispatch thread per unit of `section.num_threads`, all
/// sharing the same queue and connecting independently to the same peer.
pub fn spawn(ctx: Arc<AppContext>, section: RenderdSection) -> Vec<thread::JoinHandle<()>> {
    let section = Arc::new(section);
    (0..section.num_threads)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let section = Arc::clone(&section);
            thread::spawn(move || run(ctx, &section))
        })
        .collect()
}

fn run(ctx: Arc<AppContext>, section: &RenderdSection) {
    let mut conn: Option<PeerConn> = None;

    while !ctx.is_exiting() {
        if conn.is_none() {
            conn = match connect(section) {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::error!(error = %e, "failed to connect to render slave, trying again in 30 seconds");
                    thread::sleep(RECONNECT_BACKOFF);
                    continue;
                }
            };
        }

        let Some(popped) = ctx.queue.fetch_request() else {
            break;
        };
        let forward = Request {
            wire_ver: PROTO_VER,
            cmd: Command::Render,
            x: popped.item.mx,
            y: popped.item.my,
            z: popped.item.z,
            style_name: popped.item.style_name.clone(),
            mime_type: popped.item.mime_type.clone(),
            options: popped.item.options.clone(),
        };

        tracing::info!("dispatching request to render slave");

        // The send itself gets a bounded number of retries, reconnecting
        // each time, before the request is dropped as NotDone - a peer
        // that's merely closed its end of a stale connection shouldn't
        // cost the request its place in the queue.
        let mut retries_left = SEND_RETRIES;
        let sent = loop {
            match write_request(conn.as_mut().expect("connected above"), &forward) {
                Ok(()) => break true,
                Err(_) if retries_left > 0 => {
                    tracing::warn!("failed to send request to render slave, retrying");
                    retries_left -= 1;
                    conn = connect(section).ok();
                    if conn.is_none() {
                        tracing::error!("failed to re-connect to render slave, dropping request");
                        break false;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to send request to render slave, dropping request");
                    break false;
                }
            }
        };

        if !sent {
            respond(&ctx, popped.id, popped.item, Command::NotDone);
            continue;
        }

        match read_response(conn.as_mut().expect("connected above")) {
            Ok(resp) if resp.cmd == Command::Done => {
                respond(&ctx, popped.id, popped.item, Command::Done);
            }
            Ok(_) => {
                tracing::error!("request from render slave did not complete correctly");
                respond(&ctx, popped.id, popped.item, Command::NotDone);
                // throttle: a slave that replies without having actually
                // blocked on rendering is likely overloaded.
                thread::sleep(RECONNECT_BACKOFF);
            }
            Err(e) => {
                tracing::error!(error = %e, "pipe to render slave closed, trying again in 30 seconds");
                conn = None;
                respond(&ctx, popped.id, popped.item, Command::NotDone);
                thread::sleep(RECONNECT_BACKOFF);
            }
        }
    }
}

/// Same shape as the render worker's own `respond`: remove the item
/// under the queue lock, then answer the primary descriptor and every
/// duplicate waiting on it, each with its own original `x`/`y` (spec §3
/// invariant 6), skipping `Dirty` waiters entirely.
fn respond(ctx: &AppContext, id: ItemId, item: Item, cmd: Command) {
    let removed = ctx.queue.remove_request(id, None);
    debug_assert_eq!(removed.mx, item.mx);

    if let Some(fd) = removed.client_fd.filter(|_| removed.cmd.is_render_request()) {
        ctx.connections.send(
            fd,
            &Response {
                wire_ver: removed.wire_ver,
                cmd,
                x: removed.x,
                y: removed.y,
                z: removed.z,
                style_name: removed.style_name.clone(),
                mime_type: removed.mime_type.clone(),
                options: removed.options.clone(),
            },
        );
    }

    for dup in &removed.duplicates {
        if !dup.cmd.is_render_request() {
            continue;
        }
        if let Some(fd) = dup.client_fd {
            ctx.connections.send(
                fd,
                &Response {
                    wire_ver: dup.wire_ver,
                    cmd,
                    x: dup.x,
                    y: dup.y,
                    z: removed.z,
                    style_name: removed.style_name.clone(),
                    mime_type: dup.mime_type.clone(),
                    options: dup.options.clone(),
                },
            );
        }
    }
}
