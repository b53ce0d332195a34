//! HTCP cache-purge datagrams (spec §6.5 / §9 Open Question 4). Entirely
//! best-effort: failures are logged and otherwise ignored, never
//! propagated to a caller waiting on a render response.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicU16, Ordering};

static NEXT_TRANSACTION_ID: AtomicU16 = AtomicU16::new(1);

/// Builds one HTCP `CLR` datagram for `url`. Unlike the original (which
/// hard-codes transaction id 255), each call gets a fresh id - a
/// documented, spec-sanctioned divergence that keeps the
/// fire-and-forget semantics (Open Question 4).
fn build_clr_datagram(url: &str) -> Vec<u8> {
    let method = b"HEAD";
    let version = b"HTTP/1.1";
    let url_bytes = url.as_bytes();

    let htcp_data_len = 8 + 22 + url_bytes.len();
    let total_len = 12 + 22 + url_bytes.len();

    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(&(total_len as u16).to_be_bytes());
    buf.push(0); // major version
    buf.push(0); // minor version
    buf.extend_from_slice(&(htcp_data_len as u16).to_be_bytes());
    buf.push(4); // opcode CLR
    buf.push(0); // reserved

    let txn_id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed) as u32;
    buf.extend_from_slice(&txn_id.to_be_bytes());
    buf.push(0);
    buf.push(0); // HTCP reason

    buf.extend_from_slice(&(method.len() as u16).to_be_bytes());
    buf.extend_from_slice(method);

    buf.extend_from_slice(&(url_bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(url_bytes);

    buf.extend_from_slice(&(version.len() as u16).to_be_bytes());
    buf.extend_from_slice(version);

    buf.extend_from_slice(&0u16.to_be_bytes()); // no request headers

    buf
}

/// Sends one purge datagram for `http://<host><uri><z>/<x>/<y>.<ext>`.
/// Any socket error is swallowed after a warning: purge is best-effort.
pub fn purge_url(sock: &UdpSocket, host: &str, uri: &str, ext: &str, x: i32, y: i32, z: i32) {
    let url = format!("http://{host}{uri}{z}/{x}/{y}.{ext}");
    let datagram = build_clr_datagram(&url);
    if let Err(e) = sock.send(&datagram) {
        tracing::warn!(url, error = %e, "failed to send HTCP purge");
    }
}

/// Purges every sub-tile of the metatile anchored at `(mx, my, z)`,
/// covering the `render_size_x x render_size_y` block actually rendered.
pub fn purge_metatile(
    sock: &UdpSocket,
    host: &str,
    uri: &str,
    ext: &str,
    mx: i32,
    my: i32,
    z: i32,
    render_size_x: i32,
    render_size_y: i32,
) {
    tracing::info!(mx, my, z, "purging metatile via HTCP cache expiry");
    for ox in 0..render_size_x {
        for oy in 0..render_size_y {
            purge_url(sock, host, uri, ext, mx + ox, my + oy, z);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_length_fields_are_internally_consistent() {
        let dgram = build_clr_datagram("http://tile.example.org/osm/3/1/2.png");
        let total_len = u16::from_be_bytes([dgram[0], dgram[1]]) as usize;
        assert_eq!(total_len, dgram.len());
        assert_eq!(dgram[6], 4); // opcode CLR
    }

    #[test]
    fn purge_metatile_sends_one_datagram_per_subtile() {
        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_nonblocking(true).unwrap();
        sock.connect(receiver.local_addr().unwrap()).unwrap();

        purge_metatile(&sock, "tile.example.org", "/osm/", "png", 0, 0, 5, 2, 2);

        let mut buf = [0u8; 1024];
        let mut count = 0;
        while receiver.recv(&mut buf).is_ok() {
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
