//! Synchronous framing over a blocking `Read`/`Write` stream. There is no
//! async runtime in this daemon (spec §5); each connection is handled by its
//! own OS thread doing one blocking read per request, mirroring the
//! teacher's `Decoder`/`Encoder` split but without `tokio_util::codec`.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};

use super::protocol::{
    build_upgraded, Command, DecodeError, Request, Response, V1_RECORD_SIZE, XMLCONFIG_MAX,
};

fn read_fixed_str(buf: &mut BytesMut) -> String {
    let raw = buf.split_to(XMLCONFIG_MAX);
    let nul = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..nul]).into_owned()
}

fn write_fixed_str(dst: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(XMLCONFIG_MAX - 1);
    dst.put_slice(&bytes[..n]);
    dst.put_bytes(0, XMLCONFIG_MAX - n);
}

/// Reads exactly one request record from `r`, upgrading it to v3 shape.
///
/// Reads the fixed v1 prefix first to learn `ver`, then reads whatever
/// additional fixed-size fields that version carries. Any I/O error -
/// including a short read that hits EOF mid-record - is surfaced to the
/// caller, who closes the connection (spec §6.1: "short reads close the
/// connection").
pub fn read_request<R: Read>(r: &mut R) -> Result<Request, DecodeError> {
    let mut prefix = [0u8; V1_RECORD_SIZE];
    r.read_exact(&mut prefix)?;

    let mut buf = BytesMut::from(&prefix[..]);
    let ver = buf.get_i32_ne();
    let cmd_raw = buf.get_i32_ne();
    let x = buf.get_i32_ne();
    let y = buf.get_i32_ne();
    let z = buf.get_i32_ne();

    let cmd = Command::try_from(cmd_raw)?;

    let mut req = build_upgraded(ver, cmd, x, y, z);

    match ver {
        1 => {}
        2 => {
            let mut extra = vec![0u8; XMLCONFIG_MAX];
            r.read_exact(&mut extra)?;
            let mut extra = BytesMut::from(&extra[..]);
            req.style_name = read_fixed_str(&mut extra);
        }
        3 => {
            let mut extra = vec![0u8; XMLCONFIG_MAX * 3];
            r.read_exact(&mut extra)?;
            let mut extra = BytesMut::from(&extra[..]);
            req.style_name = read_fixed_str(&mut extra);
            req.mime_type = read_fixed_str(&mut extra);
            req.options = read_fixed_str(&mut extra);
        }
        other => return Err(DecodeError::UnsupportedVersion(other)),
    }

    Ok(req)
}

/// Writes a size-equal reply: the same number of bytes the originating
/// request's wire version carried.
pub fn write_response<W: Write>(w: &mut W, resp: &Response) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(V1_RECORD_SIZE + XMLCONFIG_MAX * 3);
    buf.put_i32_ne(resp.wire_ver);
    buf.put_i32_ne(resp.cmd as i32);
    buf.put_i32_ne(resp.x);
    buf.put_i32_ne(resp.y);
    buf.put_i32_ne(resp.z);

    if resp.wire_ver >= 2 {
        write_fixed_str(&mut buf, &resp.style_name);
    }
    if resp.wire_ver >= 3 {
        write_fixed_str(&mut buf, &resp.mime_type);
        write_fixed_str(&mut buf, &resp.options);
    }

    w.write_all(&buf)
}

/// Writes a request record - the other direction of the same framing,
/// used when forwarding to a slave renderer (spec §5).
pub fn write_request<W: Write>(w: &mut W, req: &Request) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(V1_RECORD_SIZE + XMLCONFIG_MAX * 3);
    buf.put_i32_ne(req.wire_ver);
    buf.put_i32_ne(req.cmd as i32);
    buf.put_i32_ne(req.x);
    buf.put_i32_ne(req.y);
    buf.put_i32_ne(req.z);

    if req.wire_ver >= 2 {
        write_fixed_str(&mut buf, &req.style_name);
    }
    if req.wire_ver >= 3 {
        write_fixed_str(&mut buf, &req.mime_type);
        write_fixed_str(&mut buf, &req.options);
    }

    w.write_all(&buf)
}

/// Reads one response record - the other direction of the same framing,
/// used when waiting on a slave renderer's reply (spec §5).
pub fn read_response<R: Read>(r: &mut R) -> Result<Response, DecodeError> {
    let mut prefix = [0u8; V1_RECORD_SIZE];
    r.read_exact(&mut prefix)?;

    let mut buf = BytesMut::from(&prefix[..]);
    let ver = buf.get_i32_ne();
    let cmd_raw = buf.get_i32_ne();
    let x = buf.get_i32_ne();
    let y = buf.get_i32_ne();
    let z = buf.get_i32_ne();
    let cmd = Command::try_from(cmd_raw)?;

    let mut resp = Response {
        wire_ver: ver,
        cmd,
        x,
        y,
        z,
        style_name: "default".to_string(),
        mime_type: "image/png".to_string(),
        options: String::new(),
    };

    match ver {
        1 => {}
        2 => {
            let mut extra = vec![0u8; XMLCONFIG_MAX];
            r.read_exact(&mut extra)?;
            let mut extra = BytesMut::from(&extra[..]);
            resp.style_name = read_fixed_str(&mut extra);
        }
        3 => {
            let mut extra = vec![0u8; XMLCONFIG_MAX * 3];
            r.read_exact(&mut extra)?;
            let mut extra = BytesMut::from(&extra[..]);
            resp.style_name = read_fixed_str(&mut extra);
            resp.mime_type = read_fixed_str(&mut extra);
            resp.options = read_fixed_str(&mut extra);
        }
        other => return Err(DecodeError::UnsupportedVersion(other)),
    }

    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_request(ver: i32, cmd: Command, x: i32, y: i32, z: i32, style: &str, mime: &str, opts: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_i32_ne(ver);
        buf.put_i32_ne(cmd as i32);
        buf.put_i32_ne(x);
        buf.put_i32_ne(y);
        buf.put_i32_ne(z);
        if ver >= 2 {
            write_fixed_str(&mut buf, style);
        }
        if ver >= 3 {
            write_fixed_str(&mut buf, mime);
            write_fixed_str(&mut buf, opts);
        }
        buf.to_vec()
    }

    #[test]
    fn v1_record_upgrades_defaults() {
        let wire = encode_request(1, Command::Render, 1, 2, 3, "", "", "");
        let mut cur = Cursor::new(wire);
        let req = read_request(&mut cur).unwrap();
        assert_eq!(req.style_name, "default");
        assert_eq!(req.mime_type, "image/png");
        assert_eq!(req.options, "");
        assert_eq!((req.x, req.y, req.z), (1, 2, 3));
    }

    #[test]
    fn v3_record_round_trips_all_fields() {
        let wire = encode_request(3, Command::RenderPrio, 10, 20, 5, "osm", "image/jpeg", "p=1");
        let mut cur = Cursor::new(wire);
        let req = read_request(&mut cur).unwrap();
        assert_eq!(req.style_name, "osm");
        assert_eq!(req.mime_type, "image/jpeg");
        assert_eq!(req.options, "p=1");
        assert_eq!(req.cmd, Command::RenderPrio);
    }

    #[test]
    fn short_read_is_an_io_error() {
        let wire = encode_request(3, Command::Render, 0, 0, 0, "a", "b", "c");
        let truncated = &wire[..wire.len() - 5];
        let mut cur = Cursor::new(truncated.to_vec());
        let err = read_request(&mut cur).unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[test]
    fn response_is_size_equal_to_request_version() {
        let req = read_request(&mut Cursor::new(encode_request(
            1,
            Command::Render,
            0,
            0,
            0,
            "",
            "",
            "",
        )))
        .unwrap();
        let resp = req.respond(Command::Done);
        let mut out = Vec::new();
        write_response(&mut out, &resp).unwrap();
        assert_eq!(out.len(), V1_RECORD_SIZE);
    }

    #[test]
    fn write_request_then_read_response_round_trips_a_forwarded_request() {
        let req = Request {
            wire_ver: 3,
            cmd: Command::Render,
            x: 16,
            y: 24,
            z: 6,
            style_name: "osm".to_string(),
            mime_type: "image/png".to_string(),
            options: "".to_string(),
        };
        let mut wire = Vec::new();
        write_request(&mut wire, &req).unwrap();

        let mut cur = Cursor::new(wire);
        let forwarded = read_request(&mut cur).unwrap();
        assert_eq!(forwarded, req);

        let resp = forwarded.respond(Command::Done);
        let mut wire = Vec::new();
        write_response(&mut wire, &resp).unwrap();
        let parsed = read_response(&mut Cursor::new(wire)).unwrap();
        assert_eq!(parsed.cmd, Command::Done);
        assert_eq!((parsed.x, parsed.y, parsed.z), (16, 24, 6));
    }

    #[test]
    fn unknown_command_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32_ne(1);
        buf.put_i32_ne(99);
        buf.put_i32_ne(0);
        buf.put_i32_ne(0);
        buf.put_i32_ne(0);
        let mut cur = Cursor::new(buf.to_vec());
        assert!(matches!(
            read_request(&mut cur),
            Err(DecodeError::UnknownCommand(99))
        ));
    }
}
