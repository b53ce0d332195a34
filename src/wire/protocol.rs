//! Wire record shapes. A v3 record is `{ver, cmd, x, y, z}` followed by three
//! fixed 41-byte NUL-padded strings (`style_name`, `mime_type`, `options`).
//! v1 carries only the leading five integers; v2 adds `style_name`. See
//! spec.md §4.A / §6.1.

use std::fmt;

/// Length in bytes of each of the three fixed string fields on a v2/v3 record.
pub const XMLCONFIG_MAX: usize = 41;

/// The current (highest) protocol version this daemon speaks.
pub const PROTO_VER: i32 = 3;

/// Byte length of the version-independent integer prefix (`ver, cmd, x, y, z`).
pub const V1_RECORD_SIZE: usize = 4 * 5;

/// A command, shared between requests and responses. Discriminants mirror
/// the original `enum protoCmd` ordering so wire bytes stay self-describing
/// in logs and captures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum Command {
    Ignore = 0,
    Render = 1,
    Dirty = 2,
    Done = 3,
    NotDone = 4,
    RenderPrio = 5,
    RenderBulk = 6,
    RenderLow = 7,
}

impl Command {
    /// True for the four priorities that enqueue a render (excludes `Dirty`,
    /// which has its own enqueue path, and the response-only commands).
    pub fn is_render_request(self) -> bool {
        matches!(
            self,
            Command::Render | Command::RenderPrio | Command::RenderLow | Command::RenderBulk
        )
    }
}

impl TryFrom<i32> for Command {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Command::Ignore,
            1 => Command::Render,
            2 => Command::Dirty,
            3 => Command::Done,
            4 => Command::NotDone,
            5 => Command::RenderPrio,
            6 => Command::RenderBulk,
            7 => Command::RenderLow,
            other => return Err(DecodeError::UnknownCommand(other)),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Ignore => "Ignore",
            Command::Render => "Render",
            Command::Dirty => "Dirty",
            Command::Done => "Done",
            Command::NotDone => "NotDone",
            Command::RenderPrio => "RenderPrio",
            Command::RenderBulk => "RenderBulk",
            Command::RenderLow => "RenderLow",
        };
        f.write_str(s)
    }
}

/// A request record, already upgraded in place to carry all v3 fields
/// regardless of the version the client actually sent. `wire_ver` records
/// the version that was on the wire so a size-equal reply can be written.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub wire_ver: i32,
    pub cmd: Command,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub style_name: String,
    pub mime_type: String,
    pub options: String,
}

impl Request {
    /// Applies the v1/v2 -> v3 field defaulting described in spec §4.A.
    fn upgrade(wire_ver: i32, cmd: Command, x: i32, y: i32, z: i32) -> Self {
        Request {
            wire_ver,
            cmd,
            x,
            y,
            z,
            style_name: "default".to_string(),
            mime_type: "image/png".to_string(),
            options: String::new(),
        }
    }

    /// Builds the response echoing this request's coordinates, replacing the
    /// command with `cmd`.
    pub fn respond(&self, cmd: Command) -> Response {
        Response {
            wire_ver: self.wire_ver,
            cmd,
            x: self.x,
            y: self.y,
            z: self.z,
            style_name: self.style_name.clone(),
            mime_type: self.mime_type.clone(),
            options: self.options.clone(),
        }
    }
}

/// A response record. Same layout as `Request`; kept as a distinct type
/// because responses are never re-upgraded and never drive queue logic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub wire_ver: i32,
    pub cmd: Command,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub style_name: String,
    pub mime_type: String,
    pub options: String,
}

#[derive(Debug)]
pub enum DecodeError {
    Io(std::io::Error),
    UnsupportedVersion(i32),
    UnknownCommand(i32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Io(e) => write!(f, "i/o error reading request: {e}"),
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported protocol version {v}"),
            DecodeError::UnknownCommand(c) => write!(f, "unknown command code {c}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        DecodeError::Io(value)
    }
}

pub(crate) fn build_upgraded(
    wire_ver: i32,
    cmd: Command,
    x: i32,
    y: i32,
    z: i32,
) -> Request {
    Request::upgrade(wire_ver, cmd, x, y, z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_wire_values() {
        for raw in 0..=7i32 {
            let cmd = Command::try_from(raw).unwrap();
            assert_eq!(cmd as i32, raw);
        }
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(Command::try_from(99).is_err());
    }

    #[test]
    fn v1_upgrade_fills_defaults() {
        let req = Request::upgrade(1, Command::Render, 1, 2, 3);
        assert_eq!(req.style_name, "default");
        assert_eq!(req.mime_type, "image/png");
        assert_eq!(req.options, "");
    }

    #[test]
    fn respond_echoes_coordinates() {
        let req = Request {
            wire_ver: 3,
            cmd: Command::Render,
            x: 7,
            y: 8,
            z: 9,
            style_name: "osm".into(),
            mime_type: "image/png".into(),
            options: "".into(),
        };
        let resp = req.respond(Command::Done);
        assert_eq!(resp.cmd, Command::Done);
        assert_eq!((resp.x, resp.y, resp.z), (7, 8, 9));
        assert_eq!(resp.style_name, "osm");
    }
}
