//! Fixed-size wire protocol between clients, the acceptor, and slave peers.

pub mod codec;
pub mod protocol;

pub use codec::{read_request, read_response, write_request, write_response};
pub use protocol::{Command, Request, Response, PROTO_VER};
