//! The daemon's client-facing side: the accept loop and the connection
//! table render workers use to deliver a response once it's ready.

pub mod acceptor;
pub mod connections;

pub use acceptor::run;
pub use connections::{Conn, ConnectionTable};
