mod serde;
mod tcp;

pub use serde::Networkable;
pub use tcp::{ConnectError, HandshakeError, RequestHandler, TcpClient, TcpServer};
