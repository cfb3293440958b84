//! SOCKS5 proxy server.
//!
//! [`Server`] implements method negotiation, username/password
//! authentication and the CONNECT, BIND and UDP ASSOCIATE commands.
//! Outbound dialing, UDP socket creation, credential checking and
//! tunnel buffers are pluggable; sensible defaults apply when nothing
//! is configured.
//!
//! ```no_run
//! use socks5d::Server;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Server::new().listen("127.0.0.1:1080").await
//! }
//! ```

mod auth;
mod error;
mod proto;
mod server;
mod tunnel;
mod udp;

pub use auth::{Authentication, StaticCredentials};
pub use error::{Error, Result};
pub use proto::{Address, Command, Reply};
pub use server::{Outbound, PacketListen, ProxyDial, Server};
pub use tunnel::BytesPool;
