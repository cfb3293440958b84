use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub(crate) const VER: u8 = 5;

pub(crate) const NO_AUTH: u8 = 0;
pub(crate) const USER_AUTH: u8 = 2;
pub(crate) const NO_ACCEPTABLE: u8 = 0xff;

pub(crate) const USER_AUTH_VER: u8 = 1;
pub(crate) const AUTH_SUCCESS: u8 = 0;
pub(crate) const AUTH_FAILURE: u8 = 1;

pub(crate) const CMD_CONNECT: u8 = 1;
pub(crate) const CMD_BIND: u8 = 2;
pub(crate) const CMD_UDP_ASSOCIATE: u8 = 3;

pub(crate) const ATYP_IPV4: u8 = 1;
pub(crate) const ATYP_DOMAIN: u8 = 3;
pub(crate) const ATYP_IPV6: u8 = 4;

/// SOCKS5 request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    Associate,
    Other(u8),
}

impl From<u8> for Command {
    fn from(cmd: u8) -> Self {
        match cmd {
            CMD_CONNECT => Command::Connect,
            CMD_BIND => Command::Bind,
            CMD_UDP_ASSOCIATE => Command::Associate,
            other => Command::Other(other),
        }
    }
}

/// Status byte carried in a SOCKS5 reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Success,
    GeneralFailure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddrTypeNotSupported,
}

impl Reply {
    pub fn as_u8(self) -> u8 {
        match self {
            Reply::Success => 0,
            Reply::GeneralFailure => 1,
            Reply::NotAllowed => 2,
            Reply::NetworkUnreachable => 3,
            Reply::HostUnreachable => 4,
            Reply::ConnectionRefused => 5,
            Reply::TtlExpired => 6,
            Reply::CommandNotSupported => 7,
            Reply::AddrTypeNotSupported => 8,
        }
    }
}

/// Maps a network error to the closest SOCKS5 reply code.
pub(crate) fn err_to_reply(err: &io::Error) -> Reply {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
        io::ErrorKind::HostUnreachable => Reply::HostUnreachable,
        io::ErrorKind::NetworkUnreachable => Reply::NetworkUnreachable,
        io::ErrorKind::TimedOut => Reply::TtlExpired,
        _ => Reply::GeneralFailure,
    }
}

/// Destination address of a SOCKS5 request. Domains are kept as-is and
/// only resolved when a handler dials out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr, u16),
    Ipv6(Ipv6Addr, u16),
    Domain(String, u16),
}

impl Address {
    /// Appends the wire encoding (type tag, address bytes, big-endian
    /// port) to `buf`.
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Address::Ipv4(ip, port) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Address::Ipv6(ip, port) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Address::Domain(host, port) => {
                buf.push(ATYP_DOMAIN);
                buf.push(host.len() as u8);
                buf.extend_from_slice(host.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Address::Ipv4(*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => Address::Ipv6(*v6.ip(), v6.port()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{}:{}", ip, port),
            Address::Ipv6(ip, port) => write!(f, "[{}]:{}", ip, port),
            Address::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

pub(crate) async fn read_address<R>(stream: &mut R) -> Result<Address>
where
    R: AsyncRead + Unpin,
{
    match stream.read_u8().await? {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            Ok(Address::Ipv4(Ipv4Addr::from(octets), port))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            Ok(Address::Ipv6(Ipv6Addr::from(octets), port))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            let mut domain = vec![0u8; len as usize];
            stream.read_exact(&mut domain).await?;
            let port = stream.read_u16().await?;
            let host = String::from_utf8(domain).map_err(|_| Error::InvalidDomain)?;
            Ok(Address::Domain(host, port))
        }
        atype => Err(Error::UnrecognizedAddrType(atype)),
    }
}

/// Writes one reply frame. An absent bind address encodes as the
/// all-zero IPv4 placeholder.
pub(crate) async fn send_reply<W>(stream: &mut W, reply: Reply, bind: Option<&Address>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = vec![VER, reply.as_u8(), 0];
    match bind {
        Some(addr) => addr.encode_into(&mut frame),
        None => Address::Ipv4(Ipv4Addr::UNSPECIFIED, 0).encode_into(&mut frame),
    }
    stream.write_all(&frame).await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(addr: Address) {
        let mut buf = Vec::new();
        addr.encode_into(&mut buf);
        let decoded = read_address(&mut &buf[..]).await.unwrap();
        assert_eq!(decoded, addr);
    }

    #[tokio::test]
    async fn address_roundtrip_ipv4() {
        roundtrip(Address::Ipv4(Ipv4Addr::new(10, 1, 2, 3), 8080)).await;
    }

    #[tokio::test]
    async fn address_roundtrip_ipv6() {
        roundtrip(Address::Ipv6("2001:db8::7".parse().unwrap(), 443)).await;
    }

    #[tokio::test]
    async fn address_roundtrip_domain() {
        roundtrip(Address::Domain("example.com".to_string(), 80)).await;
    }

    #[tokio::test]
    async fn unknown_address_type_is_rejected() {
        let buf = [9u8, 0, 0];
        match read_address(&mut &buf[..]).await {
            Err(Error::UnrecognizedAddrType(9)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn reply_frame_without_address_uses_zero_placeholder() {
        let mut frame = Vec::new();
        send_reply(&mut frame, Reply::HostUnreachable, None)
            .await
            .unwrap();
        assert_eq!(frame, [VER, 4, 0, ATYP_IPV4, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn reply_frame_carries_bind_address() {
        let mut frame = Vec::new();
        let bind = Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1), 1080);
        send_reply(&mut frame, Reply::Success, Some(&bind)).await.unwrap();
        assert_eq!(frame, [VER, 0, 0, ATYP_IPV4, 127, 0, 0, 1, 4, 56]);
    }

    #[test]
    fn network_errors_map_to_reply_codes() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(err_to_reply(&refused), Reply::ConnectionRefused);
        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(err_to_reply(&other), Reply::GeneralFailure);
    }
}
