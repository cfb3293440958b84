use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_stream::wrappers::TcpListenerStream;

use crate::auth::Authentication;
use crate::error::{Error, Result};
use crate::proto::*;
use crate::tunnel::{tunnel, BytesPool, PooledBuf, BUFFER_SIZE};

/// Outbound connection produced by a [`ProxyDial`]. Handlers need the
/// typed local address for the success reply, so it is part of the
/// contract rather than a downcast.
pub trait Outbound: AsyncRead + AsyncWrite + Send + Unpin {
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Outbound for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }
}

/// Establishes the outbound transport connection for CONNECT.
#[async_trait]
pub trait ProxyDial: Send + Sync {
    async fn dial(&self, addr: &str) -> io::Result<Box<dyn Outbound>>;
}

/// Opens the UDP relay socket for ASSOCIATE.
#[async_trait]
pub trait PacketListen: Send + Sync {
    async fn listen_packet(&self, addr: &str) -> io::Result<UdpSocket>;
}

struct DefaultDial;

#[async_trait]
impl ProxyDial for DefaultDial {
    async fn dial(&self, addr: &str) -> io::Result<Box<dyn Outbound>> {
        Ok(Box::new(TcpStream::connect(addr).await?))
    }
}

struct DefaultPacketListen;

#[async_trait]
impl PacketListen for DefaultPacketListen {
    async fn listen_packet(&self, addr: &str) -> io::Result<UdpSocket> {
        UdpSocket::bind(addr).await
    }
}

/// One proxied request, produced by negotiation and request parsing and
/// consumed by exactly one handler.
pub(crate) struct Request {
    pub(crate) command: Command,
    pub(crate) destination: Address,
    pub(crate) username: Option<String>,
    pub(crate) stream: TcpStream,
}

/// SOCKS5 server. Cheap to clone; all collaborators are shared and must
/// tolerate concurrent sessions.
#[derive(Clone)]
pub struct Server {
    pub(crate) authentication: Option<Arc<dyn Authentication>>,
    pub(crate) dial: Arc<dyn ProxyDial>,
    pub(crate) packet_listen: Arc<dyn PacketListen>,
    pub(crate) bytes_pool: Option<Arc<dyn BytesPool>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Creates a server with the default TCP dialer, the default
    /// ephemeral UDP listener, no authentication and no buffer pool.
    pub fn new() -> Self {
        Self {
            authentication: None,
            dial: Arc::new(DefaultDial),
            packet_listen: Arc::new(DefaultPacketListen),
            bytes_pool: None,
        }
    }

    /// Requires username/password authentication for every session.
    pub fn set_authentication<A: Authentication + 'static>(&mut self, auth: A) -> &mut Self {
        self.authentication = Some(Arc::new(auth));
        self
    }

    /// Replaces the outbound dialer used by CONNECT.
    pub fn set_dial<D: ProxyDial + 'static>(&mut self, dial: D) -> &mut Self {
        self.dial = Arc::new(dial);
        self
    }

    /// Replaces the UDP socket factory used by ASSOCIATE.
    pub fn set_packet_listen<L: PacketListen + 'static>(&mut self, listen: L) -> &mut Self {
        self.packet_listen = Arc::new(listen);
        self
    }

    /// Sources tunnel buffers from `pool` instead of allocating per
    /// session. Each acquired buffer is returned exactly once.
    pub fn set_bytes_pool<P: BytesPool + 'static>(&mut self, pool: P) -> &mut Self {
        self.bytes_pool = Some(Arc::new(pool));
        self
    }

    /// Binds `addr` and serves until the listener fails.
    pub async fn listen(self, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept loop: one spawned task per connection. Returns on the
    /// first listener-level failure, which is fatal to the server.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let mut incoming = TcpListenerStream::new(listener);
        while let Some(stream) = incoming.next().await {
            let stream = stream?;
            let server = self.clone();
            tokio::spawn(async move {
                server.serve_conn(stream).await;
            });
        }
        Ok(())
    }

    /// Serves a single accepted connection through to teardown. Errors
    /// never cross session boundaries; anything abnormal is logged here.
    pub async fn serve_conn(&self, stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        if let Err(err) = self.handle_conn(stream).await {
            if !err.is_closed() {
                match peer {
                    Some(peer) => warn!("socks5: {}: {}", peer, err),
                    None => warn!("socks5: {}", err),
                }
            }
        }
    }

    async fn handle_conn(&self, mut stream: TcpStream) -> Result<()> {
        let username = self.negotiate(&mut stream).await?;
        let request = self.read_request(stream, username).await?;
        self.handle(request).await
    }

    /// Method selection plus the optional username/password
    /// sub-negotiation. Every rejection is written to the wire before
    /// the error is returned.
    async fn negotiate(&self, stream: &mut TcpStream) -> Result<Option<String>> {
        let version = stream.read_u8().await?;
        if version != VER {
            return Err(Error::UnsupportedVersion(version));
        }

        let nmethods = stream.read_u8().await?;
        let mut methods = vec![0u8; nmethods as usize];
        stream.read_exact(&mut methods).await?;

        match &self.authentication {
            Some(auth) if methods.contains(&USER_AUTH) => {
                stream.write_all(&[VER, USER_AUTH]).await?;

                let subversion = stream.read_u8().await?;
                if subversion != USER_AUTH_VER {
                    return Err(Error::UnsupportedAuthVersion(subversion));
                }

                let username = read_lengthed(stream).await?;
                let password = read_lengthed(stream).await?;

                // Credentials are rejected as-is when they are not
                // valid UTF-8; normalizing them would make distinct
                // byte sequences compare equal.
                let (username, password) =
                    match (String::from_utf8(username), String::from_utf8(password)) {
                        (Ok(username), Ok(password)) => (username, password),
                        _ => {
                            stream.write_all(&[USER_AUTH_VER, AUTH_FAILURE]).await?;
                            return Err(Error::AuthFailed);
                        }
                    };

                // The command has not been read yet, so the
                // authenticator only sees the placeholder.
                if !auth.authenticate(Command::Other(0), &username, &password).await {
                    stream.write_all(&[USER_AUTH_VER, AUTH_FAILURE]).await?;
                    return Err(Error::AuthFailed);
                }
                stream.write_all(&[USER_AUTH_VER, AUTH_SUCCESS]).await?;
                Ok(Some(username))
            }
            None if methods.contains(&NO_AUTH) => {
                stream.write_all(&[VER, NO_AUTH]).await?;
                Ok(None)
            }
            _ => {
                stream.write_all(&[VER, NO_ACCEPTABLE]).await?;
                Err(Error::NoSupportedAuth)
            }
        }
    }

    async fn read_request(&self, mut stream: TcpStream, username: Option<String>) -> Result<Request> {
        let mut header = [0u8; 3];
        stream.read_exact(&mut header).await?;
        if header[0] != VER {
            return Err(Error::UnsupportedVersion(header[0]));
        }
        let command = Command::from(header[1]);

        let destination = match read_address(&mut stream).await {
            Ok(addr) => addr,
            Err(err @ Error::UnrecognizedAddrType(_)) => {
                send_reply(&mut stream, Reply::AddrTypeNotSupported, None).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        Ok(Request {
            command,
            destination,
            username,
            stream,
        })
    }

    async fn handle(&self, mut req: Request) -> Result<()> {
        debug!(
            "socks5: {:?} {} user={:?}",
            req.command, req.destination, req.username
        );
        match req.command {
            Command::Connect => self.handle_connect(req).await,
            Command::Bind => self.handle_bind(req).await,
            Command::Associate => self.handle_associate(req).await,
            Command::Other(cmd) => {
                send_reply(&mut req.stream, Reply::CommandNotSupported, None).await?;
                Err(Error::UnsupportedCommand(cmd))
            }
        }
    }

    async fn handle_connect(&self, mut req: Request) -> Result<()> {
        let target = match self.dial.dial(&req.destination.to_string()).await {
            Ok(target) => target,
            Err(err) => {
                send_reply(&mut req.stream, err_to_reply(&err), None).await?;
                return Err(err.into());
            }
        };

        let bind = target.local_addr()?;
        send_reply(&mut req.stream, Reply::Success, Some(&Address::from(bind))).await?;

        self.run_tunnel(target, req.stream).await
    }

    /// BIND always uses the default listen facility; there is no
    /// pluggable hook here, matching CONNECT/ASSOCIATE would be a
    /// behavior change.
    async fn handle_bind(&self, mut req: Request) -> Result<()> {
        let listener = match TcpListener::bind(req.destination.to_string()).await {
            Ok(listener) => listener,
            Err(err) => {
                send_reply(&mut req.stream, err_to_reply(&err), None).await?;
                return Err(err.into());
            }
        };

        let bind = listener.local_addr()?;
        send_reply(&mut req.stream, Reply::Success, Some(&Address::from(bind))).await?;

        let (peer, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                drop(listener);
                send_reply(&mut req.stream, err_to_reply(&err), None).await?;
                return Err(err.into());
            }
        };
        // Only one peer is ever accepted.
        drop(listener);

        send_reply(&mut req.stream, Reply::Success, Some(&Address::from(peer_addr))).await?;

        self.run_tunnel(peer, req.stream).await
    }

    async fn run_tunnel<A, B>(&self, a: A, b: B) -> Result<()>
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let res = match &self.bytes_pool {
            Some(pool) => {
                let mut buf1 = PooledBuf::new(pool.as_ref());
                let mut buf2 = PooledBuf::new(pool.as_ref());
                tunnel(a, b, buf1.as_mut(), buf2.as_mut()).await
            }
            None => {
                let mut buf1 = vec![0u8; BUFFER_SIZE];
                let mut buf2 = vec![0u8; BUFFER_SIZE];
                tunnel(a, b, &mut buf1, &mut buf2).await
            }
        };
        res.map_err(Error::from)
    }
}

async fn read_lengthed(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let len = stream.read_u8().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
