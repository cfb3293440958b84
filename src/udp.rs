use std::io;
use std::net::SocketAddr;

use tokio::io::AsyncReadExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};

use crate::error::Result;
use crate::proto::*;
use crate::server::{Request, Server};

const MAX_UDP_PACKET: usize = 65507;

impl Server {
    /// ASSOCIATE: opens a relay socket, tells the client where it is,
    /// then forwards datagrams between the first-seen client source and
    /// the resolved destination until the control connection closes.
    pub(crate) async fn handle_associate(&self, mut req: Request) -> Result<()> {
        // Every relayed datagram carries this header: reserved bytes,
        // fragment 0, then the destination address as requested.
        let mut prefix = vec![0u8, 0, 0];
        req.destination.encode_into(&mut prefix);

        let destination = match resolve(&req.destination.to_string()).await {
            Ok(addr) => addr,
            Err(err) => {
                send_reply(&mut req.stream, Reply::HostUnreachable, None).await?;
                return Err(err.into());
            }
        };

        let socket = match self.packet_listen.listen_packet("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(err) => {
                send_reply(&mut req.stream, err_to_reply(&err), None).await?;
                return Err(err.into());
            }
        };

        let bind = socket.local_addr()?;
        send_reply(&mut req.stream, Reply::Success, Some(&Address::from(bind))).await?;

        // The watcher side of the race holds the control connection;
        // when it closes, the relay is torn down. That is the normal
        // end of an association, not an error.
        tokio::select! {
            res = relay(&socket, &prefix, destination) => res,
            _ = watch_control(&mut req.stream) => Ok(()),
        }
    }
}

async fn resolve(addr: &str) -> io::Result<SocketAddr> {
    lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, format!("no address for {}", addr)))
}

/// Reads the control connection one byte at a time, returning only when
/// the client goes away.
async fn watch_control(stream: &mut TcpStream) {
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

async fn relay(socket: &UdpSocket, prefix: &[u8], destination: SocketAddr) -> Result<()> {
    let mut client: Option<SocketAddr> = None;
    let mut buf = vec![0u8; MAX_UDP_PACKET];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;

        // The first datagram latches the client source for the rest of
        // the association.
        let client_addr = *client.get_or_insert(from);

        if from == client_addr {
            // Anything not framed for our destination is dropped.
            if !buf[..n].starts_with(prefix) {
                continue;
            }
            socket.send_to(&buf[prefix.len()..n], destination).await?;
        } else if from == destination {
            let mut framed = Vec::with_capacity(prefix.len() + n);
            framed.extend_from_slice(prefix);
            framed.extend_from_slice(&buf[..n]);
            socket.send_to(&framed, client_addr).await?;
        }
        // Datagrams from any other source are ignored.
    }
}
