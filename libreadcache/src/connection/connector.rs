//! Per-session connection helper on top of the shared pool.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;

use super::ConnectionPool;

/// Opens connections to chunk servers for one read session.
///
/// The source address is captured when the session is created and stays
/// fixed for the session's lifetime.
#[derive(Clone)]
pub struct ChunkConnector {
    source_ip: Option<Ipv4Addr>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    pool: Arc<ConnectionPool>,
}

impl ChunkConnector {
    pub fn new(
        source_ip: Option<Ipv4Addr>,
        connect_timeout: Duration,
        idle_timeout: Duration,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            source_ip,
            connect_timeout,
            idle_timeout,
            pool,
        }
    }

    /// Returns a pooled connection to `addr` or dials a new one.
    pub async fn start_using_connection(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        if let Some(stream) = self.pool.get_connection(addr) {
            return Ok(stream);
        }
        self.connect(addr).await
    }

    /// Hands a healthy connection back to the pool.
    pub fn end_using_connection(&self, stream: TcpStream, addr: SocketAddr) {
        self.pool.put_connection(stream, addr, self.idle_timeout);
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let (Some(ip), SocketAddr::V4(_)) = (self.source_ip, addr) {
            socket.bind(SocketAddr::new(IpAddr::V4(ip), 0))?;
        }
        let stream = timeout(self.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                )
            })??;
        stream.set_nodelay(true)?;
        debug!("connected to chunk server {addr}");
        Ok(stream)
    }
}
