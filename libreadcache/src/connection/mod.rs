//! Reusable connections to chunk servers.
//!
//! - `ConnectionPool`: idle TCP connections parked per chunk-server address,
//!   shared by every read session and reaped by the sweep task.
//! - `connector`: per-session helper that borrows from the pool or dials a
//!   fresh connection.
pub mod connector;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::trace;
use tokio::net::TcpStream;
use tokio::time::Instant;

pub use connector::ChunkConnector;

struct IdleConnection {
    stream: TcpStream,
    valid_until: Instant,
}

/// Idle connections keyed by chunk-server address.
///
/// Safe for concurrent borrow/return; `cleanup` may run while other sessions
/// are using the pool.
#[derive(Default)]
pub struct ConnectionPool {
    connections: Mutex<HashMap<SocketAddr, Vec<IdleConnection>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<SocketAddr, Vec<IdleConnection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a parked connection to `addr` that has not expired yet.
    pub fn get_connection(&self, addr: SocketAddr) -> Option<TcpStream> {
        let now = Instant::now();
        let mut connections = self.connections();
        let idle = connections.get_mut(&addr)?;
        let mut found = None;
        // newest first; expired ones are dropped on the way
        while let Some(conn) = idle.pop() {
            if conn.valid_until > now {
                found = Some(conn.stream);
                break;
            }
        }
        if idle.is_empty() {
            connections.remove(&addr);
        }
        found
    }

    /// Parks `stream` for reuse during `timeout`.
    pub fn put_connection(&self, stream: TcpStream, addr: SocketAddr, timeout: Duration) {
        let valid_until = Instant::now() + timeout;
        self.connections()
            .entry(addr)
            .or_default()
            .push(IdleConnection {
                stream,
                valid_until,
            });
    }

    /// Closes every expired connection and returns how many were closed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut connections = self.connections();
            connections.retain(|_, idle| {
                let mut i = 0;
                while i < idle.len() {
                    if idle[i].valid_until <= now {
                        expired.push(idle.swap_remove(i));
                    } else {
                        i += 1;
                    }
                }
                !idle.is_empty()
            });
        }
        let closed = expired.len();
        if closed > 0 {
            trace!("connection pool closed {closed} idle connections");
        }
        closed
    }

    pub fn idle_count(&self) -> usize {
        self.connections().values().map(Vec::len).sum()
    }
}
