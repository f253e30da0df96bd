//! Read sessions and their wait/wake protocol.
//!
//! A session serializes every operation issued against it: at most one
//! read, close, or buffer release is in flight per session. The critical
//! section spans chunk-server I/O, so exclusion is expressed as a `locked`
//! flag plus a waiter count kept under the registry mutex, with a
//! per-session [`Notify`] as the condition variable. The registry mutex
//! itself is never held across an `.await`.
//!
//! Submodules:
//! - `registry`: session arena, inode buckets and the sweep pass
pub(crate) mod registry;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};

use crate::cache::CacheInner;
use crate::chunk::ChunkReader;
use crate::error::ReadError;
use registry::SessionKey;

/// State touched only by the holder of the session lock.
pub(crate) struct SessionIo {
    pub reader: Box<dyn ChunkReader>,
    /// Reused between reads; valid up to the matching buffer release.
    pub buffer: Vec<u8>,
    /// `(inode, chunk index)` the reader is currently prepared for.
    pub prepared: Option<(u32, u32)>,
}

/// What the registry keeps per session besides its bookkeeping.
#[derive(Clone)]
pub(crate) struct SessionResources {
    pub wake: Arc<Notify>,
    pub io: Arc<AsyncMutex<SessionIo>>,
}

impl SessionResources {
    pub fn new(reader: Box<dyn ChunkReader>) -> Self {
        Self {
            wake: Arc::new(Notify::new()),
            io: Arc::new(AsyncMutex::new(SessionIo {
                reader,
                buffer: Vec::new(),
                prepared: None,
            })),
        }
    }
}

/// Handle to one open-for-read instance of a file.
///
/// Obtained from [`ReadCache::create_session`](crate::ReadCache::create_session).
/// Dropping the handle without [`close`](ReadSession::close) also marks the
/// session for reclamation.
pub struct ReadSession {
    pub(crate) cache: Arc<CacheInner>,
    pub(crate) key: SessionKey,
    pub(crate) inode: u32,
}

/// Exclusive ownership of a session, released on drop.
pub(crate) struct SessionLock<'a> {
    session: &'a ReadSession,
    pub io: Arc<AsyncMutex<SessionIo>>,
    /// The staleness counter had reached its maximum when the lock was taken.
    pub force_prepare: bool,
    invalidate: bool,
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        self.session.release(self.invalidate);
    }
}

/// Gives back a waiter slot if the acquiring future is dropped mid-wait.
struct Waiting<'a> {
    session: &'a ReadSession,
    armed: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut registry = self.session.cache.registry();
        if let Some(entry) = registry.get_mut(self.session.key) {
            entry.state.waiters = entry.state.waiters.saturating_sub(1);
        }
    }
}

impl ReadSession {
    pub(crate) fn new(cache: Arc<CacheInner>, key: SessionKey, inode: u32) -> Self {
        Self { cache, key, inode }
    }

    pub fn inode(&self) -> u32 {
        self.inode
    }

    /// Waits until no one else holds the session, then takes it.
    pub(crate) async fn acquire(&self) -> Result<SessionLock<'_>, ReadError> {
        let mut waiting: Option<Waiting<'_>> = None;
        loop {
            let wake: Arc<Notify>;
            let mut notified;
            {
                let mut registry = self.cache.registry();
                let entry = registry
                    .get_mut(self.key)
                    .ok_or(ReadError::StaleHandle)?;
                if !entry.state.locked {
                    if let Some(mut w) = waiting.take() {
                        w.armed = false;
                        entry.state.waiters -= 1;
                    }
                    entry.state.locked = true;
                    return Ok(SessionLock {
                        session: self,
                        io: entry.resources.io.clone(),
                        force_prepare: entry.state.staleness >= self.cache.config.refresh_ticks,
                        invalidate: false,
                    });
                }
                if waiting.is_none() {
                    entry.state.waiters += 1;
                    waiting = Some(Waiting {
                        session: self,
                        armed: true,
                    });
                }
                wake = entry.resources.wake.clone();
                // Registered before the registry is unlocked, so neither a
                // release nor a shutdown can slip in unnoticed.
                notified = Box::pin(wake.notified());
                notified.as_mut().enable();
                drop(registry);
            }
            notified.await;
        }
    }

    /// Leaves the critical section, waking one waiter if there is any.
    pub(crate) fn release(&self, invalidate: bool) {
        let mut registry = self.cache.registry();
        let Some(entry) = registry.get_mut(self.key) else {
            return;
        };
        if !entry.state.locked {
            warn!(
                "release of unlocked read session (inode: {}), ignoring",
                self.inode
            );
            return;
        }
        if invalidate {
            entry.state.valid = false;
        }
        if entry.state.waiters > 0 {
            entry.resources.wake.notify_one();
        }
        entry.state.locked = false;
    }

    pub(crate) fn reset_staleness(&self) {
        if let Some(entry) = self.cache.registry().get_mut(self.key) {
            entry.state.staleness = 0;
        }
    }

    /// Marks the session invalid once in-flight work on it has finished.
    /// The sweep task reclaims it later.
    pub async fn close(self) {
        match self.acquire().await {
            Ok(mut lock) => lock.invalidate = true,
            Err(_) => debug!("closing read session of inode {} that is already gone", self.inode),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> Option<registry::SessionState> {
        self.cache.registry().get(self.key).map(|e| e.state.clone())
    }
}

impl Drop for ReadSession {
    fn drop(&mut self) {
        if let Some(entry) = self.cache.registry().get_mut(self.key) {
            entry.state.valid = false;
        }
    }
}

/// Bytes produced by a successful read.
///
/// Holds the session until it is released (explicitly or by dropping it);
/// the next read or close on the same session waits for that.
pub struct ReadBuffer<'a> {
    io: OwnedMutexGuard<SessionIo>,
    len: usize,
    lock: SessionLock<'a>,
}

impl<'a> ReadBuffer<'a> {
    pub(crate) fn new(io: OwnedMutexGuard<SessionIo>, len: usize, lock: SessionLock<'a>) -> Self {
        Self {
            io,
            len,
            lock,
        }
    }

    pub fn bytes_read(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.io.buffer[..self.len]
    }

    /// Hands the session back to other callers.
    pub fn release(self) {}
}

impl fmt::Debug for ReadBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBuffer")
            .field("inode", &self.lock.session.inode)
            .field("bytes_read", &self.len)
            .finish()
    }
}

impl Deref for ReadBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}
