//! The read cache: session registry, sweep task and process lifecycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, trace};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::chunk::{ChunkLayout, ChunkReaderFactory};
use crate::config::ReadCacheConfig;
use crate::connection::{ChunkConnector, ConnectionPool};
use crate::error::ConfigError;
use crate::session::registry::Registry;
use crate::session::{ReadSession, SessionResources};

pub(crate) struct CacheInner {
    pub config: ReadCacheConfig,
    pub layout: ChunkLayout,
    registry: Mutex<Registry<SessionResources>>,
    pool: Arc<ConnectionPool>,
    factory: Arc<dyn ChunkReaderFactory>,
    shutdown: Notify,
}

impl CacheInner {
    /// Locks the registry. Callers keep the guard for short, non-blocking
    /// work only.
    pub fn registry(&self) -> MutexGuard<'_, Registry<SessionResources>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-mount registry of read sessions.
///
/// Constructed once when the mount starts and shut down when it ends. A
/// background task ages the sessions, reclaims the closed ones and reaps
/// idle chunk-server connections.
pub struct ReadCache {
    pub(crate) inner: Arc<CacheInner>,
    sweeper: Option<JoinHandle<()>>,
}

impl ReadCache {
    /// Validates `config` and starts the sweep task on the current tokio
    /// runtime.
    pub fn init(
        config: ReadCacheConfig,
        factory: Arc<dyn ChunkReaderFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let inner = Arc::new(CacheInner {
            layout: ChunkLayout::from(&config),
            registry: Mutex::new(Registry::new(config.bucket_bits)),
            pool: Arc::new(ConnectionPool::new()),
            factory,
            shutdown: Notify::new(),
            config,
        });
        let sweeper = tokio::spawn(sweep_loop(inner.clone()));
        info!(
            "read cache started (max retries: {}, sweep interval: {:?})",
            inner.config.max_retries,
            inner.config.sweep_interval()
        );
        Ok(Self {
            inner,
            sweeper: Some(sweeper),
        })
    }

    /// Opens a new session for `inode`. Sessions of the same inode are
    /// independent of each other.
    pub fn create_session(&self, inode: u32) -> ReadSession {
        let cfg = &self.inner.config;
        let connector = ChunkConnector::new(
            cfg.source_ip,
            cfg.connect_timeout(),
            cfg.idle_connection_timeout(),
            self.inner.pool.clone(),
        );
        let reader = self.inner.factory.create_reader(connector);
        let key = self
            .inner
            .registry()
            .insert(inode, SessionResources::new(reader));
        debug!("created read session for inode {inode}");
        ReadSession::new(self.inner.clone(), key, inode)
    }

    /// Attributes of `inode` changed: every session of it re-resolves chunk
    /// locations on its next read. Returns how many sessions were marked.
    pub fn invalidate_sessions_for_inode(&self, inode: u32) -> usize {
        let ticks = self.inner.config.refresh_ticks;
        self.inner.registry().mark_stale(inode, ticks)
    }

    /// Sessions still present in the registry, including closed ones that
    /// the sweep task has not reclaimed yet.
    pub fn session_count(&self) -> usize {
        self.inner.registry().len()
    }

    pub fn connection_pool(&self) -> &Arc<ConnectionPool> {
        &self.inner.pool
    }

    pub fn config(&self) -> &ReadCacheConfig {
        &self.inner.config
    }

    /// Stops the sweep task and destroys every remaining session. Handles
    /// that outlive the cache fail with a stale-handle error.
    pub async fn shutdown(mut self) {
        self.stop_sweeper();
        if let Some(sweeper) = self.sweeper.take()
            && let Err(e) = sweeper.await
        {
            error!("read cache sweep task failed: {e}");
        }
        let destroyed = self.inner.registry().drain();
        // blocked callers re-check their handle and fail as stale
        for resources in &destroyed {
            resources.wake.notify_waiters();
        }
        info!(
            "read cache stopped, destroyed {} remaining sessions",
            destroyed.len()
        );
    }

    fn stop_sweeper(&self) {
        self.inner.registry().terminate = true;
        self.inner.shutdown.notify_one();
    }
}

impl Drop for ReadCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            self.stop_sweeper();
            sweeper.abort();
        }
    }
}

async fn sweep_loop(inner: Arc<CacheInner>) {
    let interval = inner.config.sweep_interval();
    let refresh_ticks = inner.config.refresh_ticks;
    loop {
        inner.pool.cleanup();
        let reclaimed = {
            let mut registry = inner.registry();
            if registry.terminate {
                return;
            }
            registry.sweep(refresh_ticks)
        };
        if !reclaimed.is_empty() {
            debug!("reclaimed {} closed read sessions", reclaimed.len());
        }
        drop(reclaimed);
        trace!("read cache sweep done");

        tokio::select! {
            _ = sleep(interval) => {}
            _ = inner.shutdown.notified() => {}
        }
    }
}
