//! Read-session cache and chunk-read orchestrator of a distributed
//! filesystem mount.
//!
//! Every file opened for reading gets a [`ReadSession`] from the
//! [`ReadCache`]. Reads on a session are serialized, split into chunk-level
//! transfers performed by a [`ChunkReader`](chunk::ChunkReader), and retried
//! according to the failure category. A background task ages the sessions,
//! reclaims closed ones and reaps idle chunk-server connections.
//!
//! ```ignore
//! let cache = ReadCache::init(ReadCacheConfig::default(), Arc::new(store))?;
//! let session = cache.create_session(inode);
//! let buf = session.read(0, 64 * 1024).await?;
//! consume(&buf);
//! buf.release();
//! session.close().await;
//! cache.shutdown().await;
//! ```

pub mod cache;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod error;
mod read;
pub mod session;

pub use cache::ReadCache;
pub use config::ReadCacheConfig;
pub use error::{ChunkReadError, ChunkStatus, ConfigError, ReadError};
pub use session::{ReadBuffer, ReadSession};
