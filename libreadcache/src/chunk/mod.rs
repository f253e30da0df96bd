//! Chunk addressing and the chunk-reader boundary.
//!
//! A file is an ordered sequence of fixed-size chunks, each made of blocks.
//! The read orchestrator only talks to chunk servers through the
//! [`ChunkReader`] trait; location resolution and the wire protocol live
//! behind it.
//!
//! Submodules:
//! - `memory`: in-memory chunk store used for development and tests
pub mod memory;

use async_trait::async_trait;

use crate::config::ReadCacheConfig;
use crate::connection::ChunkConnector;
use crate::error::ChunkReadError;

/// Block and chunk geometry of the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub block_size: u32,
    pub chunk_size: u32,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            block_size: crate::config::DEFAULT_BLOCK_SIZE,
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl From<&ReadCacheConfig> for ChunkLayout {
    fn from(cfg: &ReadCacheConfig) -> Self {
        Self {
            block_size: cfg.block_size,
            chunk_size: cfg.chunk_size,
        }
    }
}

impl ChunkLayout {
    pub fn chunk_index_of(&self, file_offset: u64) -> u32 {
        (file_offset / self.chunk_size as u64) as u32
    }

    pub fn chunk_start(&self, chunk_index: u32) -> u64 {
        chunk_index as u64 * self.chunk_size as u64
    }

    pub fn within_chunk_offset(&self, file_offset: u64) -> u32 {
        (file_offset % self.chunk_size as u64) as u32
    }

    pub fn is_block_aligned(&self, value: u64) -> bool {
        value % self.block_size as u64 == 0
    }
}

/// What a reader currently knows about the chunk it is prepared for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkLocation {
    pub inode: u32,
    pub index: u32,
    pub chunk_id: u64,
    pub version: u32,
}

/// Transfers chunk data for one read session.
///
/// Implementations resolve the chunk location (talking to the master) in
/// `prepare_reading_chunk` and move bytes from chunk servers in `read_data`.
#[async_trait]
pub trait ChunkReader: Send {
    /// Resolves where chunk `index` of `inode` lives and gets ready to read it.
    async fn prepare_reading_chunk(&mut self, inode: u32, index: u32)
    -> Result<(), ChunkReadError>;

    /// Appends up to `size` bytes starting at `offset` within the prepared
    /// chunk to `buf`. Returning fewer than `size` bytes means end of file.
    async fn read_data(
        &mut self,
        buf: &mut Vec<u8>,
        offset: u32,
        size: u32,
    ) -> Result<u32, ChunkReadError>;

    fn location(&self) -> ChunkLocation;
}

/// Builds the reader owned by a new session.
pub trait ChunkReaderFactory: Send + Sync {
    fn create_reader(&self, connector: ChunkConnector) -> Box<dyn ChunkReader>;
}
