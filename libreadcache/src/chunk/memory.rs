//! In-memory chunk store: lays file contents out in chunks for local
//! development and tests.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::{ChunkLayout, ChunkLocation, ChunkReader, ChunkReaderFactory};
use crate::connection::ChunkConnector;
use crate::error::{ChunkReadError, ChunkStatus};

struct StoredChunk {
    chunk_id: u64,
    version: u32,
    data: Vec<u8>,
}

struct StoredFile {
    length: u64,
    chunks: HashMap<u32, StoredChunk>,
}

#[derive(Default)]
struct StoreState {
    files: HashMap<u32, StoredFile>,
    next_chunk_id: u64,
}

/// Shared chunk contents keyed by `(inode, chunk index)`.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct InMemoryChunkStore {
    layout: ChunkLayout,
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryChunkStore {
    pub fn new(layout: ChunkLayout) -> Self {
        Self {
            layout,
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    /// Replaces the contents of `inode`. Chunks that are entirely zero are
    /// left as holes.
    pub fn write_file(&self, inode: u32, contents: &[u8]) {
        let chunk_size = self.layout.chunk_size as usize;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut chunks = HashMap::new();
        for (index, part) in contents.chunks(chunk_size).enumerate() {
            if part.iter().all(|&b| b == 0) {
                continue;
            }
            state.next_chunk_id += 1;
            chunks.insert(
                index as u32,
                StoredChunk {
                    chunk_id: state.next_chunk_id,
                    version: 1,
                    data: part.to_vec(),
                },
            );
        }
        state.files.insert(
            inode,
            StoredFile {
                length: contents.len() as u64,
                chunks,
            },
        );
    }

    pub fn remove_file(&self, inode: u32) -> bool {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .remove(&inode)
            .is_some()
    }

    fn locate(&self, inode: u32, index: u32) -> Result<(ChunkLocation, u64), ChunkReadError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let file = state.files.get(&inode).ok_or_else(|| {
            ChunkReadError::unrecoverable(
                ChunkStatus::NoSuchObject,
                format!("inode {inode} does not exist"),
            )
        })?;
        let (chunk_id, version) = file
            .chunks
            .get(&index)
            .map(|c| (c.chunk_id, c.version))
            .unwrap_or((0, 0));
        Ok((
            ChunkLocation {
                inode,
                index,
                chunk_id,
                version,
            },
            file.length,
        ))
    }

    fn copy_range(&self, location: &ChunkLocation, offset: u32, len: u32, out: &mut Vec<u8>) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let data = state
            .files
            .get(&location.inode)
            .and_then(|f| f.chunks.get(&location.index))
            .map(|c| c.data.as_slice())
            .unwrap_or(&[]);
        let start = out.len();
        out.resize(start + len as usize, 0);
        let from = (offset as usize).min(data.len());
        let to = (offset as usize + len as usize).min(data.len());
        out[start..start + (to - from)].copy_from_slice(&data[from..to]);
    }
}

impl ChunkReaderFactory for InMemoryChunkStore {
    fn create_reader(&self, _connector: ChunkConnector) -> Box<dyn ChunkReader> {
        Box::new(InMemoryChunkReader {
            store: self.clone(),
            prepared: None,
        })
    }
}

struct InMemoryChunkReader {
    store: InMemoryChunkStore,
    prepared: Option<(ChunkLocation, u64)>,
}

#[async_trait]
impl ChunkReader for InMemoryChunkReader {
    async fn prepare_reading_chunk(
        &mut self,
        inode: u32,
        index: u32,
    ) -> Result<(), ChunkReadError> {
        self.prepared = None;
        self.prepared = Some(self.store.locate(inode, index)?);
        Ok(())
    }

    async fn read_data(
        &mut self,
        buf: &mut Vec<u8>,
        offset: u32,
        size: u32,
    ) -> Result<u32, ChunkReadError> {
        let (location, file_length) = self
            .prepared
            .ok_or_else(|| ChunkReadError::recoverable("no chunk prepared"))?;
        let chunk_start = self.store.layout.chunk_start(location.index);
        let available = file_length.saturating_sub(chunk_start + offset as u64);
        let len = (size as u64).min(available) as u32;
        self.store.copy_range(&location, offset, len, buf);
        Ok(len)
    }

    fn location(&self) -> ChunkLocation {
        self.prepared.map(|(l, _)| l).unwrap_or_default()
    }
}
