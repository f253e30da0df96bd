#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use libreadcache::chunk::memory::InMemoryChunkStore;
use libreadcache::chunk::{ChunkLayout, ChunkLocation, ChunkReader, ChunkReaderFactory};
use libreadcache::connection::ChunkConnector;
use libreadcache::{ChunkReadError, ReadCache, ReadCacheConfig};

pub const BLOCK: u32 = 16;
pub const CHUNK: u32 = 64;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small geometry so multi-chunk reads stay cheap. The sweep task is slowed
/// down unless a test asks otherwise.
pub fn test_config() -> ReadCacheConfig {
    ReadCacheConfig {
        block_size: BLOCK,
        chunk_size: CHUNK,
        sweep_interval_ms: 3_600_000,
        max_retries: 30,
        ..Default::default()
    }
}

pub fn file_contents(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Default)]
pub struct Script {
    /// Failures handed out by `read_data`, front first.
    pub read_failures: VecDeque<ChunkReadError>,
    /// Returned by every `read_data` once `read_failures` is empty.
    pub always_fail: Option<ChunkReadError>,
    /// Extra bytes appended after every successful `read_data`, as a
    /// redundant encoding may do.
    pub overshoot: usize,
    pub prepare_calls: Vec<(u32, u32)>,
    pub read_calls: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

/// In-memory store whose readers can be told to fail.
#[derive(Clone)]
pub struct ScriptedStore {
    pub store: InMemoryChunkStore,
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            store: InMemoryChunkStore::new(ChunkLayout {
                block_size: BLOCK,
                chunk_size: CHUNK,
            }),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn fail_reads(&self, failures: impl IntoIterator<Item = ChunkReadError>) {
        self.script.lock().unwrap().read_failures.extend(failures);
    }

    pub fn fail_forever(&self, failure: ChunkReadError) {
        self.script.lock().unwrap().always_fail = Some(failure);
    }

    pub fn overshoot_reads(&self, extra: usize) {
        self.script.lock().unwrap().overshoot = extra;
    }

    pub fn prepare_calls(&self) -> Vec<(u32, u32)> {
        self.script.lock().unwrap().prepare_calls.clone()
    }

    pub fn read_calls(&self) -> usize {
        self.script.lock().unwrap().read_calls
    }

    pub fn max_in_flight(&self) -> usize {
        self.script.lock().unwrap().max_in_flight
    }

    pub fn cache(&self, config: ReadCacheConfig) -> ReadCache {
        init_logger();
        ReadCache::init(config, Arc::new(self.clone())).unwrap()
    }
}

impl ChunkReaderFactory for ScriptedStore {
    fn create_reader(&self, connector: ChunkConnector) -> Box<dyn ChunkReader> {
        Box::new(ScriptedReader {
            inner: self.store.create_reader(connector),
            script: self.script.clone(),
        })
    }
}

struct ScriptedReader {
    inner: Box<dyn ChunkReader>,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl ChunkReader for ScriptedReader {
    async fn prepare_reading_chunk(
        &mut self,
        inode: u32,
        index: u32,
    ) -> Result<(), ChunkReadError> {
        self.script.lock().unwrap().prepare_calls.push((inode, index));
        self.inner.prepare_reading_chunk(inode, index).await
    }

    async fn read_data(
        &mut self,
        buf: &mut Vec<u8>,
        offset: u32,
        size: u32,
    ) -> Result<u32, ChunkReadError> {
        {
            let mut script = self.script.lock().unwrap();
            script.read_calls += 1;
            if let Some(err) = script.read_failures.pop_front() {
                return Err(err);
            }
            if let Some(err) = script.always_fail.clone() {
                return Err(err);
            }
            script.in_flight += 1;
            script.max_in_flight = script.max_in_flight.max(script.in_flight);
        }
        // stands in for the network round trip
        tokio::task::yield_now().await;
        let res = self.inner.read_data(buf, offset, size).await;
        let mut script = self.script.lock().unwrap();
        script.in_flight -= 1;
        let got = res?;
        buf.extend(std::iter::repeat_n(0xee, script.overshoot));
        Ok(got + script.overshoot as u32)
    }

    fn location(&self) -> ChunkLocation {
        self.inner.location()
    }
}
