//! Read orchestration: turns an aligned `(offset, size)` request into
//! chunk-level reads, retrying failures according to their category.

use std::time::Duration;

use log::warn;
use tokio::time::sleep;

use crate::chunk::ChunkLocation;
use crate::error::{ChunkReadError, ChunkStatus, ReadError};
use crate::session::{ReadBuffer, ReadSession, SessionIo};

const NO_VALID_COPIES_FIRST_DELAY: Duration = Duration::from_secs(1);
const NO_VALID_COPIES_DELAY: Duration = Duration::from_secs(60);
/// Extra tries charged for every long no-valid-copies backoff.
const NO_VALID_COPIES_PENALTY: u32 = 6;
const RECOVERABLE_MAX_EXTRA_SECS: u32 = 10;

/// Failed attempts since the last fully successful chunk read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TryCounter(u32);

impl TryCounter {
    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    /// Backoff before retrying after a no-valid-copies failure, or `None`
    /// once the budget is spent.
    pub fn after_no_valid_copies(&mut self, max_retries: u32) -> Option<Duration> {
        if self.0 > max_retries {
            None
        } else if self.0 > 0 {
            self.0 += NO_VALID_COPIES_PENALTY;
            Some(NO_VALID_COPIES_DELAY)
        } else {
            self.0 += 1;
            Some(NO_VALID_COPIES_FIRST_DELAY)
        }
    }

    /// Backoff before retrying after a recoverable failure, or `None` once
    /// the budget is spent. The first retry is immediate.
    pub fn after_recoverable(&mut self, max_retries: u32) -> Option<Duration> {
        if self.0 > max_retries {
            return None;
        }
        let delay = if self.0 > 0 {
            let extra = (self.0 / 3).min(RECOVERABLE_MAX_EXTRA_SECS);
            Duration::from_secs(1 + extra as u64)
        } else {
            Duration::ZERO
        };
        self.0 += 1;
        Some(delay)
    }
}

fn log_read_error(location: &ChunkLocation, err: &ChunkReadError, tries: Option<TryCounter>) {
    match tries {
        Some(tries) => warn!(
            "read file error, inode: {}, index: {}, chunk: {}, version: {} - {} (try counter: {})",
            location.inode,
            location.index,
            location.chunk_id,
            location.version,
            err,
            tries.get()
        ),
        None => warn!(
            "read file error, inode: {}, index: {}, chunk: {}, version: {} - {}",
            location.inode, location.index, location.chunk_id, location.version, err
        ),
    }
}

impl ReadSession {
    /// Reads `size` bytes at `offset` of the session's file.
    ///
    /// Both values must be multiples of the block size. The returned buffer
    /// keeps the session locked until it is released; a short buffer means
    /// end of file. Failures are retried internally and only
    /// [`ReadError::Io`] or [`ReadError::StaleHandle`] reach the caller.
    pub async fn read(&self, offset: u64, size: u32) -> Result<ReadBuffer<'_>, ReadError> {
        let layout = self.cache.layout;
        assert!(
            layout.is_block_aligned(offset),
            "read offset {offset} is not a multiple of block size {}",
            layout.block_size
        );
        assert!(
            layout.is_block_aligned(size as u64),
            "read size {size} is not a multiple of block size {}",
            layout.block_size
        );

        let lock = self.acquire().await?;
        let mut force_prepare = lock.force_prepare;
        let mut io = lock.io.clone().lock_owned().await;

        if size == 0 {
            return Ok(ReadBuffer::new(io, 0, lock));
        }

        // Encodings with redundancy may hand back slightly more than asked.
        io.buffer.clear();
        io.buffer
            .reserve(size as usize + 2 * layout.block_size as usize);

        let max_retries = self.cache.config.max_retries;
        let mut tries = TryCounter::default();
        let mut current_offset = offset;
        let mut bytes_left = size;
        let mut bytes_read = 0u32;

        while bytes_left > 0 {
            match self
                .read_from_chunk(&mut io, &mut force_prepare, current_offset, bytes_left)
                .await
            {
                Ok((got, requested)) => {
                    bytes_read += got;
                    current_offset += got as u64;
                    bytes_left -= got;
                    if got < requested {
                        break;
                    }
                    tries.reset();
                }
                Err(err) => {
                    let location = io.reader.location();
                    match err {
                        ChunkReadError::NoValidCopies(_) => {
                            log_read_error(&location, &err, Some(tries));
                            force_prepare = true;
                            let delay = tries
                                .after_no_valid_copies(max_retries)
                                .ok_or(ReadError::Io)?;
                            sleep(delay).await;
                        }
                        ChunkReadError::Recoverable(_) => {
                            log_read_error(&location, &err, Some(tries));
                            force_prepare = true;
                            let delay = tries
                                .after_recoverable(max_retries)
                                .ok_or(ReadError::Io)?;
                            if !delay.is_zero() {
                                sleep(delay).await;
                            }
                        }
                        ChunkReadError::Unrecoverable { status, .. } => {
                            log_read_error(&location, &err, None);
                            return Err(match status {
                                ChunkStatus::NoSuchObject => ReadError::StaleHandle,
                                _ => ReadError::Io,
                            });
                        }
                    }
                }
            }
        }

        Ok(ReadBuffer::new(io, bytes_read as usize, lock))
    }

    /// One step of the read loop: prepares the chunk under `offset` when
    /// needed and reads from it. Returns `(bytes read, bytes requested)`.
    async fn read_from_chunk(
        &self,
        io: &mut SessionIo,
        force_prepare: &mut bool,
        offset: u64,
        bytes_left: u32,
    ) -> Result<(u32, u32), ChunkReadError> {
        let layout = self.cache.layout;
        let chunk_index = layout.chunk_index_of(offset);
        if *force_prepare || io.prepared != Some((self.inode, chunk_index)) {
            io.prepared = None;
            io.reader
                .prepare_reading_chunk(self.inode, chunk_index)
                .await?;
            io.prepared = Some((self.inode, chunk_index));
            *force_prepare = false;
            self.reset_staleness();
        }

        let offset_in_chunk = layout.within_chunk_offset(offset);
        let size_in_chunk = (layout.chunk_size - offset_in_chunk).min(bytes_left);
        let start = io.buffer.len();
        let got = io
            .reader
            .read_data(&mut io.buffer, offset_in_chunk, size_in_chunk)
            .await?
            .min(size_in_chunk);
        // drop whatever the reader appended past the requested range
        io.buffer.truncate(start + got as usize);
        Ok((got, size_in_chunk))
    }
}
