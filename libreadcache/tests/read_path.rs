mod common;

use std::time::Duration;

use common::{BLOCK, CHUNK, ScriptedStore, file_contents, test_config};
use libreadcache::{ChunkReadError, ChunkStatus, ReadCacheConfig, ReadError};
use tokio::time::Instant;

#[tokio::test]
async fn test_read_spanning_chunks_returns_requested_bytes() {
    let scripted = ScriptedStore::new();
    let contents = file_contents(300);
    scripted.store.write_file(3, &contents);
    let cache = scripted.cache(test_config());
    let session = cache.create_session(3);

    let buf = session.read(BLOCK as u64 * 2, BLOCK * 16).await.unwrap();
    assert_eq!(buf.bytes_read(), 256);
    assert_eq!(&buf[..], &contents[32..288]);
    buf.release();

    // chunks 0..=4 were each prepared once, in offset order
    let prepared: Vec<u32> = scripted.prepare_calls().iter().map(|c| c.1).collect();
    assert_eq!(prepared, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_surplus_bytes_from_reader_are_discarded() {
    let scripted = ScriptedStore::new();
    let contents = file_contents(CHUNK as usize * 3);
    scripted.store.write_file(3, &contents);
    scripted.overshoot_reads(BLOCK as usize);
    let cache = scripted.cache(test_config());
    let session = cache.create_session(3);

    let buf = session.read(0, CHUNK * 2).await.unwrap();
    assert_eq!(buf.bytes_read(), 128);
    assert_eq!(&buf[..], &contents[..128]);
}

#[tokio::test]
async fn test_short_read_at_end_of_file() {
    let scripted = ScriptedStore::new();
    let contents = file_contents(300);
    scripted.store.write_file(3, &contents);
    let cache = scripted.cache(test_config());
    let session = cache.create_session(3);

    let buf = session.read(256, CHUNK * 2).await.unwrap();
    assert_eq!(buf.bytes_read(), 44);
    assert_eq!(&buf[..], &contents[256..]);
    drop(buf);

    let past_end = session.read(CHUNK as u64 * 10, BLOCK).await.unwrap();
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn test_zero_size_read_touches_nothing() {
    let scripted = ScriptedStore::new();
    let cache = scripted.cache(test_config());
    let session = cache.create_session(1);

    let buf = session.read(0, 0).await.unwrap();
    assert_eq!(buf.bytes_read(), 0);
    buf.release();
    assert!(scripted.prepare_calls().is_empty());
    assert_eq!(scripted.read_calls(), 0);
}

#[tokio::test]
#[should_panic(expected = "not a multiple of block size")]
async fn test_unaligned_offset_is_a_caller_bug() {
    let scripted = ScriptedStore::new();
    let cache = scripted.cache(test_config());
    let session = cache.create_session(1);
    let _ = session.read(5, BLOCK).await;
}

#[tokio::test(start_paused = true)]
async fn test_recoverable_failures_back_off_then_succeed() {
    let scripted = ScriptedStore::new();
    let contents = file_contents(CHUNK as usize);
    scripted.store.write_file(7, &contents);
    scripted.fail_reads((0..4).map(|i| ChunkReadError::recoverable(format!("disconnect {i}"))));
    let cache = scripted.cache(test_config());
    let session = cache.create_session(7);

    let start = Instant::now();
    let buf = session.read(0, CHUNK).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(&buf[..], &contents[..]);
    // tries 0..=3 wait 0s, 1s, 1s and 2s
    assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
    // every failure forces the chunk location to be resolved again
    assert_eq!(scripted.prepare_calls().len(), 5);
    assert_eq!(scripted.read_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_no_valid_copies_exhausts_budget_with_io_error() {
    let scripted = ScriptedStore::new();
    scripted.store.write_file(7, &file_contents(100));
    scripted.fail_forever(ChunkReadError::no_valid_copies("all replicas down"));
    let config = ReadCacheConfig {
        max_retries: 2,
        ..test_config()
    };
    let cache = scripted.cache(config);
    let session = cache.create_session(7);

    let start = Instant::now();
    let err = session.read(0, BLOCK).await.unwrap_err();
    assert_eq!(err, ReadError::Io);
    assert_eq!(err.errno(), libc::EIO);
    // 1s, then 60s with the try counter jumping from 1 to 7 > 2
    assert_eq!(start.elapsed().as_secs(), 61);
    assert_eq!(scripted.read_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_recoverable_exhaustion_is_io_error() {
    let scripted = ScriptedStore::new();
    scripted.store.write_file(7, &file_contents(100));
    scripted.fail_forever(ChunkReadError::recoverable("timeout"));
    let config = ReadCacheConfig {
        max_retries: 3,
        ..test_config()
    };
    let cache = scripted.cache(config);
    let session = cache.create_session(7);

    let start = Instant::now();
    assert_eq!(session.read(0, BLOCK).await.unwrap_err(), ReadError::Io);
    // 0 + 1 + 1 + 2 seconds before the fifth failure gives up
    assert_eq!(start.elapsed().as_secs(), 4);
    assert_eq!(scripted.read_calls(), 5);

    // the failed read released the session
    let state_free = session.read(0, 0).await;
    assert!(state_free.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_missing_object_is_stale_handle_without_retry() {
    let scripted = ScriptedStore::new();
    let cache = scripted.cache(test_config());
    let session = cache.create_session(404);

    let start = Instant::now();
    let err = session.read(0, BLOCK).await.unwrap_err();
    assert_eq!(err, ReadError::StaleHandle);
    assert_eq!(err.errno(), libc::EBADF);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(scripted.prepare_calls().len(), 1);
    assert_eq!(scripted.read_calls(), 0);
}

#[tokio::test]
async fn test_other_unrecoverable_failure_is_io_error() {
    let scripted = ScriptedStore::new();
    scripted.store.write_file(1, &file_contents(100));
    scripted.fail_reads([ChunkReadError::unrecoverable(
        ChunkStatus::PermissionDenied,
        "chunk locked",
    )]);
    let cache = scripted.cache(test_config());
    let session = cache.create_session(1);

    assert_eq!(session.read(0, BLOCK).await.unwrap_err(), ReadError::Io);
    assert_eq!(scripted.read_calls(), 1);
}

#[tokio::test]
async fn test_invalidation_forces_prepare_on_same_chunk() {
    let scripted = ScriptedStore::new();
    scripted.store.write_file(9, &file_contents(200));
    let cache = scripted.cache(test_config());
    let session = cache.create_session(9);

    session.read(0, BLOCK).await.unwrap().release();
    session.read(BLOCK as u64, BLOCK).await.unwrap().release();
    assert_eq!(scripted.prepare_calls(), vec![(9, 0)]);

    assert_eq!(cache.invalidate_sessions_for_inode(9), 1);
    session.read(BLOCK as u64, BLOCK).await.unwrap().release();
    assert_eq!(scripted.prepare_calls(), vec![(9, 0), (9, 0)]);

    // the fresh preparation reset the counter
    session.read(0, BLOCK).await.unwrap().release();
    assert_eq!(scripted.prepare_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_aged_session_refreshes_chunk_location() {
    let scripted = ScriptedStore::new();
    scripted.store.write_file(9, &file_contents(200));
    let config = ReadCacheConfig {
        sweep_interval_ms: 10,
        refresh_ticks: 2,
        ..test_config()
    };
    let cache = scripted.cache(config);
    let session = cache.create_session(9);

    session.read(0, BLOCK).await.unwrap().release();
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.read(0, BLOCK).await.unwrap().release();
    assert_eq!(scripted.prepare_calls(), vec![(9, 0), (9, 0)]);
}

#[tokio::test]
async fn test_invalidation_does_not_touch_other_inodes() {
    let scripted = ScriptedStore::new();
    scripted.store.write_file(1, &file_contents(100));
    // same bucket as inode 1 with the default 1024 buckets
    scripted.store.write_file(1025, &file_contents(100));
    let cache = scripted.cache(test_config());
    let a = cache.create_session(1);
    let b = cache.create_session(1025);

    a.read(0, BLOCK).await.unwrap().release();
    b.read(0, BLOCK).await.unwrap().release();
    assert_eq!(cache.invalidate_sessions_for_inode(1), 1);
    b.read(0, BLOCK).await.unwrap().release();
    assert_eq!(scripted.prepare_calls(), vec![(1, 0), (1025, 0)]);
}
