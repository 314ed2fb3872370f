use anyhow::Result;
use tempfile::tempdir;

use super::helpers::*;
use crate::EngineError;

#[test]
fn put_then_get() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put("a", "1")?;
    engine.put("b", "2")?;

    assert_eq!(engine.get(b"a")?, Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b")?, Some(b"2".to_vec()));
    assert_eq!(engine.get(b"c")?, None);
    Ok(())
}

#[test]
fn overwrite_keeps_latest_value() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put("k", "v1")?;
    engine.put("k", "v2")?;
    engine.put("k", "v2")?;

    assert_eq!(engine.get(b"k")?, Some(b"v2".to_vec()));
    assert_eq!(engine.stats().memtable_entries, 1);
    Ok(())
}

#[test]
fn delete_hides_value() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put("k", "v")?;
    engine.delete("k")?;
    assert_eq!(engine.get(b"k")?, None);

    // re-insert after delete
    engine.put("k", "again")?;
    assert_eq!(engine.get(b"k")?, Some(b"again".to_vec()));
    Ok(())
}

#[test]
fn delete_missing_key_is_not_an_error() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.delete("ghost")?;
    assert_eq!(engine.get(b"ghost")?, None);
    assert_eq!(engine.stats().deleted_keys, 1);
    Ok(())
}

#[test]
fn empty_value_is_a_value() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put("k", "")?;
    assert_eq!(engine.get(b"k")?, Some(Vec::new()));

    engine.flush()?;
    assert_eq!(engine.get(b"k")?, Some(Vec::new()));
    Ok(())
}

#[test]
fn empty_key_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    assert!(matches!(
        engine.put("", "v"),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.delete(""),
        Err(EngineError::InvalidArgument(_))
    ));
    assert_eq!(engine.seq(), 0);
    Ok(())
}

#[test]
fn oversized_key_and_value_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    let big_key = vec![b'k'; sstable::MAX_KEY_BYTES + 1];
    assert!(matches!(
        engine.put(big_key.clone(), "v"),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.delete(big_key),
        Err(EngineError::InvalidArgument(_))
    ));

    let big_value = vec![b'v'; sstable::MAX_VALUE_BYTES + 1];
    assert!(matches!(
        engine.put("k", big_value),
        Err(EngineError::InvalidArgument(_))
    ));

    // nothing reached the WAL or the memtable
    let stats = engine.stats();
    assert_eq!(stats.last_sequence, 0);
    assert_eq!(stats.memtable_entries, 0);
    Ok(())
}

#[test]
fn max_size_key_is_accepted() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    let key = vec![b'k'; sstable::MAX_KEY_BYTES];
    engine.put(key.clone(), "v")?;
    engine.flush()?;
    assert_eq!(engine.get(&key)?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn every_write_takes_a_sequence_number() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    engine.put("a", "1")?;
    engine.put("b", "2")?;
    engine.delete("a")?;
    assert_eq!(engine.seq(), 3);
    Ok(())
}

#[test]
fn flush_writes_sstable_and_clears_memtable() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    for i in 0..10 {
        engine.put(key(i), value(i))?;
    }
    engine.delete(key(3))?;

    let written = engine.flush()?;
    assert_eq!(written, 10);

    let stats = engine.stats();
    assert_eq!(stats.memtable_entries, 0);
    assert_eq!(stats.memtable_size, 0);
    assert_eq!(stats.l0_count, 1);
    assert_eq!(count_sst_files(dir.path()), 1);

    for i in 0..10 {
        let expected = if i == 3 { None } else { Some(value(i)) };
        assert_eq!(engine.get(&key(i))?, expected);
    }
    Ok(())
}

#[test]
fn flush_of_empty_memtable_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    assert_eq!(engine.flush()?, 0);
    assert_eq!(engine.stats().sstable_count, 0);
    assert_eq!(count_sst_files(dir.path()), 0);
    Ok(())
}

#[test]
fn memtable_over_threshold_flushes_automatically() -> Result<()> {
    let dir = tempdir()?;
    // each entry is 6 + 7 = 13 bytes; the fifth put crosses 64
    let engine = open_small(dir.path(), 64)?;

    for i in 0..4 {
        engine.put(key(i), value(i))?;
    }
    assert_eq!(engine.stats().sstable_count, 0);

    engine.put(key(4), value(4))?;
    let stats = engine.stats();
    assert_eq!(stats.sstable_count, 1);
    assert_eq!(stats.memtable_entries, 0);

    for i in 0..5 {
        assert_eq!(engine.get(&key(i))?, Some(value(i)));
    }
    Ok(())
}

#[test]
fn flush_reclaims_wal_segments() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;

    for i in 0..20 {
        engine.put(key(i), value(i))?;
    }
    assert_eq!(count_files(dir.path(), "log"), 1);

    engine.flush()?;

    // the flushed segment is gone; only the fresh one remains
    assert_eq!(engine.stats().wal_segments, 1);
    assert_eq!(count_files(dir.path(), "log"), 1);
    let segments = wal::list_segments(dir.path())?;
    assert_eq!(segments, vec![2]);
    Ok(())
}

#[test]
fn wal_rotates_at_segment_size() -> Result<()> {
    let dir = tempdir()?;
    init_tracing();
    let mut config = test_config(dir.path());
    config.wal_segment_max_size = 128;
    let engine = crate::Engine::new(config)?;

    for i in 0..30 {
        engine.put(key(i), value(i))?;
    }
    assert!(engine.stats().wal_segments > 1);

    engine.flush()?;
    assert_eq!(engine.stats().wal_segments, 1);
    for i in 0..30 {
        assert_eq!(engine.get(&key(i))?, Some(value(i)));
    }
    Ok(())
}

#[test]
fn operations_after_close_fail() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;
    engine.put("a", "1")?;

    engine.close()?;
    engine.close()?;

    assert!(matches!(engine.put("b", "2"), Err(EngineError::Closed)));
    assert!(matches!(engine.delete("a"), Err(EngineError::Closed)));
    assert!(matches!(engine.get(b"a"), Err(EngineError::Closed)));
    assert!(matches!(engine.flush(), Err(EngineError::Closed)));
    assert!(matches!(engine.compact(), Err(EngineError::Closed)));
    assert!(matches!(engine.scan(b"", b""), Err(EngineError::Closed)));
    Ok(())
}

#[test]
fn close_does_not_flush() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;
    engine.put("a", "1")?;
    engine.close()?;

    assert_eq!(count_sst_files(dir.path()), 0);
    assert_eq!(engine.stats().memtable_entries, 1);
    Ok(())
}

#[test]
fn invalid_config_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(dir.path());
    config.memtable_max_size = 0;

    assert!(matches!(
        crate::Engine::new(config),
        Err(EngineError::Config(config::ConfigError::Zero { .. }))
    ));
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn failed_wal_append_leaves_memtable_untouched() -> Result<()> {
    // Writes to /dev/full fail with ENOSPC.
    if !std::path::Path::new("/dev/full").exists() {
        return Ok(());
    }
    let dir = tempdir()?;
    let engine = open(dir.path())?;
    engine.put("a", "1")?;

    // the flush rotates the WAL onto a segment that cannot be written
    std::os::unix::fs::symlink("/dev/full", wal::segment_path(dir.path(), 2))?;
    engine.flush()?;

    assert!(matches!(engine.put("b", "2"), Err(EngineError::Wal(_))));
    assert_eq!(engine.seq(), 1);
    assert_eq!(engine.get(b"b")?, None);
    let stats = engine.stats();
    assert_eq!(stats.memtable_entries, 0);
    assert_eq!(stats.memtable_size, 0);

    // the next write moves to a fresh segment
    engine.put("c", "3")?;
    assert_eq!(engine.seq(), 2);
    engine.close()?;
    drop(engine);

    std::fs::remove_file(wal::segment_path(dir.path(), 2))?;
    let engine = open(dir.path())?;
    assert_eq!(engine.get(b"a")?, Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b")?, None);
    assert_eq!(engine.get(b"c")?, Some(b"3".to_vec()));
    assert_eq!(engine.seq(), 2);
    Ok(())
}

#[test]
fn failed_flush_keeps_entries_in_memtable() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(dir.path())?;
    engine.put("a", "1")?;

    // a directory squats on the name the flush will rename its output to,
    // and cannot be removed as a partial table either
    let blocker = dir.path().join("sst-0000000001.sst");
    std::fs::create_dir(&blocker)?;
    assert!(engine.flush().is_err());
    assert!(blocker.is_dir());

    let stats = engine.stats();
    assert_eq!(stats.memtable_entries, 1);
    assert_eq!(stats.frozen_entries, 0);
    assert_eq!(stats.sstable_count, 0);
    assert_eq!(engine.get(b"a")?, Some(b"1".to_vec()));

    std::fs::remove_dir(&blocker)?;
    assert_eq!(engine.flush()?, 1);
    assert_eq!(engine.stats().sstable_count, 1);
    assert_eq!(engine.get(b"a")?, Some(b"1".to_vec()));
    Ok(())
}
