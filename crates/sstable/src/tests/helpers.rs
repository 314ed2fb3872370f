use crate::*;
use anyhow::Result;
use memtable::Memtable;
use std::path::Path;

/// a=apple(1), b=banana(2), c=""(3), d=tombstone(4)
pub fn make_sample_memtable() -> Memtable {
    let mut m = Memtable::new();
    m.put(b"a".to_vec(), b"apple".to_vec(), 1);
    m.put(b"b".to_vec(), b"banana".to_vec(), 2);
    m.put(b"c".to_vec(), b"".to_vec(), 3); // present but empty
    m.delete(b"d".to_vec(), 4); // tombstone
    m
}

/// Memtable with `n` keys `key00000..`, value `val{i}`, seq `i + 1`.
pub fn make_numbered_memtable(n: usize) -> Memtable {
    let mut m = Memtable::new();
    for i in 0..n {
        m.put(
            format!("key{:05}", i).into_bytes(),
            format!("val{}", i).into_bytes(),
            i as u64 + 1,
        );
    }
    m
}

pub fn small_blocks() -> WriterOptions {
    WriterOptions {
        index_interval: 4,
        ..WriterOptions::default()
    }
}

/// Write a table of `(key, value-or-tombstone, seq)` triples and open it.
pub fn write_and_open(
    dir: &Path,
    name: &str,
    entries: &[(&str, Option<&str>, u64)],
) -> Result<SSTableReader> {
    let path = dir.join(name);
    let mut mem = Memtable::new();
    for &(key, val, seq) in entries {
        match val {
            Some(v) => mem.put(key.as_bytes().to_vec(), v.as_bytes().to_vec(), seq),
            None => mem.delete(key.as_bytes().to_vec(), seq),
        }
    }
    SSTableWriter::write_from_memtable(&path, &mem, WriterOptions::default())?;
    Ok(SSTableReader::open(&path)?)
}

pub fn write_mem(path: &Path, mem: &Memtable, opts: WriterOptions) -> Result<SSTableReader> {
    SSTableWriter::write_from_memtable(path, mem, opts)?;
    Ok(SSTableReader::open(path)?)
}
