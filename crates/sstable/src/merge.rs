//! k-way merge over sorted entry streams.
//!
//! Produces `(key, ValueEntry)` pairs in ascending key order. When the same
//! key appears in several sources only the entry with the **highest sequence
//! number** is emitted (newest wins).
//!
//! This is the core primitive for compaction (walk N input SSTables in sorted
//! order, deduplicate by seq, write one new SSTable) and for range scans.

use memtable::ValueEntry;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{Entry, SstError};

/// The current head of one source.
struct HeapEntry {
    key: Vec<u8>,
    entry: ValueEntry,
    /// Index into `sources`.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the *smallest* key first, so
        // reverse the key comparison. On a tie, the lower source index first.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sorted sources into one sorted, deduplicated stream.
///
/// Each source must yield strictly ascending keys. Equal keys across sources
/// resolve to the highest `seq`; if sequences tie, the source listed first
/// wins. Tombstones are passed through; dropping them is the caller's call.
///
/// The first source error is returned and ends the merge.
pub struct MergeIterator<I> {
    sources: Vec<I>,
    heap: BinaryHeap<HeapEntry>,
    failed: Option<SstError>,
    done: bool,
}

impl<I> MergeIterator<I>
where
    I: Iterator<Item = Result<Entry, SstError>>,
{
    pub fn new(sources: Vec<I>) -> Self {
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
            failed: None,
            done: false,
        };
        for i in 0..merge.sources.len() {
            merge.advance(i);
        }
        merge
    }

    /// Pulls the next entry of `source` onto the heap.
    fn advance(&mut self, source: usize) {
        match self.sources[source].next() {
            Some(Ok((key, entry))) => self.heap.push(HeapEntry { key, entry, source }),
            Some(Err(e)) => {
                if self.failed.is_none() {
                    self.failed = Some(e);
                }
            }
            None => {}
        }
    }
}

impl<I> Iterator for MergeIterator<I>
where
    I: Iterator<Item = Result<Entry, SstError>>,
{
    type Item = Result<Entry, SstError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(e) = self.failed.take() {
            self.done = true;
            return Some(Err(e));
        }

        let top = match self.heap.pop() {
            Some(top) => top,
            None => {
                self.done = true;
                return None;
            }
        };
        self.advance(top.source);

        let mut best = top;
        while let Some(peek) = self.heap.peek() {
            if peek.key != best.key {
                break;
            }
            let dup = match self.heap.pop() {
                Some(dup) => dup,
                None => break,
            };
            self.advance(dup.source);
            if dup.entry.seq > best.entry.seq {
                best = dup;
            }
        }

        if let Some(e) = self.failed.take() {
            self.done = true;
            return Some(Err(e));
        }
        Some(Ok((best.key, best.entry)))
    }
}
