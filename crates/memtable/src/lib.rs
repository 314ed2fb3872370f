//! # Memtable
//!
//! The in-memory write buffer of the engine: an ordered map from key to the
//! newest [`ValueEntry`] written for it. Deletes are stored as tombstones so
//! they can shadow older values living in SSTables.
//!
//! Every mutation carries a sequence number and is ignored when an entry with
//! an equal or higher sequence is already present, which makes WAL replay and
//! re-applying a failed flush idempotent.

use std::collections::BTreeMap;
use std::ops::Bound;

/// ValueEntry stores the sequence number and the optional value.
/// `value == None` signifies a tombstone (delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: u64,
    pub value: Option<Vec<u8>>,
}

impl ValueEntry {
    pub fn put(seq: u64, value: Vec<u8>) -> Self {
        Self {
            seq,
            value: Some(value),
        }
    }

    pub fn tombstone(seq: u64) -> Self {
        Self { seq, value: None }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Bytes this entry contributes to [`Memtable::approx_size`] besides the key.
    fn value_size(&self) -> usize {
        self.value.as_ref().map_or(0, Vec::len)
    }
}

#[derive(Debug, Default)]
pub struct Memtable {
    map: BTreeMap<Vec<u8>, ValueEntry>,
    /// Sum of key + value lengths over all entries.
    approx_size: usize,
    tombstones: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a key with a seq number. Overwrites the existing entry if seq is newer.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, seq: u64) {
        self.apply(key, ValueEntry::put(seq, value));
    }

    /// Delete: add a tombstone with seq.
    pub fn delete(&mut self, key: Vec<u8>, seq: u64) {
        self.apply(key, ValueEntry::tombstone(seq));
    }

    /// Inserts `entry` unless the key already holds an entry with an equal or
    /// newer sequence. Returns whether the entry was stored.
    pub fn apply(&mut self, key: Vec<u8>, entry: ValueEntry) -> bool {
        match self.map.get(&key) {
            Some(old) if old.seq >= entry.seq => return false,
            Some(old) => {
                self.approx_size -= key.len() + old.value_size();
                if old.is_tombstone() {
                    self.tombstones -= 1;
                }
            }
            None => {}
        }

        self.approx_size += key.len() + entry.value_size();
        if entry.is_tombstone() {
            self.tombstones += 1;
        }
        self.map.insert(key, entry);
        true
    }

    /// Get the latest value if present and not a tombstone.
    pub fn get(&self, key: &[u8]) -> Option<(u64, Vec<u8>)> {
        self.map
            .get(key)
            .and_then(|e| e.value.as_ref().map(|v| (e.seq, v.clone())))
    }

    /// The raw entry for `key`, tombstones included.
    pub fn get_entry(&self, key: &[u8]) -> Option<&ValueEntry> {
        self.map.get(key)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Ordered iterator over all entries, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &ValueEntry)> {
        self.map.iter().map(|(k, e)| (k.as_slice(), e))
    }

    /// Ordered iterator over the entries whose keys fall within the bounds.
    /// An empty or inverted range yields nothing.
    pub fn range<'a>(
        &'a self,
        start: Bound<&'a [u8]>,
        end: Bound<&'a [u8]>,
    ) -> impl Iterator<Item = (&'a [u8], &'a ValueEntry)> + 'a {
        let non_empty = match (start, end) {
            (Bound::Included(s), Bound::Included(e)) => s <= e,
            (Bound::Included(s) | Bound::Excluded(s), Bound::Included(e) | Bound::Excluded(e)) => {
                s < e
            }
            _ => true,
        };

        non_empty
            .then(|| self.map.range::<[u8], _>((start, end)))
            .into_iter()
            .flatten()
            .map(|(k, e)| (k.as_slice(), e))
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Number of keys holding a live value.
    pub fn live_len(&self) -> usize {
        self.map.len() - self.tombstones
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.approx_size = 0;
        self.tombstones = 0;
    }
}

#[cfg(test)]
mod tests;
