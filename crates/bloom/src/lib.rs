//! # Bloom Filter
//!
//! A space-efficient probabilistic data structure for set membership testing.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives). The false positive rate depends on the
//! number of bits and hash functions used.
//!
//! ## Usage in Strata
//!
//! Each SSTable embeds a bloom filter built from its keys. During point lookups
//! the engine checks the bloom filter first -- if it says "not present", the
//! SSTable is skipped entirely, avoiding the index lookup and any disk I/O.
//!
//! ## Hashing
//!
//! Only two base hashes are computed per key (Kirsch–Mitzenmacher):
//!
//! ```text
//! h1 = fnv1a_64(key)
//! h2 = fnv1a_64(key || le_u32(h1))      // re-hash salted with h1
//! bit_i = (h1 + i * h2) mod m           for i in 0..k
//! ```
//!
//! ## Example
//!
//! ```rust
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//! ```
use std::io::{self, Read, Write};

/// Safety cap: a serialized bloom filter should never exceed 128 MiB.
const MAX_BLOOM_BYTES: usize = 128 * 1024 * 1024;

/// A bloom filter backed by a packed bit vector with `k` derived hash functions.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// The bit vector, 8 bits per byte, LSB first.
    bits: Vec<u8>,
    /// Number of bits in the filter (m).
    num_bits: u64,
    /// Number of hash functions (k).
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a new bloom filter sized for `expected_items` with the given
    /// target `false_positive_rate`.
    ///
    /// Uses `m = ceil(-n * ln(p) / ln(2)^2)` and `k = ceil((m / n) * ln(2))`.
    /// An `expected_items` of 0 yields the degenerate filter `m = 1, k = 1`.
    ///
    /// # Panics
    ///
    /// Panics if `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let (num_bits, num_hashes) = optimal_params(expected_items, false_positive_rate);
        let byte_len = byte_len_for(num_bits);

        Self {
            bits: vec![0u8; byte_len],
            num_bits,
            num_hashes,
        }
    }

    /// Rebuilds a filter from its packed bit array and out-of-band parameters.
    ///
    /// The packed bytes alone do not recover `m` and `k`, so both must be
    /// supplied. Missing trailing bytes are treated as zero and surplus bytes
    /// are ignored.
    pub fn from_bytes(data: &[u8], num_bits: u64, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(1);
        let mut bits = vec![0u8; byte_len_for(num_bits)];
        let n = bits.len().min(data.len());
        bits[..n].copy_from_slice(&data[..n]);

        // Bits beyond `num_bits` in the last byte are never addressed, but
        // clear them so equality and re-serialization are canonical.
        let tail = (num_bits % 8) as u32;
        if tail != 0 {
            if let Some(last) = bits.last_mut() {
                *last &= (1u8 << tail) - 1;
            }
        }

        Self {
            bits,
            num_bits,
            num_hashes: num_hashes.max(1),
        }
    }

    /// Returns the packed bit array (8 bits per byte).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.clone()
    }

    /// Inserts a key into the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit_idx = self.bit_index(h1, h2, i);
            self.set_bit(bit_idx);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| self.get_bit(self.bit_index(h1, h2, i)))
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Returns the size of the serialized bloom filter in bytes.
    ///
    /// Layout: `num_bits(u64) + num_hashes(u32) + bits_len(u32) + bits`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        8 + 4 + 4 + self.bits.len()
    }

    /// Serializes the bloom filter, parameters included, to a writer.
    ///
    /// Wire format (all little-endian):
    /// ```text
    /// [num_bits: u64][num_hashes: u32][bits_len: u32][bits: bytes]
    /// ```
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.num_bits.to_le_bytes())?;
        w.write_all(&self.num_hashes.to_le_bytes())?;
        w.write_all(&(self.bits.len() as u32).to_le_bytes())?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Deserializes a bloom filter written by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf8 = [0u8; 8];
        let mut buf4 = [0u8; 4];

        r.read_exact(&mut buf8)?;
        let num_bits = u64::from_le_bytes(buf8);

        r.read_exact(&mut buf4)?;
        let num_hashes = u32::from_le_bytes(buf4);

        r.read_exact(&mut buf4)?;
        let bits_len = u32::from_le_bytes(buf4) as usize;

        if bits_len > MAX_BLOOM_BYTES {
            return Err(invalid_data(format!("bloom filter too large: {} bytes", bits_len)));
        }
        if num_bits == 0 || num_hashes == 0 {
            return Err(invalid_data("bloom filter with zero bits or hashes".to_string()));
        }
        if byte_len_for(num_bits) != bits_len {
            return Err(invalid_data(format!(
                "bloom filter length mismatch: {} bits need {} bytes, found {}",
                num_bits,
                byte_len_for(num_bits),
                bits_len
            )));
        }

        let mut bits = vec![0u8; bits_len];
        r.read_exact(&mut bits)?;

        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    /// Double hashing: h(i) = (h1 + i * h2) mod num_bits.
    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    fn set_bit(&mut self, idx: u64) {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        self.bits[byte_idx] |= 1 << bit_offset;
    }

    fn get_bit(&self, idx: u64) -> bool {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        (self.bits[byte_idx] >> bit_offset) & 1 == 1
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

/// Computes `(m, k)` for `n` expected items at false-positive rate `p`.
fn optimal_params(n: usize, p: f64) -> (u64, u32) {
    if n == 0 {
        return (1, 1);
    }
    let n = n as f64;
    let ln2 = std::f64::consts::LN_2;

    let m = (-n * p.ln() / (ln2 * ln2)).ceil().max(1.0) as u64;
    let k = ((m as f64 / n) * ln2).ceil().max(1.0) as u32;
    (m, k)
}

fn byte_len_for(num_bits: u64) -> usize {
    num_bits.div_ceil(8) as usize
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// The two base hashes. `h2` re-hashes the key salted with the low 32 bits
/// of `h1`.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    let h1 = fnv1a_64(FNV_OFFSET_BASIS, key);
    let salt = (h1 as u32).to_le_bytes();
    let h2 = fnv1a_64(h1, &salt);
    (h1, h2)
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit, continuing from `state`.
fn fnv1a_64(state: u64, data: &[u8]) -> u64 {
    let mut hash = state;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
