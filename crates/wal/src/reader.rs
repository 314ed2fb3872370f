use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use crate::{WalError, WalRecord, FRAME_HEADER_SIZE, MAX_RECORD_SIZE, OP_DEL, OP_PUT};

/// Outcome of a [`WalReader::replay`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records handed to the callback.
    pub records: usize,
    /// Length of the valid prefix of the stream. Everything past it belongs
    /// to a torn record.
    pub valid_len: u64,
    /// Whether the stream ended inside a record.
    pub torn: bool,
    /// Highest sequence number seen, 0 if none.
    pub max_seq: u64,
}

/// Sequential WAL reader that yields valid records.
///
/// The reader is generic over any `Read` implementor, allowing it to be used
/// with real files (`WalReader<File>`) or in-memory buffers for testing.
///
/// During replay, each record's CRC32 is verified. A torn tail (from a crash
/// mid-write, or a file extended with zeros before its data landed) is
/// treated as EOF: all fully-written records before it are still returned and
/// the summary reports where the valid prefix ends.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    /// Opens an existing WAL file for sequential replay.
    ///
    /// Returns `WalError::Io` if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every valid record in the WAL, calling `apply` for each one.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** -> `Ok` with `torn == false`.
    /// - **Torn tail** -> `Ok` with `torn == true` after yielding all complete
    ///   records before it. A tail is torn when a frame runs past the end of
    ///   the stream, or when a frame fails validation (bad length, CRC
    ///   mismatch, malformed body) and no valid frame can be found after it.
    ///   Zero-filled and half-persisted tails both end up here.
    /// - **Invalid frame followed by a valid one** -> `Err(WalError::Corrupt)`.
    /// - **I/O error** -> `Err(WalError::Io(...))`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<ReplaySummary, WalError>
    where
        F: FnMut(WalRecord),
    {
        let mut summary = ReplaySummary::default();
        let mut header = [0u8; FRAME_HEADER_SIZE as usize];
        // Reusable buffer to avoid allocation per record
        let mut body = Vec::with_capacity(256);

        loop {
            if self.rdr.fill_buf()?.is_empty() {
                return Ok(summary);
            }
            let offset = summary.valid_len;

            match self.rdr.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    summary.torn = true;
                    return Ok(summary);
                }
                Err(e) => return Err(WalError::Io(e)),
            }

            // record_len includes CRC (4 bytes) but not itself
            let record_len = LittleEndian::read_u32(&header[0..4]);
            let crc = LittleEndian::read_u32(&header[4..8]);
            if record_len <= 4 || record_len > MAX_RECORD_SIZE {
                return self.invalid_frame(summary, offset, header.to_vec());
            }

            let body_len = (record_len - 4) as usize;
            body.clear();
            body.resize(body_len, 0);
            match self.rdr.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    summary.torn = true;
                    return Ok(summary);
                }
                Err(e) => return Err(WalError::Io(e)),
            }

            let mut hasher = Crc32::new();
            hasher.update(&body);
            let record = if hasher.finalize() == crc {
                decode_body(&body)
            } else {
                None
            };
            let Some(record) = record else {
                let mut frame = header.to_vec();
                frame.extend_from_slice(&body);
                return self.invalid_frame(summary, offset, frame);
            };

            summary.records += 1;
            summary.max_seq = summary.max_seq.max(record.seq());
            summary.valid_len += FRAME_HEADER_SIZE + body_len as u64;
            apply(record);
        }
    }

    /// Classifies a frame at `offset` that failed validation. `consumed`
    /// holds the bytes already read from it. The rest of the stream is
    /// searched for a valid frame: finding one means the log is corrupt in
    /// the middle, otherwise everything from `offset` on is a torn tail.
    fn invalid_frame(
        &mut self,
        mut summary: ReplaySummary,
        offset: u64,
        mut consumed: Vec<u8>,
    ) -> Result<ReplaySummary, WalError> {
        self.rdr.read_to_end(&mut consumed)?;
        if contains_valid_frame(&consumed[1..]) {
            return Err(WalError::Corrupt { offset });
        }
        summary.torn = true;
        Ok(summary)
    }
}

/// Whether a complete, CRC-valid, decodable frame starts anywhere in `data`.
fn contains_valid_frame(data: &[u8]) -> bool {
    (0..data.len()).any(|start| frame_at(&data[start..]).is_some())
}

fn frame_at(data: &[u8]) -> Option<WalRecord> {
    let header_len = FRAME_HEADER_SIZE as usize;
    let header = data.get(..header_len)?;
    let record_len = LittleEndian::read_u32(&header[0..4]);
    if record_len <= 4 || record_len > MAX_RECORD_SIZE {
        return None;
    }
    let body = data.get(header_len..header_len + (record_len - 4) as usize)?;

    let mut hasher = Crc32::new();
    hasher.update(body);
    if hasher.finalize() != LittleEndian::read_u32(&header[4..8]) {
        return None;
    }
    decode_body(body)
}

/// Parses a CRC-verified body. `None` means the body is malformed.
fn decode_body(body: &[u8]) -> Option<WalRecord> {
    let mut br = body;
    let seq = br.read_u64::<LittleEndian>().ok()?;
    let op = br.read_u8().ok()?;
    let key = read_bytes(&mut br)?;

    match op {
        OP_PUT => {
            let value = read_bytes(&mut br)?;
            Some(WalRecord::Put { seq, key, value })
        }
        OP_DEL => Some(WalRecord::Del { seq, key }),
        _ => None,
    }
}

fn read_bytes(br: &mut &[u8]) -> Option<Vec<u8>> {
    let len = br.read_u32::<LittleEndian>().ok()? as usize;
    if len > br.len() {
        return None;
    }
    let (head, tail) = br.split_at(len);
    *br = tail;
    Some(head.to_vec())
}
