//! Sequential scan over the data section of one SSTable.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

use crate::format::read_record;
use crate::{Entry, SstError};

/// Streams `(key, ValueEntry)` records in key order from its own file handle,
/// so a long scan never contends with point lookups on the reader.
///
/// The first error ends the iteration.
pub struct SSTableIterator {
    rdr: BufReader<File>,
    pos: u64,
    end: u64,
    /// Records with keys below this bound are skipped.
    lower: Option<Vec<u8>>,
}

impl SSTableIterator {
    pub(crate) fn open(
        path: &Path,
        start: u64,
        end: u64,
        lower: Option<Vec<u8>>,
    ) -> Result<Self, SstError> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start))?;
        Ok(Self {
            rdr: BufReader::new(file),
            pos: start,
            end,
            lower,
        })
    }

    fn read_next(&mut self) -> Result<Entry, SstError> {
        let record = read_record(&mut self.rdr, self.pos).map_err(SstError::from_section_read)?;
        self.pos += record.encoded_len;
        if self.pos > self.end {
            return Err(SstError::Corrupt(format!(
                "record ending at {} overruns the data section ({})",
                self.pos, self.end
            )));
        }
        Ok((record.key, record.entry))
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<Entry, SstError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.end {
            match self.read_next() {
                Ok((key, entry)) => {
                    if let Some(lower) = &self.lower {
                        if key < *lower {
                            continue;
                        }
                        self.lower = None;
                    }
                    return Some(Ok((key, entry)));
                }
                Err(e) => {
                    self.pos = self.end;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
