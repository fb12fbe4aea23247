// Trailing index: one (offset, length) record per entry, checksummed by the footer.
use crate::core::entry::Checksum;
use crate::core::error::{Error, ErrorKind};
use crate::core::format::read_u64;

pub const INDEX_RECORD_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexRecord {
    pub offset: u64,
    pub len: u64,
}

impl IndexRecord {
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.len)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Index {
    records: Vec<IndexRecord>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IndexRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, ordinal: usize) -> Option<IndexRecord> {
        self.records.get(ordinal).copied()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.records.len() * INDEX_RECORD_LEN);
        for record in &self.records {
            buf.extend_from_slice(&record.offset.to_le_bytes());
            buf.extend_from_slice(&record.len.to_le_bytes());
        }
        buf
    }

    /// Decode `buf` after checking it against the footer's checksum.
    pub fn decode(buf: &[u8], expected: &Checksum) -> Result<Self, Error> {
        if Checksum::of(buf) != *expected {
            return Err(Error::new(ErrorKind::Integrity).with_message("index checksum mismatch"));
        }
        if buf.len() % INDEX_RECORD_LEN != 0 {
            return Err(Error::new(ErrorKind::Format).with_message("index length is not a record multiple"));
        }
        let records = buf
            .chunks_exact(INDEX_RECORD_LEN)
            .map(|chunk| IndexRecord {
                offset: read_u64(chunk, 0),
                len: read_u64(chunk, 8),
            })
            .collect();
        Ok(Self { records })
    }

    /// Entries must tile `[data_start, index_offset)` exactly, in order.
    pub fn validate(&self, data_start: u64, index_offset: u64) -> Result<(), Error> {
        let mut expected = data_start;
        for (ordinal, record) in self.records.iter().enumerate() {
            if record.offset != expected {
                return Err(Error::new(ErrorKind::Format)
                    .with_message("index entry is not contiguous")
                    .with_entry(ordinal as u64)
                    .with_offset(record.offset));
            }
            expected = record
                .end()
                .filter(|end| *end <= index_offset)
                .ok_or_else(|| {
                    Error::new(ErrorKind::Format)
                        .with_message("index entry exceeds data region")
                        .with_entry(ordinal as u64)
                        .with_offset(record.offset)
                })?;
        }
        if expected != index_offset {
            return Err(Error::new(ErrorKind::Format)
                .with_message("data region has trailing bytes before the index")
                .with_offset(expected));
        }
        Ok(())
    }
}
