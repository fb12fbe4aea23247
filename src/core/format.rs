//! Purpose: Centralize the pack file layout: header prefix, footer, and version gating.
//! Exports: `FORMAT_VERSION`, `SUPPORTED_FORMAT_VERSIONS`, `HeaderPrefix`, `Footer`, `version_error`.
//! Role: Shared policy for on-disk compatibility across writer and reader.
//! Invariants: The version is checked before any entry is interpreted; unknown versions fail closed.
//! Invariants: Version 1 binds SHA-256 as the checksum; changing it requires a new version.
//! Invariants: All integers are little-endian and unsigned.

use crate::core::error::{Error, ErrorKind};

pub const MAGIC: [u8; 8] = *b"LPACK\0\0\0";
pub const FOOTER_MAGIC: [u8; 8] = *b"LPACKEND";
pub const FORMAT_VERSION: u32 = 1;
pub const SUPPORTED_FORMAT_VERSIONS: &[u32] = &[FORMAT_VERSION];

/// magic + version + flags + manifest_len
pub const HEADER_PREFIX_LEN: usize = 20;
pub const FOOTER_LEN: usize = 64;
pub const MAX_MANIFEST_LEN: u32 = 1024 * 1024;
pub const CHECKSUM_LEN: usize = 32;

pub fn version_error(detected: u32) -> Error {
    let supported = SUPPORTED_FORMAT_VERSIONS
        .iter()
        .map(|version| version.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Error::new(ErrorKind::Format)
        .with_message(format!(
            "unsupported pack format version {detected} (supported: {supported})"
        ))
        .with_hint("Rebuild the pack with this version of lpack.")
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderPrefix {
    pub version: u32,
    pub flags: u32,
    pub manifest_len: u32,
}

impl HeaderPrefix {
    pub fn new(manifest_len: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            flags: 0,
            manifest_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_PREFIX_LEN] {
        let mut buf = [0u8; HEADER_PREFIX_LEN];
        buf[0..8].copy_from_slice(&MAGIC);
        write_u32(&mut buf, 8, self.version);
        write_u32(&mut buf, 12, self.flags);
        write_u32(&mut buf, 16, self.manifest_len);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_PREFIX_LEN {
            return Err(Error::new(ErrorKind::Format).with_message("pack header too small"));
        }
        if buf[0..8] != MAGIC {
            return Err(Error::new(ErrorKind::Format).with_message("not a layer pack (bad magic)"));
        }
        let version = read_u32(buf, 8);
        if !SUPPORTED_FORMAT_VERSIONS.contains(&version) {
            return Err(version_error(version));
        }
        let flags = read_u32(buf, 12);
        if flags != 0 {
            return Err(Error::new(ErrorKind::Format).with_message("unknown header flags"));
        }
        let manifest_len = read_u32(buf, 16);
        if manifest_len > MAX_MANIFEST_LEN {
            return Err(Error::new(ErrorKind::Format).with_message("manifest length exceeds max"));
        }
        Ok(Self {
            version,
            flags,
            manifest_len,
        })
    }

    /// Offset of the first entry.
    pub fn data_start(&self) -> u64 {
        HEADER_PREFIX_LEN as u64 + u64::from(self.manifest_len)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Footer {
    pub version: u32,
    pub entry_count: u64,
    pub index_offset: u64,
    pub index_checksum: [u8; CHECKSUM_LEN],
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut buf = [0u8; FOOTER_LEN];
        buf[0..8].copy_from_slice(&FOOTER_MAGIC);
        write_u32(&mut buf, 8, self.version);
        write_u32(&mut buf, 12, 0);
        write_u64(&mut buf, 16, self.entry_count);
        write_u64(&mut buf, 24, self.index_offset);
        buf[32..64].copy_from_slice(&self.index_checksum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < FOOTER_LEN {
            return Err(Error::new(ErrorKind::Format).with_message("footer too small"));
        }
        if buf[0..8] != FOOTER_MAGIC {
            return Err(Error::new(ErrorKind::Format).with_message("bad footer magic"));
        }
        let version = read_u32(buf, 8);
        if !SUPPORTED_FORMAT_VERSIONS.contains(&version) {
            return Err(version_error(version));
        }
        if read_u32(buf, 12) != 0 {
            return Err(Error::new(ErrorKind::Format).with_message("footer reserved field is set"));
        }
        let mut index_checksum = [0u8; CHECKSUM_LEN];
        index_checksum.copy_from_slice(&buf[32..64]);
        Ok(Self {
            version,
            entry_count: read_u64(buf, 16),
            index_offset: read_u64(buf, 24),
            index_checksum,
        })
    }

    /// Check the footer's index bounds against the header and the real file length.
    pub fn validate(&self, header: &HeaderPrefix, file_len: u64) -> Result<(), Error> {
        if self.version != header.version {
            return Err(Error::new(ErrorKind::Format).with_message("header/footer version mismatch"));
        }
        let index_len = self
            .entry_count
            .checked_mul(crate::core::index::INDEX_RECORD_LEN as u64)
            .ok_or_else(|| Error::new(ErrorKind::Format).with_message("entry count overflow"))?;
        let end = self
            .index_offset
            .checked_add(index_len)
            .and_then(|end| end.checked_add(FOOTER_LEN as u64))
            .ok_or_else(|| Error::new(ErrorKind::Format).with_message("index bounds overflow"))?;
        if self.index_offset < header.data_start() || end != file_len {
            return Err(Error::new(ErrorKind::Format)
                .with_message("index bounds do not match file size")
                .with_offset(self.index_offset));
        }
        Ok(())
    }
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    let mut out = [0u8; 2];
    out.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_le_bytes(out)
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(out)
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::{
        version_error, Footer, HeaderPrefix, FOOTER_LEN, FORMAT_VERSION, HEADER_PREFIX_LEN,
    };
    use crate::core::error::ErrorKind;

    #[test]
    fn header_round_trip() {
        let header = HeaderPrefix::new(42);
        let decoded = HeaderPrefix::decode(&header.encode()).expect("decode");
        assert_eq!(header, decoded);
        assert_eq!(decoded.data_start(), HEADER_PREFIX_LEN as u64 + 42);
    }

    #[test]
    fn unknown_version_fails_closed() {
        let mut buf = HeaderPrefix::new(0).encode();
        buf[8..12].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        let err = HeaderPrefix::decode(&buf).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.message().unwrap().contains("unsupported pack format version 2"));
    }

    #[test]
    fn version_error_lists_supported_versions() {
        let err = version_error(9);
        assert!(err.message().unwrap().contains("supported: 1"));
        assert!(err.hint().is_some());
    }

    #[test]
    fn footer_round_trip_and_bounds() {
        let header = HeaderPrefix::new(2);
        let footer = Footer {
            version: FORMAT_VERSION,
            entry_count: 1,
            index_offset: 100,
            index_checksum: [7u8; 32],
        };
        let decoded = Footer::decode(&footer.encode()).expect("decode");
        assert_eq!(footer, decoded);

        let file_len = 100 + 16 + FOOTER_LEN as u64;
        decoded.validate(&header, file_len).expect("bounds ok");

        let err = decoded.validate(&header, file_len + 1).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn footer_rejects_index_inside_header() {
        let header = HeaderPrefix::new(200);
        let footer = Footer {
            version: FORMAT_VERSION,
            entry_count: 0,
            index_offset: 10,
            index_checksum: [0u8; 32],
        };
        let err = footer.validate(&header, 10 + FOOTER_LEN as u64).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn footer_rejects_overflowing_entry_count() {
        let header = HeaderPrefix::new(0);
        let footer = Footer {
            version: FORMAT_VERSION,
            entry_count: u64::MAX,
            index_offset: 20,
            index_checksum: [0u8; 32],
        };
        let err = footer.validate(&header, 1024).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn bad_magic_is_format_error() {
        let mut buf = Footer {
            version: FORMAT_VERSION,
            entry_count: 0,
            index_offset: 0,
            index_checksum: [0u8; 32],
        }
        .encode();
        buf[0] = b'X';
        assert_eq!(Footer::decode(&buf).unwrap_err().kind(), ErrorKind::Format);
    }
}
