//! Purpose: Encode and decode one pack entry header and verify its content checksum.
//! Exports: `Entry`, `EntryHeader`, `EntryKind`, `Checksum`, `HashingReader`, `HashingWriter`.
//! Role: The only place that knows the per-entry byte layout.
//! Invariants: Layout is `LENT | path_len u16 | path | kind u8 | codec u8 | mode u32 |
//!             stored_len u64 | raw_len u64 | sha256 [32]`, followed by `stored_len` content bytes.
//! Invariants: Directories carry no content; symlinks carry their target as stored bytes.
//! Invariants: Decoded paths have passed `path::sanitize`.
use std::fmt;
use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};

use crate::core::codec::CodecTag;
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{CHECKSUM_LEN, read_u16, read_u32, read_u64};
use crate::core::path::{MAX_PATH_LEN, RelativePath, sanitize};

pub const ENTRY_MAGIC: [u8; 4] = *b"LENT";
/// magic + path_len
pub const ENTRY_LEAD_LEN: usize = 6;
/// kind + codec + mode + stored_len + raw_len + checksum
pub const ENTRY_TAIL_LEN: usize = 1 + 1 + 4 + 8 + 8 + CHECKSUM_LEN;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    pub fn tag(self) -> u8 {
        match self {
            EntryKind::File => 0,
            EntryKind::Directory => 1,
            EntryKind::Symlink => 2,
        }
    }

    pub fn from_tag(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(EntryKind::File),
            1 => Ok(EntryKind::Directory),
            2 => Ok(EntryKind::Symlink),
            _ => Err(Error::new(ErrorKind::Format)
                .with_message(format!("unknown entry kind {value}"))),
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Hashes and counts every byte read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    count: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    pub fn finish(self) -> (Checksum, u64) {
        (Checksum(self.hasher.finalize().into()), self.count)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Hashes and counts every byte written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    count: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finish(self) -> (W, Checksum, u64) {
        (self.inner, Checksum(self.hasher.finalize().into()), self.count)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryHeader {
    pub path: RelativePath,
    pub kind: EntryKind,
    pub codec: CodecTag,
    pub mode: u32,
    pub stored_len: u64,
    pub raw_len: u64,
    pub checksum: Checksum,
}

impl EntryHeader {
    pub fn directory(path: RelativePath, mode: u32) -> Self {
        Self {
            path,
            kind: EntryKind::Directory,
            codec: CodecTag::Store,
            mode,
            stored_len: 0,
            raw_len: 0,
            checksum: Checksum::of(&[]),
        }
    }

    pub fn symlink(path: RelativePath, mode: u32, target: &[u8]) -> Self {
        Self {
            path,
            kind: EntryKind::Symlink,
            codec: CodecTag::Store,
            mode,
            stored_len: target.len() as u64,
            raw_len: target.len() as u64,
            checksum: Checksum::of(target),
        }
    }

    pub fn encoded_len(&self) -> usize {
        ENTRY_LEAD_LEN + self.path.as_str().len() + ENTRY_TAIL_LEN
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let path = self.path.as_str().as_bytes();
        if path.len() > MAX_PATH_LEN {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("path too long: {}", self.path)));
        }
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&ENTRY_MAGIC);
        buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
        buf.extend_from_slice(path);
        buf.push(self.kind.tag());
        buf.push(self.codec as u8);
        buf.extend_from_slice(&self.mode.to_le_bytes());
        buf.extend_from_slice(&self.stored_len.to_le_bytes());
        buf.extend_from_slice(&self.raw_len.to_le_bytes());
        buf.extend_from_slice(self.checksum.as_bytes());
        Ok(buf)
    }

    /// Read one header from `reader`; the stream must be positioned at an entry start.
    pub fn read_from(reader: &mut impl Read) -> Result<Self, Error> {
        let mut lead = [0u8; ENTRY_LEAD_LEN];
        read_header_bytes(reader, &mut lead)?;
        if lead[0..4] != ENTRY_MAGIC {
            return Err(Error::new(ErrorKind::Format).with_message("bad entry magic"));
        }
        let path_len = read_u16(&lead, 4) as usize;
        if path_len == 0 {
            return Err(Error::new(ErrorKind::Format).with_message("entry path is empty"));
        }
        let mut rest = vec![0u8; path_len + ENTRY_TAIL_LEN];
        read_header_bytes(reader, &mut rest)?;
        Self::decode_body(&rest, path_len)
    }

    fn decode_body(buf: &[u8], path_len: usize) -> Result<Self, Error> {
        let raw_path = std::str::from_utf8(&buf[..path_len])
            .map_err(|err| {
                Error::new(ErrorKind::Format)
                    .with_message("entry path is not UTF-8")
                    .with_source(err)
            })?;
        let path = sanitize(raw_path)?;

        let tail = &buf[path_len..];
        let kind = EntryKind::from_tag(tail[0])?;
        let codec = CodecTag::from_u8(tail[1])?;
        let mode = read_u32(tail, 2);
        let stored_len = read_u64(tail, 6);
        let raw_len = read_u64(tail, 14);
        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&tail[22..22 + CHECKSUM_LEN]);

        let header = Self {
            path,
            kind,
            codec,
            mode,
            stored_len,
            raw_len,
            checksum: Checksum(checksum),
        };
        header.validate_shape()?;
        Ok(header)
    }

    fn validate_shape(&self) -> Result<(), Error> {
        match self.kind {
            EntryKind::Directory => {
                if self.stored_len != 0 || self.raw_len != 0 {
                    return Err(Error::new(ErrorKind::Format)
                        .with_message(format!("directory entry {} carries content", self.path)));
                }
            }
            EntryKind::Symlink if self.codec != CodecTag::Store => {
                return Err(Error::new(ErrorKind::Format)
                    .with_message(format!("symlink entry {} is compressed", self.path)));
            }
            _ => {}
        }
        if self.codec == CodecTag::Store && self.stored_len != self.raw_len {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("stored entry {} has mismatched lengths", self.path)));
        }
        Ok(())
    }

    /// Check that the header plus its content fills exactly `entry_len` bytes of the stream.
    pub fn validate_framing(&self, entry_len: u64) -> Result<(), Error> {
        let expected = (self.encoded_len() as u64).checked_add(self.stored_len);
        if expected != Some(entry_len) {
            return Err(Error::new(ErrorKind::Format).with_message(format!(
                "entry {} declares {} content bytes but its slot holds {}",
                self.path,
                self.stored_len,
                entry_len.saturating_sub(self.encoded_len() as u64)
            )));
        }
        Ok(())
    }

    /// Compare decoded content against the stored checksum and raw length.
    pub fn verify(&self, checksum: &Checksum, raw_len: u64) -> Result<(), Error> {
        if raw_len != self.raw_len {
            return Err(Error::new(ErrorKind::Integrity).with_message(format!(
                "entry {} decoded to {raw_len} bytes, expected {}",
                self.path, self.raw_len
            )));
        }
        if *checksum != self.checksum {
            return Err(Error::new(ErrorKind::Integrity)
                .with_message(format!("checksum mismatch for {}", self.path)));
        }
        Ok(())
    }
}

fn read_header_bytes(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), Error> {
    reader.read_exact(buf).map_err(|err| {
        let kind = if err.kind() == io::ErrorKind::UnexpectedEof {
            ErrorKind::Format
        } else {
            ErrorKind::Io
        };
        Error::new(kind)
            .with_message("truncated entry header")
            .with_source(err)
    })
}

/// One entry as located by the index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub ordinal: u64,
    pub offset: u64,
    pub header: EntryHeader,
}

impl Entry {
    pub fn path(&self) -> &RelativePath {
        &self.header.path
    }

    pub fn kind(&self) -> EntryKind {
        self.header.kind
    }

    pub fn content_offset(&self) -> u64 {
        self.offset + self.header.encoded_len() as u64
    }
}
