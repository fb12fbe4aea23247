//! Purpose: Open a pack, validate header/footer/index, and read entries lazily.
//! Exports: `PackReader`, `Entries`.
//! Role: Read-only view over any `Read + Seek` source (file or memory).
//! Invariants: Version is checked before anything else is interpreted.
//! Invariants: Footer bounds and index tiling are validated at open; entry headers on access.
//! Invariants: Content is never handed out as valid before its checksum has been compared.
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::codec;
use crate::core::entry::{Checksum, Entry, EntryHeader, EntryKind, HashingWriter};
use crate::core::error::{Error, ErrorKind, io_error};
use crate::core::format::{FOOTER_LEN, Footer, HEADER_PREFIX_LEN, HeaderPrefix};
use crate::core::index::Index;
use crate::core::manifest::PackManifest;
use crate::core::path::sanitize;

const COPY_BUF_LEN: usize = 64 * 1024;

pub struct PackReader<R: Read + Seek> {
    source: R,
    path: Option<PathBuf>,
    header: HeaderPrefix,
    manifest: PackManifest,
    index: Index,
    len: u64,
}

impl PackReader<BufReader<File>> {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| io_error(err, path))?;
        if file.metadata().map_err(|err| io_error(err, path))?.is_dir() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("pack path is a directory")
                .with_path(path));
        }
        let mut reader = Self::new(BufReader::new(file)).map_err(|err| err.with_path(path))?;
        reader.path = Some(path.to_path_buf());
        Ok(reader)
    }
}

impl PackReader<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> PackReader<R> {
    pub fn new(mut source: R) -> Result<Self, Error> {
        let len = source.seek(SeekFrom::End(0)).map_err(read_err)?;
        if len < (HEADER_PREFIX_LEN + FOOTER_LEN) as u64 {
            return Err(Error::new(ErrorKind::Format).with_message("file too small to be a pack"));
        }

        let mut prefix = [0u8; HEADER_PREFIX_LEN];
        read_at(&mut source, 0, &mut prefix)?;
        let header = HeaderPrefix::decode(&prefix)?;
        if header.data_start() + FOOTER_LEN as u64 > len {
            return Err(Error::new(ErrorKind::Format).with_message("manifest exceeds file size"));
        }

        let mut manifest = vec![0u8; header.manifest_len as usize];
        read_at(&mut source, HEADER_PREFIX_LEN as u64, &mut manifest)?;
        let manifest = PackManifest::from_bytes(&manifest)?;

        let mut footer = [0u8; FOOTER_LEN];
        read_at(&mut source, len - FOOTER_LEN as u64, &mut footer)?;
        let footer = Footer::decode(&footer)?;
        footer.validate(&header, len)?;

        let index_len = len - FOOTER_LEN as u64 - footer.index_offset;
        let mut index = vec![0u8; index_len as usize];
        read_at(&mut source, footer.index_offset, &mut index)?;
        let index = Index::decode(&index, &Checksum::from_bytes(footer.index_checksum))?;
        index.validate(header.data_start(), footer.index_offset)?;

        Ok(Self {
            source,
            path: None,
            header,
            manifest,
            index,
            len,
        })
    }

    pub fn manifest(&self) -> &PackManifest {
        &self.manifest
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    pub fn file_len(&self) -> u64 {
        self.len
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Decode the header of entry `ordinal` and check it fills its index slot.
    pub fn entry(&mut self, ordinal: usize) -> Result<Entry, Error> {
        let record = self.index.get(ordinal).ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("entry ordinal {ordinal} out of range"))
        })?;
        let annotate = |err: Error| err.with_entry(ordinal as u64).with_offset(record.offset);

        self.source
            .seek(SeekFrom::Start(record.offset))
            .map_err(read_err)
            .map_err(annotate)?;
        let header = EntryHeader::read_from(&mut self.source).map_err(annotate)?;
        header.validate_framing(record.len).map_err(annotate)?;
        Ok(Entry {
            ordinal: ordinal as u64,
            offset: record.offset,
            header,
        })
    }

    pub fn entries(&mut self) -> Entries<'_, R> {
        Entries {
            reader: self,
            next: 0,
        }
    }

    /// Decode the content of `entry` into `dst`, then verify length and checksum.
    ///
    /// On error `dst` may hold partial bytes; callers must discard them.
    pub fn copy_content(&mut self, entry: &Entry, dst: &mut impl Write) -> Result<u64, Error> {
        let header = &entry.header;
        let annotate = |err: Error| err.with_entry(entry.ordinal).with_offset(entry.offset);

        self.source
            .seek(SeekFrom::Start(entry.content_offset()))
            .map_err(read_err)
            .map_err(annotate)?;
        let stored = (&mut self.source).take(header.stored_len);
        let mut decoded = codec::decoder(header.codec, stored)
            .map_err(|err| corrupt_content(header, err))
            .map_err(annotate)?;

        let mut sink = HashingWriter::new(dst);
        let mut buf = vec![0u8; COPY_BUF_LEN];
        loop {
            let n = match decoded.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(annotate(corrupt_content(header, err))),
            };
            sink.write_all(&buf[..n]).map_err(|err| {
                annotate(
                    Error::new(ErrorKind::Io)
                        .with_message(format!("failed to write content of {}", header.path))
                        .with_source(err),
                )
            })?;
            if sink.count() > header.raw_len {
                return Err(annotate(Error::new(ErrorKind::Integrity).with_message(format!(
                    "entry {} decodes past its declared length",
                    header.path
                ))));
            }
        }
        let (_, checksum, raw_len) = sink.finish();
        header.verify(&checksum, raw_len).map_err(annotate)?;
        Ok(raw_len)
    }

    pub fn read_content(&mut self, entry: &Entry) -> Result<Vec<u8>, Error> {
        let capacity = entry.header.raw_len.min(COPY_BUF_LEN as u64 * 16) as usize;
        let mut out = Vec::with_capacity(capacity);
        self.copy_content(entry, &mut out)?;
        Ok(out)
    }

    /// Binary search the sorted index for `path`.
    pub fn lookup(&mut self, path: &str) -> Result<Option<Entry>, Error> {
        let wanted = sanitize(path)?;
        let (mut lo, mut hi) = (0usize, self.entry_count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry(mid)?;
            match entry.path().as_str().as_bytes().cmp(wanted.as_str().as_bytes()) {
                std::cmp::Ordering::Equal => return Ok(Some(entry)),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Ok(None)
    }

    /// Verified bytes of the regular file at `path`.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Error> {
        match self.lookup(path)? {
            Some(entry) if entry.kind() == EntryKind::File => self.read_content(&entry),
            _ => Err(Error::new(ErrorKind::NotFound)
                .with_message(format!("no regular file {path:?} in pack"))),
        }
    }

    /// Decode and checksum every entry without writing anything.
    pub fn verify(&mut self) -> Result<usize, Error> {
        for ordinal in 0..self.entry_count() {
            let entry = self.entry(ordinal)?;
            self.copy_content(&entry, &mut io::sink())?;
        }
        Ok(self.entry_count())
    }
}

/// Lazily decodes entry headers in stored order.
pub struct Entries<'a, R: Read + Seek> {
    reader: &'a mut PackReader<R>,
    next: usize,
}

impl<R: Read + Seek> Iterator for Entries<'_, R> {
    type Item = Result<Entry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.reader.entry_count() {
            return None;
        }
        let ordinal = self.next;
        self.next += 1;
        Some(self.reader.entry(ordinal))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.reader.entry_count().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

fn read_at(source: &mut (impl Read + Seek), offset: u64, buf: &mut [u8]) -> Result<(), Error> {
    source.seek(SeekFrom::Start(offset)).map_err(read_err)?;
    source.read_exact(buf).map_err(read_err)
}

fn read_err(err: io::Error) -> Error {
    let kind = if err.kind() == io::ErrorKind::UnexpectedEof {
        ErrorKind::Format
    } else {
        ErrorKind::Io
    };
    Error::new(kind)
        .with_message("failed to read pack stream")
        .with_source(err)
}

fn corrupt_content(header: &EntryHeader, err: io::Error) -> Error {
    Error::new(ErrorKind::Integrity)
        .with_message(format!("content of {} failed to decode", header.path))
        .with_source(err)
}
