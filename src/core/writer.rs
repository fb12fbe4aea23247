//! Purpose: Append entries to a pack stream and close it with the index and footer.
//! Exports: `PackWriter`.
//! Role: Single forward pass; each entry header is patched in place once its content is known.
//! Invariants: Entries are added in strictly increasing path byte order (no duplicates).
//! Invariants: The index is written only after every entry, then the fixed-size footer last.
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::core::codec::{self, CodecTag, Compression};
use crate::core::entry::{Checksum, EntryHeader, EntryKind, HashingReader};
use crate::core::error::{Error, ErrorKind};
use crate::core::format::{FORMAT_VERSION, Footer, HeaderPrefix};
use crate::core::index::{Index, IndexRecord};
use crate::core::manifest::PackManifest;
use crate::core::path::{RelativePath, sanitize};

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn write_err(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write pack stream")
        .with_source(err)
}

fn content_err(path: &RelativePath, err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(format!("failed to stream content of {path}"))
        .with_source(err)
}

pub struct PackWriter<W: Write + Seek> {
    out: W,
    index: Index,
    position: u64,
    last_path: Option<RelativePath>,
}

impl<W: Write + Seek> PackWriter<W> {
    /// Start a pack at the beginning of `out`.
    pub fn new(mut out: W, manifest: &PackManifest) -> Result<Self, Error> {
        let manifest = manifest.to_bytes()?;
        let prefix = HeaderPrefix::new(manifest.len() as u32);
        out.seek(SeekFrom::Start(0)).map_err(write_err)?;
        out.write_all(&prefix.encode()).map_err(write_err)?;
        out.write_all(&manifest).map_err(write_err)?;
        Ok(Self {
            out,
            index: Index::new(),
            position: prefix.data_start(),
            last_path: None,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    pub fn add_directory(&mut self, path: RelativePath, mode: u32) -> Result<(), Error> {
        let header = EntryHeader::directory(path, mode);
        self.admit(&header.path)?;
        let offset = self.position;
        self.write_header(&header)?;
        self.commit(header, offset)
    }

    pub fn add_symlink(&mut self, path: RelativePath, mode: u32, target: &[u8]) -> Result<(), Error> {
        let header = EntryHeader::symlink(path, mode, target);
        self.admit(&header.path)?;
        let offset = self.position;
        self.write_header(&header)?;
        self.out.write_all(target).map_err(write_err)?;
        self.commit(header, offset)
    }

    /// Write `content` with `compression` (zstd falls back to store when it does not shrink),
    /// then patch the header with lengths and checksum.
    pub fn add_file(
        &mut self,
        path: RelativePath,
        mode: u32,
        content: &mut impl Read,
        compression: Compression,
    ) -> Result<(), Error> {
        self.admit(&path)?;
        let offset = self.position;
        let mut header = EntryHeader {
            path,
            kind: EntryKind::File,
            codec: compression.tag(),
            mode,
            stored_len: 0,
            raw_len: 0,
            checksum: Checksum::from_bytes([0u8; 32]),
        };
        self.write_header(&header)?;

        let mut source = HashingReader::new(content);
        let (codec_tag, stored_len) = match compression {
            Compression::Store => {
                let mut sink = CountingWriter {
                    inner: &mut self.out,
                    count: 0,
                };
                codec::encode(compression, &mut source, &mut sink)
                    .map_err(|err| content_err(&header.path, err))?;
                (CodecTag::Store, sink.count)
            }
            Compression::Zstd { .. } => {
                let mut raw = Vec::new();
                source
                    .read_to_end(&mut raw)
                    .map_err(|err| content_err(&header.path, err))?;
                let (tag, stored) = codec::compress_or_store(compression, raw)
                    .map_err(|err| content_err(&header.path, err))?;
                self.out.write_all(&stored).map_err(write_err)?;
                (tag, stored.len() as u64)
            }
        };
        let (checksum, raw_len) = source.finish();

        header.codec = codec_tag;
        header.stored_len = stored_len;
        header.raw_len = raw_len;
        header.checksum = checksum;

        let end = offset + header.encoded_len() as u64 + stored_len;
        self.out.seek(SeekFrom::Start(offset)).map_err(write_err)?;
        self.out
            .write_all(&header.encode()?)
            .map_err(write_err)?;
        self.out.seek(SeekFrom::Start(end)).map_err(write_err)?;
        self.commit(header, offset)
    }

    /// Write the index and footer; returns the underlying stream.
    pub fn finish(mut self) -> Result<W, Error> {
        let index_offset = self.position;
        let index_bytes = self.index.encode();
        self.out.write_all(&index_bytes).map_err(write_err)?;
        let footer = Footer {
            version: FORMAT_VERSION,
            entry_count: self.index.len() as u64,
            index_offset,
            index_checksum: *Checksum::of(&index_bytes).as_bytes(),
        };
        self.out.write_all(&footer.encode()).map_err(write_err)?;
        self.out.flush().map_err(write_err)?;
        Ok(self.out)
    }

    fn admit(&self, path: &RelativePath) -> Result<(), Error> {
        let revalidated = sanitize(path.as_str())?;
        if let Some(last) = &self.last_path {
            if revalidated.as_str().as_bytes() <= last.as_str().as_bytes() {
                return Err(Error::new(ErrorKind::InvalidArgument).with_message(format!(
                    "entry {path} is out of order (after {last})"
                )));
            }
        }
        Ok(())
    }

    fn write_header(&mut self, header: &EntryHeader) -> Result<(), Error> {
        self.out.write_all(&header.encode()?).map_err(write_err)
    }

    fn commit(&mut self, header: EntryHeader, offset: u64) -> Result<(), Error> {
        let len = header.encoded_len() as u64 + header.stored_len;
        self.index.push(IndexRecord { offset, len });
        self.position = offset + len;
        self.last_path = Some(header.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::PackWriter;
    use crate::core::codec::{CodecTag, Compression};
    use crate::core::error::ErrorKind;
    use crate::core::format::{FOOTER_LEN, Footer, HeaderPrefix};
    use crate::core::manifest::PackManifest;
    use crate::core::path::sanitize;
    use crate::core::reader::PackReader;
    use std::io::Cursor;

    #[test]
    fn empty_pack_is_header_and_footer() {
        let writer = PackWriter::new(Cursor::new(Vec::new()), &PackManifest::default())
            .expect("writer");
        let bytes = writer.finish().expect("finish").into_inner();

        let header = HeaderPrefix::decode(&bytes).expect("header");
        let footer = Footer::decode(&bytes[bytes.len() - FOOTER_LEN..]).expect("footer");
        assert_eq!(footer.entry_count, 0);
        assert_eq!(footer.index_offset, header.data_start());
        footer.validate(&header, bytes.len() as u64).expect("bounds");
    }

    #[test]
    fn out_of_order_entries_are_rejected() {
        let mut writer = PackWriter::new(Cursor::new(Vec::new()), &PackManifest::default())
            .expect("writer");
        writer.add_directory(sanitize("b").unwrap(), 0o755).expect("b");
        let err = writer
            .add_directory(sanitize("a").unwrap(), 0o755)
            .expect_err("out of order");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = writer
            .add_directory(sanitize("b").unwrap(), 0o755)
            .expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn identical_input_gives_identical_bytes() {
        let build = || {
            let mut writer = PackWriter::new(Cursor::new(Vec::new()), &PackManifest::named("base"))
                .expect("writer");
            writer.add_directory(sanitize("cfg").unwrap(), 0o755).unwrap();
            writer
                .add_file(
                    sanitize("cfg/app.json").unwrap(),
                    0o644,
                    &mut &b"{\"ok\":true}"[..],
                    Compression::Zstd { level: 3 },
                )
                .unwrap();
            writer
                .add_symlink(sanitize("current").unwrap(), 0o777, b"cfg/app.json")
                .unwrap();
            writer.finish().unwrap().into_inner()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn zstd_entries_that_do_not_shrink_are_stored() {
        let mut writer = PackWriter::new(Cursor::new(Vec::new()), &PackManifest::default())
            .expect("writer");
        let zstd = Compression::Zstd { level: 3 };
        writer
            .add_file(sanitize("big.txt").unwrap(), 0o644, &mut "layer ".repeat(512).as_bytes(), zstd)
            .unwrap();
        writer
            .add_file(sanitize("tiny.txt").unwrap(), 0o644, &mut &b"ok"[..], zstd)
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let mut reader = PackReader::from_bytes(bytes).expect("open");
        let big = reader.lookup("big.txt").unwrap().expect("big");
        assert_eq!(big.header.codec, CodecTag::Zstd);
        assert!(big.header.stored_len < big.header.raw_len);
        let tiny = reader.lookup("tiny.txt").unwrap().expect("tiny");
        assert_eq!(tiny.header.codec, CodecTag::Store);
        assert_eq!(tiny.header.stored_len, 2);
        assert_eq!(reader.read_content(&tiny).unwrap(), b"ok");
    }
}
