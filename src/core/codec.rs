// Content codecs: store or zstd. Checksums always cover the decoded bytes.
use std::io::{self, Read, Write};

use crate::core::error::{Error, ErrorKind};

pub const ZSTD_MIN_LEVEL: i32 = 1;
pub const ZSTD_MAX_LEVEL: i32 = 22;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Compression {
    #[default]
    Store,
    Zstd { level: i32 },
}

impl Compression {
    pub fn tag(self) -> CodecTag {
        match self {
            Compression::Store => CodecTag::Store,
            Compression::Zstd { .. } => CodecTag::Zstd,
        }
    }

    pub fn validate(self) -> Result<(), Error> {
        if let Compression::Zstd { level } = self {
            if !(ZSTD_MIN_LEVEL..=ZSTD_MAX_LEVEL).contains(&level) {
                return Err(Error::new(ErrorKind::InvalidArgument)
                    .with_message(format!("zstd level {level} out of range"))
                    .with_hint("Use a level between 1 and 22."));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CodecTag {
    Store = 0,
    Zstd = 1,
}

impl CodecTag {
    pub fn from_u8(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(CodecTag::Store),
            1 => Ok(CodecTag::Zstd),
            _ => Err(Error::new(ErrorKind::Format)
                .with_message(format!("unknown content codec {value}"))),
        }
    }
}

/// Stream `src` through the codec into `dst`.
pub fn encode(compression: Compression, src: &mut impl Read, dst: &mut impl Write) -> io::Result<()> {
    match compression {
        Compression::Store => {
            io::copy(src, dst)?;
        }
        Compression::Zstd { level } => {
            let mut encoder = zstd::stream::write::Encoder::new(dst, level)?;
            io::copy(src, &mut encoder)?;
            encoder.finish()?;
        }
    }
    Ok(())
}

/// Compress `raw` whole; keeps it stored when zstd does not make it smaller.
pub fn compress_or_store(compression: Compression, raw: Vec<u8>) -> io::Result<(CodecTag, Vec<u8>)> {
    if let Compression::Zstd { level } = compression {
        let packed = zstd::bulk::compress(&raw, level)?;
        if packed.len() < raw.len() {
            return Ok((CodecTag::Zstd, packed));
        }
    }
    Ok((CodecTag::Store, raw))
}

/// Wrap `src` (exactly the stored bytes of one entry) in a decoding reader.
pub fn decoder<'a, R: Read + 'a>(tag: CodecTag, src: R) -> io::Result<Box<dyn Read + 'a>> {
    match tag {
        CodecTag::Store => Ok(Box::new(src)),
        CodecTag::Zstd => Ok(Box::new(zstd::stream::read::Decoder::new(src)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::{CodecTag, Compression, compress_or_store, decoder, encode};
    use crate::core::error::ErrorKind;
    use std::io::Read;

    fn decode_all(tag: CodecTag, stored: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        decoder(tag, stored)
            .expect("decoder")
            .read_to_end(&mut out)
            .expect("decode");
        out
    }

    #[test]
    fn store_is_identity() {
        let mut stored = Vec::new();
        encode(Compression::Store, &mut &b"plain bytes"[..], &mut stored).expect("encode");
        assert_eq!(stored, b"plain bytes");
        assert_eq!(decode_all(CodecTag::Store, &stored), b"plain bytes");
    }

    #[test]
    fn zstd_shrinks_repetitive_text() {
        let raw = "layer ".repeat(4096).into_bytes();
        let mut stored = Vec::new();
        encode(Compression::Zstd { level: 3 }, &mut raw.as_slice(), &mut stored).expect("encode");
        assert!(stored.len() < raw.len());
        assert_eq!(decode_all(CodecTag::Zstd, &stored), raw);
    }

    #[test]
    fn zstd_falls_back_to_store_when_it_does_not_shrink() {
        let zstd = Compression::Zstd { level: 3 };
        let (tag, stored) = compress_or_store(zstd, b"hi".to_vec()).expect("tiny");
        assert_eq!(tag, CodecTag::Store);
        assert_eq!(stored, b"hi");

        let raw = "layer ".repeat(4096).into_bytes();
        let (tag, stored) = compress_or_store(zstd, raw.clone()).expect("repetitive");
        assert_eq!(tag, CodecTag::Zstd);
        assert_eq!(decode_all(tag, &stored), raw);

        let (tag, _) = compress_or_store(Compression::Store, raw).expect("store");
        assert_eq!(tag, CodecTag::Store);
    }

    #[test]
    fn corrupt_zstd_stream_fails_to_decode() {
        let mut out = Vec::new();
        let result = decoder(CodecTag::Zstd, &b"definitely not zstd"[..])
            .and_then(|mut reader| reader.read_to_end(&mut out));
        assert!(result.is_err());
    }

    #[test]
    fn level_is_range_checked() {
        assert!(Compression::Zstd { level: 3 }.validate().is_ok());
        let err = Compression::Zstd { level: 40 }.validate().expect_err("out of range");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn unknown_tag_is_format_error() {
        assert_eq!(CodecTag::from_u8(9).unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(CodecTag::from_u8(1).unwrap(), CodecTag::Zstd);
    }
}
