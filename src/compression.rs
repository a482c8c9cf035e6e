//! # Cluster Compression Codecs
//!
//! Cluster bodies are stored either raw or compressed with LZMA (xz
//! container) or Zstandard. The one-byte cluster info field encodes the
//! algorithm in its low four bits and the extended-offsets flag in bit 4:
//!
//! ```text
//! +---+---+---+---+---+---+---+---+
//! | 0 | 0 | 0 | E |  compression  |
//! +---+---+---+---+---+---+---+---+
//! ```
//!
//! Recognized compression values follow the archive format: `1` none,
//! `4` LZMA, `5` Zstandard. Value `0` is the legacy "default" marker and is
//! treated as uncompressed. Zlib (`2`) and Bzip2 (`3`) exist in old archives
//! but are not supported by this build; encountering them reports
//! [`ZimError::UnsupportedCompression`].
//!
//! Compression settings are fixed constants so that identical input produces
//! identical archives regardless of worker count.

use std::io::{Read, Write};

use eyre::{bail, Result, WrapErr};

use crate::config::{LZMA_PRESET, ZSTD_LEVEL};
use crate::error::ZimError;

const EXTENDED_FLAG: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 1,
    Lzma = 4,
    Zstd = 5,
}

impl Compression {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 | 1 => Ok(Compression::None),
            4 => Ok(Compression::Lzma),
            5 => Ok(Compression::Zstd),
            other => bail!(ZimError::UnsupportedCompression(other)),
        }
    }

    pub fn is_compressed(self) -> bool {
        !matches!(self, Compression::None)
    }

    /// Splits a cluster info byte into the compression algorithm and the
    /// extended-offsets flag.
    pub fn from_info_byte(info: u8) -> Result<(Self, bool)> {
        let compression = Self::from_u8(info & 0x0F)?;
        Ok((compression, info & EXTENDED_FLAG != 0))
    }

    pub fn info_byte(self, extended: bool) -> u8 {
        self as u8 | if extended { EXTENDED_FLAG } else { 0 }
    }
}

/// Streaming encoder over an output sink. Created per cluster; `finish`
/// flushes the codec frame and hands the sink back.
pub enum BodyEncoder<W: Write> {
    None(W),
    Lzma(xz2::write::XzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> BodyEncoder<W> {
    pub fn new(compression: Compression, sink: W) -> Result<Self> {
        Ok(match compression {
            Compression::None => BodyEncoder::None(sink),
            Compression::Lzma => BodyEncoder::Lzma(xz2::write::XzEncoder::new(sink, LZMA_PRESET)),
            Compression::Zstd => BodyEncoder::Zstd(
                zstd::stream::write::Encoder::new(sink, ZSTD_LEVEL)
                    .wrap_err("failed to initialize zstd encoder")?,
            ),
        })
    }

    pub fn finish(self) -> Result<W> {
        match self {
            BodyEncoder::None(sink) => Ok(sink),
            BodyEncoder::Lzma(encoder) => {
                encoder.finish().wrap_err("failed to finish lzma stream")
            }
            BodyEncoder::Zstd(encoder) => {
                encoder.finish().wrap_err("failed to finish zstd stream")
            }
        }
    }
}

impl<W: Write> Write for BodyEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            BodyEncoder::None(sink) => sink.write(buf),
            BodyEncoder::Lzma(encoder) => encoder.write(buf),
            BodyEncoder::Zstd(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            BodyEncoder::None(sink) => sink.flush(),
            BodyEncoder::Lzma(encoder) => encoder.flush(),
            BodyEncoder::Zstd(encoder) => encoder.flush(),
        }
    }
}

/// Decompresses a whole cluster body. The input slice may extend past the
/// end of the compressed frame; the codec stops at its end-of-stream marker.
pub fn decompress_body(compression: Compression, input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match compression {
        Compression::None => out.extend_from_slice(input),
        Compression::Lzma => {
            xz2::read::XzDecoder::new(input)
                .read_to_end(&mut out)
                .wrap_err("failed to decompress lzma cluster")?;
        }
        Compression::Zstd => {
            zstd::stream::read::Decoder::new(input)
                .wrap_err("failed to initialize zstd decoder")?
                .read_to_end(&mut out)
                .wrap_err("failed to decompress zstd cluster")?;
        }
    }
    Ok(out)
}
