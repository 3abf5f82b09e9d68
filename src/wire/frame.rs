//! Length-prefixed frames.
//!
//! Every frame is `[u32 big-endian length][u8 compression tag][payload]`,
//! where `length` counts the payload bytes as sent (after compression).
//! Compression is chosen per frame, so compressed and plain frames may be
//! mixed on one connection.

use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Frame header size: length(4) + compression tag(1).
pub const HEADER_LEN: usize = 5;

/// Default ceiling on a single frame's payload, before and after inflation.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Per-frame payload compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Gzip,
    Deflate,
}

impl Compression {
    pub fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Deflate => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Deflate),
            other => Err(Error::protocol(format!("unknown compression tag {}", other))),
        }
    }

    fn compress(self, payload: &[u8]) -> Result<Cow<'_, [u8]>> {
        let level = flate2::Compression::default();
        Ok(match self {
            Compression::None => Cow::Borrowed(payload),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), level);
                encoder.write_all(payload)?;
                Cow::Owned(encoder.finish()?)
            }
            Compression::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::with_capacity(payload.len() / 2), level);
                encoder.write_all(payload)?;
                Cow::Owned(encoder.finish()?)
            }
        })
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Deflate => "deflate",
        };
        f.write_str(name)
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            "deflate" => Ok(Compression::Deflate),
            other => Err(Error::Config(format!(
                "unknown compression '{}', expected none, gzip or deflate",
                other
            ))),
        }
    }
}

/// Writes frames to an underlying stream.
pub struct FrameWriter<W: Write> {
    inner: W,
    max_frame_len: usize,
    frames: u64,
    bytes: u64,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W, max_frame_len: usize) -> Self {
        Self {
            inner,
            max_frame_len,
            frames: 0,
            bytes: 0,
        }
    }

    /// Compress `payload` as requested and write it as one frame.
    pub fn write_frame(&mut self, payload: &[u8], compression: Compression) -> Result<()> {
        let body = compression.compress(payload)?;
        if body.len() > self.max_frame_len {
            return Err(Error::protocol(format!(
                "frame of {} bytes exceeds the {}-byte limit",
                body.len(),
                self.max_frame_len
            )));
        }
        let len = u32::try_from(body.len())
            .map_err(|_| Error::protocol(format!("frame of {} bytes is too long", body.len())))?;

        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(&len.to_be_bytes());
        header[4] = compression.tag();
        self.inner.write_all(&header)?;
        self.inner.write_all(&body)?;

        self.frames += 1;
        self.bytes += (HEADER_LEN + body.len()) as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes written so far, headers included.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads frames from an underlying stream.
///
/// Never allocates more than the frame's declared length for the raw
/// payload, and rejects frames that declare or inflate past
/// `max_frame_len`.
pub struct FrameReader<R: Read> {
    inner: R,
    max_frame_len: usize,
    frames: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, max_frame_len: usize) -> Self {
        Self {
            inner,
            max_frame_len,
            frames: 0,
        }
    }

    /// Read one frame and return its decompressed payload.
    pub fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; HEADER_LEN];
        self.inner.read_exact(&mut header)?;

        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > self.max_frame_len {
            return Err(Error::protocol(format!(
                "frame declares {} bytes, limit is {}",
                len, self.max_frame_len
            )));
        }
        let compression = Compression::from_tag(header[4])?;

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body)?;
        self.frames += 1;

        match compression {
            Compression::None => Ok(body),
            Compression::Gzip => self.inflate(GzDecoder::new(body.as_slice()), compression),
            Compression::Deflate => self.inflate(DeflateDecoder::new(body.as_slice()), compression),
        }
    }

    fn inflate(&self, decoder: impl Read, compression: Compression) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        decoder
            .take(self.max_frame_len as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| Error::protocol(format!("corrupt {} frame: {}", compression, e)))?;
        if out.len() > self.max_frame_len {
            return Err(Error::protocol(format!(
                "{} frame inflates past the {}-byte limit",
                compression, self.max_frame_len
            )));
        }
        Ok(out)
    }

    /// Frames read so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn write_then_read(payload: &[u8], compression: Compression) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new(), DEFAULT_MAX_FRAME_LEN);
        writer.write_frame(payload, compression).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes[4], compression.tag());
        let mut reader = FrameReader::new(bytes.as_slice(), DEFAULT_MAX_FRAME_LEN);
        reader.read_frame().unwrap()
    }

    #[test]
    fn test_plain_frame_layout() {
        let mut writer = FrameWriter::new(Vec::new(), DEFAULT_MAX_FRAME_LEN);
        writer.write_frame(&[7, 8, 9], Compression::None).unwrap();
        assert_eq!(writer.into_inner(), vec![0, 0, 0, 3, 0, 7, 8, 9]);
    }

    #[test]
    fn test_compressed_frames() {
        let payload: Vec<u8> = (0..10_000u32).flat_map(|i| (i % 17).to_be_bytes()).collect();
        assert_eq!(write_then_read(&payload, Compression::Gzip), payload);
        assert_eq!(write_then_read(&payload, Compression::Deflate), payload);
        assert_eq!(write_then_read(&[], Compression::Gzip), Vec::<u8>::new());
    }

    #[test]
    fn test_unknown_tag_is_protocol_error() {
        let bytes = [0, 0, 0, 1, 9, 0];
        let mut reader = FrameReader::new(&bytes[..], DEFAULT_MAX_FRAME_LEN);
        assert_eq!(reader.read_frame().unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_absurd_length_rejected_before_allocation() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0];
        let mut reader = FrameReader::new(&bytes[..], 1024);
        assert_eq!(reader.read_frame().unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_inflation_limit() {
        let payload = vec![0u8; 4096];
        let mut writer = FrameWriter::new(Vec::new(), DEFAULT_MAX_FRAME_LEN);
        writer.write_frame(&payload, Compression::Gzip).unwrap();
        let bytes = writer.into_inner();

        let mut reader = FrameReader::new(bytes.as_slice(), 1024);
        assert_eq!(reader.read_frame().unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_corrupt_gzip_is_protocol_error() {
        let bytes = [0, 0, 0, 4, 1, 1, 2, 3, 4];
        let mut reader = FrameReader::new(&bytes[..], DEFAULT_MAX_FRAME_LEN);
        assert_eq!(reader.read_frame().unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_truncated_frame_is_io_error() {
        let bytes = [0, 0, 0, 10, 0, 1, 2];
        let mut reader = FrameReader::new(&bytes[..], DEFAULT_MAX_FRAME_LEN);
        assert_eq!(reader.read_frame().unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_writer_enforces_limit() {
        let mut writer = FrameWriter::new(Vec::new(), 4);
        let err = writer.write_frame(&[0; 5], Compression::None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_compression_parsing() {
        assert_eq!("GZIP".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert!("zstd".parse::<Compression>().is_err());
        assert_eq!(Compression::from_tag(2).unwrap(), Compression::Deflate);
    }
}
