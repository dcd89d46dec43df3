// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Forward-read and append-write byte streams plus grouped multi-stream
//! containers.
//!
//! Everything the engine persists goes through these types: a
//! [`SourceStream`] is a read cursor over a borrowed buffer, a [`SinkStream`]
//! is an append-only growable buffer, and the stream sets serialize an ordered
//! group of streams behind one small header (stream count, then one length per
//! stream, then the concatenated bodies).

use byteorder::{ByteOrder, LittleEndian};
use integer_encoding::VarInt;

use crate::error::{Error, Result};

/// A read cursor over a borrowed immutable buffer.
#[derive(Clone, Copy)]
pub struct SourceStream<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SourceStream<'a> {
    /// Creates a cursor positioned at the start of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns `true` if every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Reads exactly `n` bytes, never over-reading.
    pub fn read(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::StreamError);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Reads every unread byte, leaving the cursor at the end.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    /// Reads a fixed-width little-endian `u32`.
    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read(4)?))
    }

    /// Decodes an unsigned little-endian base-128 varint.
    pub fn read_varint32(&mut self) -> Result<u32> {
        let (value, used) = u32::decode_var(&self.buf[self.pos..])
            .ok_or(Error::DeserializationFailed("truncated varint"))?;
        self.pos += used;
        Ok(value)
    }

    /// Decodes a zigzag-signed little-endian base-128 varint.
    pub fn read_varint32_signed(&mut self) -> Result<i32> {
        let (value, used) = i32::decode_var(&self.buf[self.pos..])
            .ok_or(Error::DeserializationFailed("truncated signed varint"))?;
        self.pos += used;
        Ok(value)
    }

    /// Decodes a zigzag-signed 64-bit little-endian base-128 varint.
    pub fn read_varint64_signed(&mut self) -> Result<i64> {
        let (value, used) = i64::decode_var(&self.buf[self.pos..])
            .ok_or(Error::DeserializationFailed("truncated signed varint"))?;
        self.pos += used;
        Ok(value)
    }
}

/// An append-only owned growable buffer.
#[derive(Default)]
pub struct SinkStream {
    buf: Vec<u8>,
}

impl SinkStream {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrows the accumulated bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the sink, yielding its bytes.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Appends raw bytes.
    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Appends a single byte.
    pub fn write_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Appends a fixed-width little-endian `u32`.
    pub fn write_u32_le(&mut self, value: u32) {
        let mut scratch = [0u8; 4];
        LittleEndian::write_u32(&mut scratch, value);
        self.write(&scratch);
    }

    /// Appends an unsigned little-endian base-128 varint.
    pub fn write_varint32(&mut self, value: u32) {
        let mut scratch = [0u8; 8];
        let used = value.encode_var(&mut scratch);
        self.write(&scratch[..used]);
    }

    /// Appends a zigzag-signed little-endian base-128 varint.
    pub fn write_varint32_signed(&mut self, value: i32) {
        let mut scratch = [0u8; 8];
        let used = value.encode_var(&mut scratch);
        self.write(&scratch[..used]);
    }

    /// Appends a zigzag-signed 64-bit little-endian base-128 varint.
    pub fn write_varint64_signed(&mut self, value: i64) {
        let mut scratch = [0u8; 10];
        let used = value.encode_var(&mut scratch);
        self.write(&scratch[..used]);
    }
}

/// An ordered, index-stable group of source streams parsed from one buffer.
pub struct SourceStreamSet<'a> {
    streams: Vec<SourceStream<'a>>,
}

impl<'a> SourceStreamSet<'a> {
    /// Parses the stream-set header and splits `buf` into per-stream cursors.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::StreamError`] if a declared stream length does not
    /// fit the remaining bytes, and with [`Error::DeserializationFailed`] on a
    /// truncated header.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let mut header = SourceStream::new(buf);
        let count = header.read_varint32()?;
        // Each declared stream costs at least one length byte.
        if count as usize > header.remaining() {
            return Err(Error::StreamError);
        }

        let mut lengths = Vec::with_capacity(count as usize);
        for _ in 0..count {
            lengths.push(header.read_varint32()? as usize);
        }

        let mut streams = Vec::with_capacity(count as usize);
        for length in lengths {
            streams.push(SourceStream::new(header.read(length)?));
        }
        if !header.is_empty() {
            return Err(Error::StreamNotConsumed);
        }

        Ok(Self { streams })
    }

    /// Returns the number of streams declared in the header.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Hands out the cursor for stream `ix`.
    pub fn stream(&mut self, ix: usize) -> Result<&mut SourceStream<'a>> {
        self.streams.get_mut(ix).ok_or(Error::StreamError)
    }
}

/// An ordered, index-stable group of sink streams serialized together.
pub struct SinkStreamSet {
    streams: Vec<SinkStream>,
}

impl SinkStreamSet {
    /// Creates a set of `n` empty streams.
    #[must_use]
    pub fn with_streams(n: usize) -> Self {
        Self {
            streams: (0..n).map(|_| SinkStream::new()).collect(),
        }
    }

    /// Returns the number of streams in the set.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Hands out the sink for stream `ix`.
    ///
    /// # Panics
    ///
    /// Panics if `ix` is out of range; stream indices are fixed at
    /// construction.
    #[must_use]
    pub fn stream(&mut self, ix: usize) -> &mut SinkStream {
        &mut self.streams[ix]
    }

    /// Serializes the header and all stream bodies in index order.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::SerializationFailed`] if a stream body is too large
    /// for its length to be representable.
    pub fn copy_to(&self, sink: &mut SinkStream) -> Result<()> {
        let count = u32::try_from(self.streams.len())
            .map_err(|_| Error::SerializationFailed("stream count overflow"))?;
        sink.write_varint32(count);
        for stream in &self.streams {
            let length = u32::try_from(stream.len())
                .map_err(|_| Error::SerializationFailed("stream length overflow"))?;
            sink.write_varint32(length);
        }
        for stream in &self.streams {
            sink.write(stream.as_bytes());
        }
        Ok(())
    }

    /// Serializes the set into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`SinkStreamSet::copy_to`].
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut sink = SinkStream::new();
        self.copy_to(&mut sink)?;
        Ok(sink.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_never_overreads() {
        let mut source = SourceStream::new(b"abc");

        assert_eq!(source.read(2).unwrap(), b"ab");
        assert!(matches!(source.read(2), Err(Error::StreamError)));
        // The failed read must not consume anything.
        assert_eq!(source.read(1).unwrap(), b"c");
        assert!(source.is_empty());
    }

    #[test]
    fn varint_round_trip() {
        let values = [0u32, 1, 127, 128, 300, 0x7fff_ffff, u32::MAX];
        let signed = [0i32, 1, -1, 64, -64, i32::MAX, i32::MIN];

        let mut sink = SinkStream::new();
        for &v in &values {
            sink.write_varint32(v);
        }
        for &v in &signed {
            sink.write_varint32_signed(v);
        }

        let mut source = SourceStream::new(sink.as_bytes());
        for &v in &values {
            assert_eq!(source.read_varint32().unwrap(), v);
        }
        for &v in &signed {
            assert_eq!(source.read_varint32_signed().unwrap(), v);
        }
        assert!(source.is_empty());
    }

    #[test]
    fn truncated_varint_is_an_error() {
        // 0x80 continuation bit with no following byte.
        let mut source = SourceStream::new(&[0x80]);

        assert!(matches!(
            source.read_varint32(),
            Err(Error::DeserializationFailed(_))
        ));
    }

    #[test]
    fn stream_set_round_trip() {
        let contents: [&[u8]; 4] = [b"first", b"", b"third stream body", &[0xff; 300]];

        let mut set = SinkStreamSet::with_streams(contents.len());
        for (ix, body) in contents.iter().enumerate() {
            set.stream(ix).write(body);
        }
        let serialized = set.serialize().unwrap();

        let mut parsed = SourceStreamSet::parse(&serialized).unwrap();
        assert_eq!(parsed.stream_count(), contents.len());
        for (ix, body) in contents.iter().enumerate() {
            assert_eq!(parsed.stream(ix).unwrap().read_rest(), *body);
        }
    }

    #[test]
    fn stream_set_rejects_overrun_lengths() {
        let mut set = SinkStreamSet::with_streams(1);
        set.stream(0).write(b"abcdef");
        let mut serialized = set.serialize().unwrap();

        // Inflate the declared length of stream 0 past the end of the buffer.
        serialized[1] = 0x40;

        assert!(SourceStreamSet::parse(&serialized).is_err());
    }
}
