// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

/// DecoderError is the error type returned by decoding operations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderError {
    /// The buffer did not contain `usize` more bytes
    UnexpectedEof(usize),
    /// A parsing invariant was violated
    InvariantViolation(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnexpectedEof(len) => write!(f, "unexpected eof: {len}"),
            Self::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for DecoderError {}

pub type DecoderResult<'a, T> = Result<(T, DecoderBuffer<'a>), DecoderError>;

/// DecoderBuffer is a read cursor over a byte slice
///
/// Each `decode_*` call returns the parsed value and the remaining
/// buffer, so parsers are written as chains of rebindings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> DecoderBuffer<'a> {
    #[inline]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub const fn as_slice(&self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    fn ensure_len(&self, len: usize) -> Result<(), DecoderError> {
        if self.bytes.len() < len {
            Err(DecoderError::UnexpectedEof(len))
        } else {
            Ok(())
        }
    }

    /// Splits off `len` bytes from the front of the buffer
    #[inline]
    pub fn decode_slice(self, len: usize) -> DecoderResult<'a, &'a [u8]> {
        self.ensure_len(len)?;
        let (slice, remaining) = self.bytes.split_at(len);
        Ok((slice, Self::new(remaining)))
    }

    #[inline]
    pub fn skip(self, len: usize) -> Result<DecoderBuffer<'a>, DecoderError> {
        let (_, remaining) = self.decode_slice(len)?;
        Ok(remaining)
    }

    #[inline]
    pub fn decode_u8(self) -> DecoderResult<'a, u8> {
        let (slice, remaining) = self.decode_slice(1)?;
        Ok((slice[0], remaining))
    }

    #[inline]
    pub fn decode_u16(self) -> DecoderResult<'a, u16> {
        let (slice, remaining) = self.decode_slice(2)?;
        Ok((NetworkEndian::read_u16(slice), remaining))
    }

    #[inline]
    pub fn decode_u24(self) -> DecoderResult<'a, u32> {
        let (slice, remaining) = self.decode_slice(3)?;
        Ok((NetworkEndian::read_u24(slice), remaining))
    }

    #[inline]
    pub fn decode_u32(self) -> DecoderResult<'a, u32> {
        let (slice, remaining) = self.decode_slice(4)?;
        Ok((NetworkEndian::read_u32(slice), remaining))
    }

    #[inline]
    pub fn decode_u64(self) -> DecoderResult<'a, u64> {
        let (slice, remaining) = self.decode_slice(8)?;
        Ok((NetworkEndian::read_u64(slice), remaining))
    }

    /// Peeks at a byte without consuming it
    #[inline]
    pub fn peek_byte(&self, index: usize) -> Result<u8, DecoderError> {
        self.ensure_len(index + 1)?;
        Ok(self.bytes[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_decodes() {
        let bytes = [0x01, 0x02, 0x03, 0xaa, 0xbb, 0xcc, 0xdd];
        let buffer = DecoderBuffer::new(&bytes);
        let (byte, buffer) = buffer.decode_u8().unwrap();
        assert_eq!(byte, 0x01);
        let (half, buffer) = buffer.decode_u16().unwrap();
        assert_eq!(half, 0x0203);
        let (word, buffer) = buffer.decode_u32().unwrap();
        assert_eq!(word, 0xaabbccdd);
        assert!(buffer.is_empty());
    }

    #[test]
    fn eof_is_reported() {
        let buffer = DecoderBuffer::new(&[1, 2]);
        assert_eq!(buffer.decode_u32().unwrap_err(), DecoderError::UnexpectedEof(4));
    }
}
