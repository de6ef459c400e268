// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Streaming LZ4 framing for stream transports.
//!
//! The byte stream is chunked into compression blocks, each preceded by
//! `(compressed_length u16, uncompressed_length u16)`. After any
//! reconnection the stream restarts with a reset marker of four zero
//! bytes, the LZ4 magic and a 32-bit buffer-size hint the receiver uses
//! to size its history ring.

use core::fmt;
use flowprobe_codec::{DecoderBuffer, DecoderError};

/// `LZ4c`
pub const LZ4_MAGIC: u32 = 0x4c5a_3463;

/// Reset marker: four zero bytes, magic, buffer size
const RESET_MARKER_SIZE: usize = 4 + 4 + 4;
/// Per-block header: compressed and uncompressed lengths
const BLOCK_HEADER_SIZE: usize = 4;

/// Block framing failed; the message is dropped, the stream persists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressError {
    /// Input or output does not fit the 16-bit block length fields
    BlockTooLarge(usize),
}

impl fmt::Display for CompressError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BlockTooLarge(len) => write!(f, "lz4 block of {len} bytes exceeds framing"),
        }
    }
}

impl std::error::Error for CompressError {}

/// Producer side of the LZ4 stream framing
#[derive(Debug)]
pub struct Lz4Framer {
    buffer_size: u32,
    needs_reset: bool,
    out: Vec<u8>,
}

impl Lz4Framer {
    /// `buffer_size` is the history-ring hint announced to the
    /// receiver in every reset marker.
    pub fn new(buffer_size: u32) -> Self {
        Self {
            buffer_size,
            needs_reset: true,
            out: Vec::new(),
        }
    }

    /// Requests a stream reset before the next block; called after any
    /// transport reconnection.
    pub fn request_reset(&mut self) {
        self.needs_reset = true;
    }

    /// Frames one message as a compression block, preceded by a reset
    /// marker when one is pending.
    pub fn frame(&mut self, message: &[u8]) -> Result<&[u8], CompressError> {
        if message.len() > u16::MAX as usize {
            return Err(CompressError::BlockTooLarge(message.len()));
        }

        self.out.clear();
        if self.needs_reset {
            self.out.extend_from_slice(&[0, 0, 0, 0]);
            self.out.extend_from_slice(&LZ4_MAGIC.to_be_bytes());
            self.out.extend_from_slice(&self.buffer_size.to_be_bytes());
            self.needs_reset = false;
        }

        let header_at = self.out.len();
        self.out.resize(header_at + BLOCK_HEADER_SIZE, 0);
        let bound = lz4_flex::block::get_maximum_output_size(message.len());
        self.out.resize(header_at + BLOCK_HEADER_SIZE + bound, 0);
        let compressed = lz4_flex::block::compress_into(
            message,
            &mut self.out[header_at + BLOCK_HEADER_SIZE..],
        )
        .expect("output sized to the compression bound");
        self.out.truncate(header_at + BLOCK_HEADER_SIZE + compressed);

        if compressed > u16::MAX as usize {
            return Err(CompressError::BlockTooLarge(compressed));
        }
        self.out[header_at..header_at + 2]
            .copy_from_slice(&(compressed as u16).to_be_bytes());
        self.out[header_at + 2..header_at + 4]
            .copy_from_slice(&(message.len() as u16).to_be_bytes());

        Ok(&self.out)
    }
}

/// Receiver-side framing walk, used by the tests: splits a stream into
/// decompressed messages, honoring reset markers.
pub fn decode_stream(stream: &[u8]) -> Result<Vec<Vec<u8>>, DecoderError> {
    let mut messages = Vec::new();
    let mut buffer = DecoderBuffer::new(stream);

    while !buffer.is_empty() {
        if buffer.len() >= RESET_MARKER_SIZE {
            let (maybe_zero, rest) = buffer.decode_u32()?;
            if maybe_zero == 0 {
                let (magic, rest) = rest.decode_u32()?;
                if magic != LZ4_MAGIC {
                    return Err(DecoderError::InvariantViolation("bad lz4 magic"));
                }
                let (_buffer_size, rest) = rest.decode_u32()?;
                buffer = rest;
                continue;
            }
        }

        let (compressed_len, rest) = buffer.decode_u16()?;
        let (uncompressed_len, rest) = rest.decode_u16()?;
        let (block, rest) = rest.decode_slice(compressed_len as usize)?;
        let message = lz4_flex::block::decompress(block, uncompressed_len as usize)
            .map_err(|_| DecoderError::InvariantViolation("lz4 block corrupt"))?;
        messages.push(message);
        buffer = rest;
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_block_carries_the_reset_marker() {
        let mut framer = Lz4Framer::new(4096);
        let framed = framer.frame(b"hello ipfix").unwrap().to_vec();

        assert_eq!(&framed[..4], &[0, 0, 0, 0]);
        assert_eq!(&framed[4..8], &LZ4_MAGIC.to_be_bytes());
        assert_eq!(&framed[8..12], &4096u32.to_be_bytes());

        let messages = decode_stream(&framed).unwrap();
        assert_eq!(messages, [b"hello ipfix".to_vec()]);
    }

    #[test]
    fn subsequent_blocks_are_bare_until_reset() {
        let mut framer = Lz4Framer::new(1024);
        let mut stream = framer.frame(b"first message").unwrap().to_vec();
        let second = framer.frame(b"second message").unwrap();
        // no marker: block header follows immediately
        assert!(second[..2] != [0, 0] || second[2..4] != [0, 0]);
        stream.extend_from_slice(second);

        framer.request_reset();
        stream.extend_from_slice(framer.frame(b"third message").unwrap());

        let messages = decode_stream(&stream).unwrap();
        assert_eq!(
            messages,
            [
                b"first message".to_vec(),
                b"second message".to_vec(),
                b"third message".to_vec()
            ]
        );
    }

    #[test]
    fn oversized_messages_are_rejected() {
        let mut framer = Lz4Framer::new(1024);
        let message = vec![0u8; u16::MAX as usize + 1];
        assert_eq!(
            framer.frame(&message).unwrap_err(),
            CompressError::BlockTooLarge(message.len())
        );
    }
}
