// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The variable-length list framing used for vector fields and
//! variable-length scalars: one `0x00` byte for an empty value, or
//! `0xFF` followed by the 16-bit payload length.

use flowprobe_codec::{DecoderBuffer, DecoderError, EncoderBuffer};

const EMPTY_MARKER: u8 = 0x00;
const LONG_HEADER_FLAG: u8 = 0xff;

/// Size of an encoded list with `payload_len` payload bytes
pub fn encoded_size(payload_len: usize) -> usize {
    if payload_len == 0 {
        1
    } else {
        3 + payload_len
    }
}

/// Writes the list framing and payload produced by `write_payload`.
///
/// `payload_len` must match the bytes the closure writes.
pub fn write_basic_list(
    encoder: &mut EncoderBuffer,
    payload_len: usize,
    write_payload: impl FnOnce(&mut EncoderBuffer),
) {
    if payload_len == 0 {
        encoder.write_u8(EMPTY_MARKER);
        return;
    }

    encoder.write_u8(LONG_HEADER_FLAG);
    encoder.write_u16(payload_len as u16);
    let before = encoder.len();
    write_payload(encoder);
    debug_assert_eq!(encoder.len() - before, payload_len, "list payload length");
}

/// Reads one list back; returns the payload bytes.
pub fn read_basic_list(buffer: DecoderBuffer) -> Result<(&[u8], DecoderBuffer), DecoderError> {
    let (marker, buffer) = buffer.decode_u8()?;
    match marker {
        EMPTY_MARKER => Ok((&[], buffer)),
        LONG_HEADER_FLAG => {
            let (len, buffer) = buffer.decode_u16()?;
            buffer.decode_slice(len as usize)
        }
        _ => Err(DecoderError::InvariantViolation("bad basic list marker")),
    }
}
