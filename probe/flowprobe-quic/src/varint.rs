// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use flowprobe_codec::{DecoderBuffer, DecoderError, DecoderResult};

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# The QUIC variable-length integer encoding reserves the two most
//# significant bits of the first byte to encode the base 2 logarithm of
//# the integer encoding length in bytes.  The integer value is encoded
//# on the remaining bits, in network byte order.

/// Decodes one QUIC variable-length integer
pub fn decode_varint(buffer: DecoderBuffer) -> DecoderResult<u64> {
    let (first, _) = buffer.decode_u8()?;
    let len = 1usize << (first >> 6);
    let (bytes, remaining) = buffer.decode_slice(len)?;

    let mut value = (bytes[0] & 0x3f) as u64;
    for byte in &bytes[1..] {
        value = (value << 8) | *byte as u64;
    }
    Ok((value, remaining))
}

/// Decodes a varint and bounds-checks it against the remaining buffer,
/// as needed for length prefixes.
pub fn decode_varint_length(buffer: DecoderBuffer) -> DecoderResult<usize> {
    let (value, remaining) = decode_varint(buffer)?;
    let length = usize::try_from(value)
        .map_err(|_| DecoderError::InvariantViolation("length out of range"))?;
    if length > remaining.len() {
        return Err(DecoderError::UnexpectedEof(length));
    }
    Ok((length, remaining))
}
