// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CRYPTO-frame reassembly from a decrypted Initial payload.
//!
//! Only the frame types that may appear in Initial packets are
//! understood: CRYPTO data is collected, PADDING / ACK /
//! CONNECTION_CLOSE are skipped, anything else aborts the parse.

use crate::varint::{decode_varint, decode_varint_length};
use core::fmt;
use flowprobe_codec::DecoderBuffer;

const FRAME_PADDING: u8 = 0x00;
const FRAME_ACK: u8 = 0x02;
const FRAME_ACK_ECN: u8 = 0x03;
const FRAME_CRYPTO: u8 = 0x06;
const FRAME_CONNECTION_CLOSE: u8 = 0x1c;
const FRAME_CONNECTION_CLOSE_APP: u8 = 0x1d;

/// Largest crypto stream accepted from one packet
const MAX_CRYPTO_LEN: usize = 4096;

/// Frame-level parse failure; the packet is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    Malformed,
    UnexpectedFrame(u8),
    /// The payload carried no CRYPTO data at all
    NoCryptoData,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed frame"),
            Self::UnexpectedFrame(frame) => write!(f, "unexpected frame type {frame:#04x}"),
            Self::NoCryptoData => write!(f, "no crypto frames in payload"),
        }
    }
}

impl std::error::Error for FrameError {}

type FrameResult<'a> = Result<DecoderBuffer<'a>, FrameError>;

fn varint(buffer: DecoderBuffer) -> Result<(u64, DecoderBuffer), FrameError> {
    decode_varint(buffer).map_err(|_| FrameError::Malformed)
}

fn varint_length(buffer: DecoderBuffer) -> Result<(usize, DecoderBuffer), FrameError> {
    decode_varint_length(buffer).map_err(|_| FrameError::Malformed)
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# ACK Frame {
//#   Type (i) = 0x02..0x03,
//#   Largest Acknowledged (i),
//#   ACK Delay (i),
//#   ACK Range Count (i),
//#   First ACK Range (i),
//#   ACK Range (..) ...,
//#   [ECN Counts (..)],
//# }
fn skip_ack(buffer: DecoderBuffer, with_ecn: bool) -> FrameResult {
    let (_largest, buffer) = varint(buffer)?;
    let (_delay, buffer) = varint(buffer)?;
    let (range_count, buffer) = varint(buffer)?;
    let (_first_range, mut buffer) = varint(buffer)?;

    for _ in 0..range_count {
        let (_gap, rest) = varint(buffer)?;
        let (_len, rest) = varint(rest)?;
        buffer = rest;
    }

    if with_ecn {
        let (_ect0, rest) = varint(buffer)?;
        let (_ect1, rest) = varint(rest)?;
        let (_ce, rest) = varint(rest)?;
        buffer = rest;
    }

    Ok(buffer)
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# CONNECTION_CLOSE Frame {
//#   Type (i) = 0x1c..0x1d,
//#   Error Code (i),
//#   [Frame Type (i)],
//#   Reason Phrase Length (i),
//#   Reason Phrase (..),
//# }
fn skip_connection_close(buffer: DecoderBuffer, with_frame_type: bool) -> FrameResult {
    let (_error_code, mut buffer) = varint(buffer)?;
    if with_frame_type {
        let (_frame_type, rest) = varint(buffer)?;
        buffer = rest;
    }
    let (reason_len, buffer) = varint_length(buffer)?;
    buffer.skip(reason_len).map_err(|_| FrameError::Malformed)
}

/// Extracts the concatenated CRYPTO-frame data of one decrypted
/// Initial payload.
///
/// Frames are appended in arrival order; Initial hellos fit one
/// packet, so offset reordering is not performed.
pub fn reassemble_crypto(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut crypto = Vec::new();
    let mut buffer = DecoderBuffer::new(payload);

    while !buffer.is_empty() {
        let (frame_type, rest) = buffer.decode_u8().map_err(|_| FrameError::Malformed)?;
        buffer = match frame_type {
            FRAME_PADDING => {
                let mut rest = rest;
                while let Ok(0) = rest.peek_byte(0) {
                    rest = rest.skip(1).map_err(|_| FrameError::Malformed)?;
                }
                rest
            }
            FRAME_CRYPTO => {
                let (_offset, rest) = varint(rest)?;
                let (len, rest) = varint_length(rest)?;
                let (data, rest) = rest.decode_slice(len).map_err(|_| FrameError::Malformed)?;
                if crypto.len() + data.len() > MAX_CRYPTO_LEN {
                    return Err(FrameError::Malformed);
                }
                crypto.extend_from_slice(data);
                rest
            }
            FRAME_ACK => skip_ack(rest, false)?,
            FRAME_ACK_ECN => skip_ack(rest, true)?,
            FRAME_CONNECTION_CLOSE => skip_connection_close(rest, true)?,
            FRAME_CONNECTION_CLOSE_APP => skip_connection_close(rest, false)?,
            other => return Err(FrameError::UnexpectedFrame(other)),
        };
    }

    if crypto.is_empty() {
        return Err(FrameError::NoCryptoData);
    }
    Ok(crypto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn collects_crypto_and_skips_padding() {
        // CRYPTO offset=0 len=4, then padding
        let payload = hex!("06 00 04 deadbeef 00 00 00");
        assert_eq!(reassemble_crypto(&payload).unwrap(), hex!("deadbeef"));
    }

    #[test]
    fn skips_ack_frames_between_crypto() {
        // ACK: largest=5 delay=0 range_count=1 first=0 gap=0 len=0
        let payload = hex!("02 05 00 01 00 00 00 06 00 02 cafe");
        assert_eq!(reassemble_crypto(&payload).unwrap(), hex!("cafe"));
    }

    #[test]
    fn skips_connection_close() {
        // CONNECTION_CLOSE error=1 frame_type=6 reason_len=2 reason
        let payload = hex!("1c 01 06 02 4142 06 00 01 aa");
        assert_eq!(reassemble_crypto(&payload).unwrap(), hex!("aa"));
    }

    #[test]
    fn unexpected_frames_abort() {
        // STREAM frames cannot appear at the Initial level
        let payload = hex!("08 00 01 aa");
        assert_eq!(
            reassemble_crypto(&payload).unwrap_err(),
            FrameError::UnexpectedFrame(0x08)
        );
    }

    #[test]
    fn padding_only_payload_has_no_data() {
        let payload = [0u8; 32];
        assert_eq!(
            reassemble_crypto(&payload).unwrap_err(),
            FrameError::NoCryptoData
        );
    }
}
