// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    version::{Generation, Version},
    MAX_CONNECTION_ID_LENGTH,
};
use flowprobe_codec::{DecoderBuffer, DecoderError};

/// Long-header packet types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
    VersionNegotiation,
}

/// A parsed QUIC long header, up to and including the source
/// connection id
#[derive(Clone, Copy, Debug)]
pub struct LongHeader<'a> {
    pub first_byte: u8,
    pub version: Version,
    pub dcid: &'a [u8],
    pub scid: &'a [u8],
    /// Bytes consumed by the long header itself
    pub len: usize,
}

impl<'a> LongHeader<'a> {
    /// Parses a long header from the start of a UDP payload.
    ///
    /// The QUIC bit is required except for version negotiation, where
    /// it carries no meaning.
    pub fn decode(buffer: DecoderBuffer<'a>) -> Result<(Self, DecoderBuffer<'a>), DecoderError> {
        let total = buffer.len();
        let (first_byte, buffer) = buffer.decode_u8()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
        //# Header Form:  The most significant bit (0x80) of byte 0 (the first
        //#    byte) is set to 1 for long headers.
        if first_byte & 0x80 == 0 {
            return Err(DecoderError::InvariantViolation("not a long header"));
        }

        let (version_id, buffer) = buffer.decode_u32()?;
        let version = Version::new(version_id);

        if first_byte & 0x40 == 0 && !version.is_negotiation() {
            return Err(DecoderError::InvariantViolation("QUIC bit not set"));
        }

        let (dcid_len, buffer) = buffer.decode_u8()?;
        let (dcid, buffer) = buffer.decode_slice(dcid_len as usize)?;
        let (scid_len, buffer) = buffer.decode_u8()?;
        let (scid, buffer) = buffer.decode_slice(scid_len as usize)?;

        if dcid.len() > MAX_CONNECTION_ID_LENGTH || scid.len() > MAX_CONNECTION_ID_LENGTH {
            return Err(DecoderError::InvariantViolation("connection id too long"));
        }

        let header = Self {
            first_byte,
            version,
            dcid,
            scid,
            len: total - buffer.len(),
        };
        Ok((header, buffer))
    }

    /// The packet type encoded in bits 4-5, which v2 permuted
    pub fn packet_type(&self) -> PacketType {
        if self.version.is_negotiation() {
            return PacketType::VersionNegotiation;
        }

        let bits = (self.first_byte & 0b0011_0000) >> 4;
        if self.version.generation != Generation::V2 {
            match bits {
                0b00 => PacketType::Initial,
                0b01 => PacketType::ZeroRtt,
                0b10 => PacketType::Handshake,
                _ => PacketType::Retry,
            }
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9369#section-3.2
            //# Initial: 0b01, 0-RTT: 0b10, Handshake: 0b11, Retry: 0b00
            match bits {
                0b01 => PacketType::Initial,
                0b10 => PacketType::ZeroRtt,
                0b11 => PacketType::Handshake,
                _ => PacketType::Retry,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn parses_the_draft_32_client_header() {
        let bytes = hex!("cdff000020088394c8f03e51570800");
        let (header, remaining) = LongHeader::decode(DecoderBuffer::new(&bytes)).unwrap();
        assert_eq!(header.version.id, 0xff00_0020);
        assert_eq!(header.dcid, hex!("8394c8f03e515708"));
        assert!(header.scid.is_empty());
        assert_eq!(header.len, 15);
        assert_eq!(header.packet_type(), PacketType::Initial);
        assert_eq!(remaining.len(), 0);
    }

    #[test]
    fn short_headers_are_rejected() {
        let bytes = hex!("4d00000001");
        assert!(LongHeader::decode(DecoderBuffer::new(&bytes)).is_err());
    }

    #[test]
    fn v2_type_bits_are_permuted() {
        // v2 Initial uses type bits 0b01
        let mut bytes = hex!("d06b3343cf0000").to_vec();
        let (header, _) = LongHeader::decode(DecoderBuffer::new(&bytes)).unwrap();
        assert_eq!(header.packet_type(), PacketType::Initial);

        // the same bits mean 0-RTT in v1
        bytes[1..5].copy_from_slice(&hex!("00000001"));
        let (header, _) = LongHeader::decode(DecoderBuffer::new(&bytes)).unwrap();
        assert_eq!(header.packet_type(), PacketType::ZeroRtt);
    }
}
