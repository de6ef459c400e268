// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A minimal TLS hello parser for the plaintext handshake carried by
//! QUIC Initial packets.
//!
//! Only metadata is extracted: handshake type and version, cipher
//! suites, SNI, ALPN, supported versions and the Google user-agent
//! transport parameter. GREASE values are filtered wherever the peer
//! may inject them.

use crate::varint::{decode_varint, decode_varint_length};
use core::fmt;
use flowprobe_codec::{DecoderBuffer, DecoderError};

pub const EXT_SERVER_NAME: u16 = 0;
pub const EXT_SUPPORTED_GROUPS: u16 = 10;
pub const EXT_ALPN: u16 = 16;
pub const EXT_SUPPORTED_VERSIONS: u16 = 43;
pub const EXT_QUIC_TRANSPORT_PARAMETERS_V1: u16 = 0x39;
pub const EXT_QUIC_TRANSPORT_PARAMETERS_V2: u16 = 0x26;
pub const EXT_QUIC_TRANSPORT_PARAMETERS_DRAFT: u16 = 0xffa5;

/// The QUIC transport parameter Google's stack uses for a user agent
const TRANSPORT_PARAMETER_USER_AGENT: u64 = 12585;

const MAX_SESSION_ID_LEN: usize = 32;
const RANDOM_LEN: usize = 32;
const MAX_LIST_ENTRIES: usize = 30;

/// Hello parsing failed; the packet contributes no TLS metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsError {
    Truncated,
    UnsupportedHandshake,
    UnsupportedVersion,
    Malformed,
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "hello truncated"),
            Self::UnsupportedHandshake => write!(f, "not a client or server hello"),
            Self::UnsupportedVersion => write!(f, "unsupported record version"),
            Self::Malformed => write!(f, "malformed hello"),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<DecoderError> for TlsError {
    fn from(error: DecoderError) -> Self {
        match error {
            DecoderError::UnexpectedEof(_) => Self::Truncated,
            DecoderError::InvariantViolation(_) => Self::Malformed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
}

/// Metadata extracted from one ClientHello / ServerHello
#[derive(Clone, Debug, Default)]
pub struct HelloSummary {
    pub handshake_type: Option<HandshakeType>,
    pub legacy_version: u16,
    pub cipher_suites: Vec<u16>,
    pub server_name: Option<String>,
    pub alpn: Vec<String>,
    pub supported_versions: Vec<u16>,
    pub user_agent: Option<String>,
    pub extension_types: Vec<u16>,
    pub extension_lengths: Vec<u16>,
}

impl HelloSummary {
    #[inline]
    pub fn is_client_hello(&self) -> bool {
        self.handshake_type == Some(HandshakeType::ClientHello)
    }
}

//= https://www.rfc-editor.org/rfc/rfc8701#section-3.1
//# GREASE values are of the form 0x?a?a, where the high nibbles match
pub fn is_grease(value: u16) -> bool {
    value != 0 && value & !0xfafa == 0 && value & 0x00ff == value >> 8
}

fn parse_server_name(extension: &[u8]) -> Result<Option<String>, TlsError> {
    let buffer = DecoderBuffer::new(extension);
    let (list_len, buffer) = buffer.decode_u16()?;
    let (list, _) = buffer.decode_slice(list_len as usize)?;

    let mut buffer = DecoderBuffer::new(list);
    while !buffer.is_empty() {
        let (name_type, rest) = buffer.decode_u8()?;
        let (name_len, rest) = rest.decode_u16()?;
        let (name, rest) = rest.decode_slice(name_len as usize)?;
        // host_name
        if name_type == 0 {
            return Ok(core::str::from_utf8(name).ok().map(str::to_owned));
        }
        buffer = rest;
    }
    Ok(None)
}

fn parse_alpn(extension: &[u8]) -> Result<Vec<String>, TlsError> {
    let buffer = DecoderBuffer::new(extension);
    let (list_len, buffer) = buffer.decode_u16()?;
    let (list, _) = buffer.decode_slice(list_len as usize)?;

    let mut protocols = Vec::new();
    let mut buffer = DecoderBuffer::new(list);
    while !buffer.is_empty() && protocols.len() < MAX_LIST_ENTRIES {
        let (len, rest) = buffer.decode_u8()?;
        let (name, rest) = rest.decode_slice(len as usize)?;
        if let Ok(name) = core::str::from_utf8(name) {
            protocols.push(name.to_owned());
        }
        buffer = rest;
    }
    Ok(protocols)
}

fn parse_supported_versions(
    extension: &[u8],
    handshake_type: HandshakeType,
) -> Result<Vec<u16>, TlsError> {
    let buffer = DecoderBuffer::new(extension);
    let mut versions = Vec::new();

    if handshake_type == HandshakeType::ServerHello {
        let (version, _) = buffer.decode_u16()?;
        versions.push(version);
        return Ok(versions);
    }

    let (len, buffer) = buffer.decode_u8()?;
    let (list, _) = buffer.decode_slice(len as usize)?;
    let mut buffer = DecoderBuffer::new(list);
    while !buffer.is_empty() && versions.len() < MAX_LIST_ENTRIES {
        let (version, rest) = buffer.decode_u16()?;
        if !is_grease(version) {
            versions.push(version);
        }
        buffer = rest;
    }
    Ok(versions)
}

/// Walks QUIC transport parameters looking for the Google user-agent
/// parameter.
fn parse_user_agent(extension: &[u8]) -> Option<String> {
    let mut buffer = DecoderBuffer::new(extension);
    while !buffer.is_empty() {
        let (id, rest) = decode_varint(buffer).ok()?;
        let (len, rest) = decode_varint_length(rest).ok()?;
        let (value, rest) = rest.decode_slice(len).ok()?;
        if id == TRANSPORT_PARAMETER_USER_AGENT {
            return core::str::from_utf8(value).ok().map(str::to_owned);
        }
        buffer = rest;
    }
    None
}

fn parse_cipher_suites(
    buffer: DecoderBuffer,
    handshake_type: HandshakeType,
) -> Result<(Vec<u16>, DecoderBuffer), TlsError> {
    let mut suites = Vec::new();

    if handshake_type == HandshakeType::ServerHello {
        let (suite, buffer) = buffer.decode_u16()?;
        suites.push(suite);
        return Ok((suites, buffer));
    }

    let (len, buffer) = buffer.decode_u16()?;
    let (list, buffer) = buffer.decode_slice(len as usize)?;
    let mut list = DecoderBuffer::new(list);
    while !list.is_empty() && suites.len() < MAX_LIST_ENTRIES {
        let (suite, rest) = list.decode_u16()?;
        if !is_grease(suite) {
            suites.push(suite);
        }
        list = rest;
    }
    Ok((suites, buffer))
}

/// Parses a ClientHello / ServerHello from reassembled QUIC CRYPTO
/// data (no TLS record layer).
pub fn parse_quic_hello(payload: &[u8]) -> Result<HelloSummary, TlsError> {
    let buffer = DecoderBuffer::new(payload);

    let (message_type, buffer) = buffer.decode_u8()?;
    let handshake_type = match message_type {
        1 => HandshakeType::ClientHello,
        2 => HandshakeType::ServerHello,
        _ => return Err(TlsError::UnsupportedHandshake),
    };

    let (_body_len, buffer) = buffer.decode_u24()?;
    let (legacy_version, buffer) = buffer.decode_u16()?;
    //= https://www.rfc-editor.org/rfc/rfc8446#section-4.1.2
    //# legacy_version:  In previous versions of TLS, this field was used for
    //#    version negotiation
    if legacy_version >> 8 != 3 {
        return Err(TlsError::UnsupportedVersion);
    }

    let buffer = buffer.skip(RANDOM_LEN)?;

    let (session_id_len, buffer) = buffer.decode_u8()?;
    if session_id_len as usize > MAX_SESSION_ID_LEN {
        return Err(TlsError::Malformed);
    }
    let buffer = buffer.skip(session_id_len as usize)?;

    let (cipher_suites, buffer) = parse_cipher_suites(buffer, handshake_type)?;

    // compression methods: length-prefixed list in a ClientHello, a
    // single byte in a ServerHello
    let buffer = match handshake_type {
        HandshakeType::ClientHello => {
            let (len, buffer) = buffer.decode_u8()?;
            buffer.skip(len as usize)?
        }
        HandshakeType::ServerHello => buffer.skip(1)?,
    };

    let (extensions_len, buffer) = buffer.decode_u16()?;
    let (extensions, _) = buffer.decode_slice(extensions_len as usize)?;

    let mut summary = HelloSummary {
        handshake_type: Some(handshake_type),
        legacy_version,
        cipher_suites,
        ..Default::default()
    };

    let mut buffer = DecoderBuffer::new(extensions);
    while !buffer.is_empty() {
        let (extension_type, rest) = buffer.decode_u16()?;
        let (extension_len, rest) = rest.decode_u16()?;
        let (payload, rest) = rest.decode_slice(extension_len as usize)?;
        buffer = rest;

        if summary.extension_types.len() < MAX_LIST_ENTRIES {
            summary.extension_types.push(extension_type);
            summary.extension_lengths.push(extension_len);
        }

        match extension_type {
            EXT_SERVER_NAME if !payload.is_empty() => {
                summary.server_name = parse_server_name(payload)?;
            }
            EXT_ALPN => {
                summary.alpn = parse_alpn(payload)?;
            }
            EXT_SUPPORTED_VERSIONS => {
                summary.supported_versions = parse_supported_versions(payload, handshake_type)?;
            }
            EXT_QUIC_TRANSPORT_PARAMETERS_V1
            | EXT_QUIC_TRANSPORT_PARAMETERS_V2
            | EXT_QUIC_TRANSPORT_PARAMETERS_DRAFT => {
                if summary.user_agent.is_none() {
                    summary.user_agent = parse_user_agent(payload);
                }
            }
            _ => {}
        }
    }

    Ok(summary)
}
