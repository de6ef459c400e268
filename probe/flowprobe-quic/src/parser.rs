// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-packet QUIC walk: coalesced long-header packets, Initial
//! decryption and TLS metadata extraction into the plugin context.

use crate::{
    frames::reassemble_crypto,
    header::{LongHeader, PacketType},
    initial::{decrypt_initial_packet, derive_initial_secrets},
    plugin::QuicContext,
    salt::initial_salt,
    tls::parse_quic_hello,
    varint::decode_varint_length,
};
use core::fmt;
use flowprobe_codec::DecoderBuffer;

/// Retry packets end in a 16-byte integrity tag
const RETRY_INTEGRITY_TAG_LEN: usize = 16;

/// Smallest buffer that can still hold a long header
const MIN_PACKET_SIZE: usize = 8;

/// The payload did not contribute QUIC data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Not a (supported) QUIC long-header packet
    NotQuic,
    /// Structurally QUIC, but decryption or TLS extraction failed
    Undecryptable,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotQuic => write!(f, "not a quic long-header payload"),
            Self::Undecryptable => write!(f, "quic payload could not be decrypted"),
        }
    }
}

impl std::error::Error for ParseError {}

fn parse_initial(
    context: &mut QuicContext,
    header: &LongHeader,
    buffer: DecoderBuffer,
) -> Option<usize> {
    let salt = initial_salt(&header.version)?;

    // token and length framing in front of the packet number
    let (token_len, rest) = decode_varint_length(buffer).ok()?;
    let rest = rest.skip(token_len).ok()?;
    let (payload_len, rest) = decode_varint_length(rest).ok()?;
    let pn_offset = buffer.len() - rest.len();
    let packet_len = pn_offset + payload_len;
    let packet = &buffer.as_slice()[..packet_len];

    let generation = header.version.generation;
    let decrypted = derive_initial_secrets(header.dcid, salt, generation)
        .ok()
        .and_then(|secrets| decrypt_initial_packet(packet, pn_offset, &secrets).ok())
        .or_else(|| {
            // a later Initial may carry a server-chosen DCID; the keys
            // are still derived from the first client DCID of the flow
            let initial_dcid = context.state.initial_dcid.as_deref()?;
            let secrets = derive_initial_secrets(initial_dcid, salt, generation).ok()?;
            decrypt_initial_packet(packet, pn_offset, &secrets).ok()
        })?;

    let crypto = reassemble_crypto(&decrypted.plaintext).ok()?;
    let hello = parse_quic_hello(&crypto).ok()?;

    if hello.is_client_hello() {
        context.client_hello_parsed = true;
        if context.state.initial_dcid.is_none() {
            context.state.initial_dcid = Some(header.dcid.to_vec());
        }
    }
    context.token_length = token_len as u64;
    if let Some(name) = hello.server_name {
        context.server_name = Some(name);
    }
    if let Some(agent) = hello.user_agent {
        context.user_agent = Some(agent);
    }
    if !hello.extension_types.is_empty() {
        context.extension_types = hello.extension_types;
        context.extension_lengths = hello.extension_lengths;
    }
    context.state.last_hello = hello.handshake_type;

    Some(packet_len)
}

/// Walks every coalesced long-header packet of one UDP payload and
/// folds the findings into the plugin context.
///
/// Returns `Ok(())` when at least one QUIC packet was recognized.
pub fn parse_quic_payload(context: &mut QuicContext, payload: &[u8]) -> Result<(), ParseError> {
    let mut buffer = DecoderBuffer::new(payload);
    let mut recognized = false;

    while buffer.len() >= MIN_PACKET_SIZE {
        let Ok((header, rest)) = LongHeader::decode(buffer) else {
            break;
        };

        let packet_type = header.packet_type();
        context.note_packet_type(packet_type);
        if recognized {
            context.coalesced_count = context.coalesced_count.saturating_add(1);
        }

        match packet_type {
            PacketType::VersionNegotiation => {
                recognized = true;
                break;
            }
            PacketType::Retry => {
                context.state.retry_count = context.state.retry_count.saturating_add(1);
                if rest.len() >= RETRY_INTEGRITY_TAG_LEN {
                    recognized = true;
                }
                break;
            }
            PacketType::Initial => {
                context.version = header.version.id;
                let Some(consumed) = parse_initial(context, &header, rest) else {
                    return if recognized {
                        Ok(())
                    } else {
                        Err(ParseError::Undecryptable)
                    };
                };
                recognized = true;
                buffer = rest.skip(consumed).expect("length checked during parse");
            }
            PacketType::ZeroRtt | PacketType::Handshake => {
                if packet_type == PacketType::ZeroRtt {
                    context.zero_rtt_count = context.zero_rtt_count.saturating_add(1);
                }
                let Ok((payload_len, rest)) = decode_varint_length(rest) else {
                    break;
                };
                recognized = true;
                buffer = rest.skip(payload_len).expect("length checked during parse");
            }
        }
    }

    if recognized {
        Ok(())
    } else {
        Err(ParseError::NotQuic)
    }
}
