// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! QUIC Initial decryption and TLS hello metadata extraction.
//!
//! Initial packets are decrypted purely to recover the plaintext
//! ClientHello / ServerHello; the keys are public by construction
//! (RFC 9001 §5.2 derives them from the client's destination
//! connection id), so this is protocol dissection, not an attack
//! surface.

#[cfg(not(target_os = "windows"))]
pub(crate) use aws_lc_rs as ring;
#[cfg(target_os = "windows")]
pub(crate) use ::ring;

mod frames;
mod header;
mod initial;
mod parser;
mod plugin;
mod salt;
mod tls;
mod varint;
mod version;

pub use frames::{reassemble_crypto, FrameError};
pub use header::{LongHeader, PacketType};
pub use initial::{
    decrypt_initial_packet, derive_initial_secrets, CryptoError, DecryptedInitial, InitialSecrets,
    EXAMPLE_CLIENT_INITIAL_PACKET,
};
pub use parser::{parse_quic_payload, ParseError};
pub use plugin::{QuicContext, QuicPlugin};
pub use salt::initial_salt;
pub use tls::{parse_quic_hello, HandshakeType, HelloSummary, TlsError};
pub use varint::{decode_varint, decode_varint_length};
pub use version::{Generation, Version};

/// Longest connection id accepted from a long header
pub const MAX_CONNECTION_ID_LENGTH: usize = 20;
