// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Version-specific initial salts.
//!
//! Every draft generation changed the salt; decrypting an Initial
//! requires the salt matching the version the client sent.

use crate::version::{Generation, Version};
use hex_literal::hex;

/// drafts 7-9
pub const SALT_DRAFT_7: [u8; 20] = hex!("afc824ec5fc77eca1e9d36f37fb2d46518c36639");

/// drafts 10-16
pub const SALT_DRAFT_10: [u8; 20] = hex!("9c108f98520a5c5c32968e950e8a2c5fe06d6c38");

/// drafts 17-20
pub const SALT_DRAFT_17: [u8; 20] = hex!("ef4fb0abb47470c41befcf8031334fae485e09a0");

/// drafts 21-22
pub const SALT_DRAFT_21: [u8; 20] = hex!("7fbcdb0e7c66bbe9193a96cd21519ebd7a02644a");

/// drafts 23-28
pub const SALT_DRAFT_23: [u8; 20] = hex!("c3eef712c72ebb5a11a7d2432bb46365bef9f502");

//= https://tools.ietf.org/id/draft-ietf-quic-tls-32.txt#5.2
//# initial_salt = 0xafbfec289993d24c9e9786f19c6111e04390a899
pub const SALT_DRAFT_29: [u8; 20] = hex!("afbfec289993d24c9e9786f19c6111e04390a899");

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_salt = 0x38762cf7f55934b34d179ae6a4c80cadccbb7f0a
pub const SALT_V1: [u8; 20] = hex!("38762cf7f55934b34d179ae6a4c80cadccbb7f0a");

/// QUIC v2, provisional (draft-ietf-quic-v2-00)
pub const SALT_V2_PROVISIONAL: [u8; 20] = hex!("a707c203a59b47184a1d62ca570406ea7ae3e5d3");

//= https://www.rfc-editor.org/rfc/rfc9369#section-3.3.1
//# initial_salt = 0x0dede3def700a6db819381be6e269dcbf9bd2ed9
pub const SALT_V2: [u8; 20] = hex!("0dede3def700a6db819381be6e269dcbf9bd2ed9");

/// picoquic internal versions
pub const SALT_PICOQUIC: [u8; 20] = hex!("306716d76375d5554b2f605eef78d8333dc1ca36");

/// The initial salt for a classified version, or `None` when the
/// version cannot be decrypted.
pub fn initial_salt(version: &Version) -> Option<&'static [u8; 20]> {
    if version.is_negotiation() {
        return None;
    }
    if version.generation != Generation::V2 && version.id == crate::version::QUIC_V1 {
        return Some(&SALT_V1);
    }
    if version.draft == 0 {
        return None;
    }

    if version.generation == Generation::V2 {
        return match version.draft {
            ..=100 => Some(&SALT_V2_PROVISIONAL),
            101 => Some(&SALT_V2),
            _ => None,
        };
    }

    match version.draft {
        1..=9 => Some(&SALT_DRAFT_7),
        10..=16 => Some(&SALT_DRAFT_10),
        17..=20 => Some(&SALT_DRAFT_17),
        21..=22 => Some(&SALT_DRAFT_21),
        23..=28 => Some(&SALT_DRAFT_23),
        29..=32 => Some(&SALT_DRAFT_29),
        33..=35 => Some(&SALT_V1),
        36 => Some(&SALT_PICOQUIC),
        _ => None,
    }
}
