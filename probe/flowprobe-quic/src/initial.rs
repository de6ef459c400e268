// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! RFC 9001 §5.2 Initial-packet cryptography: key schedule, header
//! unprotection and AEAD payload decryption.

use crate::{ring::aead, ring::hkdf, version::Generation};
use core::fmt;

/// AES-128 key length
const KEY_LEN: usize = 16;
/// TLS 1.3 AEAD nonce length
const IV_LEN: usize = 12;
/// Header-protection key length
const HP_LEN: usize = 16;
/// SHA-256 output length
const SECRET_LEN: usize = 32;
/// AEAD auth tag length
const TAG_LEN: usize = 16;
/// Header-protection sample length
pub const SAMPLE_LEN: usize = 16;

/// Initial-packet decryption failed; affects only the current parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// Key derivation failed
    Derive,
    /// Header protection could not be removed
    HeaderProtection,
    /// AEAD open failed (auth tag mismatch or malformed payload)
    Aead,
    /// The packet is shorter than its framing claims
    Truncated,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Derive => write!(f, "initial secret derivation failed"),
            Self::HeaderProtection => write!(f, "header protection removal failed"),
            Self::Aead => write!(f, "payload decryption failed"),
            Self::Truncated => write!(f, "packet truncated"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// The client-side Initial keys of one connection id
pub struct InitialSecrets {
    pub key: [u8; KEY_LEN],
    pub iv: [u8; IV_LEN],
    pub hp: [u8; HP_LEN],
}

//= https://www.rfc-editor.org/rfc/rfc8446#section-7.1
//# HKDF-Expand-Label(Secret, Label, Context, Length) =
//#      HKDF-Expand(Secret, HkdfLabel, Length)
//#
//# Where HkdfLabel is specified as:
//#
//# struct {
//#     uint16 length = Length;
//#     opaque label<7..255> = "tls13 " + Label;
//#     opaque context<0..255> = Context;
//# } HkdfLabel;

/// Serializes the `HkdfLabel` structure for a given output length
pub(crate) fn compute_label(len: usize, label: &[u8]) -> Vec<u8> {
    const TLS_LABEL: &[u8] = b"tls13 ";
    let label_len = TLS_LABEL.len() + label.len();
    debug_assert!(label_len <= u8::MAX as usize, "label is too long");

    let mut out = Vec::with_capacity(4 + label_len);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.push(label_len as u8);
    out.extend_from_slice(TLS_LABEL);
    out.extend_from_slice(label);
    out.push(0);
    out
}

struct OkmLen(usize);

impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

fn expand_label(prk: &hkdf::Prk, label: &[u8], out: &mut [u8]) -> Result<(), CryptoError> {
    let info = compute_label(out.len(), label);
    let info_slice = [info.as_slice()];
    let okm = prk
        .expand(&info_slice, OkmLen(out.len()))
        .map_err(|_| CryptoError::Derive)?;
    okm.fill(out).map_err(|_| CryptoError::Derive)
}

/// Derives the client Initial key, IV and header-protection key from
/// the client's destination connection id.
///
//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# initial_secret = HKDF-Extract(initial_salt,
//#                               client_dst_connection_id)
//#
//# client_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "client in", "",
//#                                           Hash.length)
pub fn derive_initial_secrets(
    client_dcid: &[u8],
    salt: &[u8],
    generation: Generation,
) -> Result<InitialSecrets, CryptoError> {
    let initial_secret = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(client_dcid);

    let mut client_secret = [0u8; SECRET_LEN];
    expand_label(&initial_secret, b"client in", &mut client_secret)?;
    let client = hkdf::Prk::new_less_safe(hkdf::HKDF_SHA256, &client_secret);

    // v2 renamed the traffic-key labels, the "client in" stage is shared
    let (key_label, iv_label, hp_label): (&[u8], &[u8], &[u8]) = match generation {
        Generation::V2 => (b"quicv2 key", b"quicv2 iv", b"quicv2 hp"),
        _ => (b"quic key", b"quic iv", b"quic hp"),
    };

    let mut secrets = InitialSecrets {
        key: [0; KEY_LEN],
        iv: [0; IV_LEN],
        hp: [0; HP_LEN],
    };
    expand_label(&client, key_label, &mut secrets.key)?;
    expand_label(&client, iv_label, &mut secrets.iv)?;
    expand_label(&client, hp_label, &mut secrets.hp)?;
    Ok(secrets)
}

//= https://tools.ietf.org/id/draft-ietf-quic-tls-32.txt#A.2
//# The resulting protected packet is:
//#
//# cdff000020088394c8f03e5157080000 449e9cdb990bfb66bc6a93032b50dd89
//# ...

/// The protected client Initial of draft-ietf-quic-tls-32 appendix
/// A.2: DCID `8394c8f03e515708`, a ClientHello with SNI `example.com`.
pub const EXAMPLE_CLIENT_INITIAL_PACKET: [u8; 1200] = hex_literal::hex!(
    "
   cdff000020088394c8f03e5157080000 449e9cdb990bfb66bc6a93032b50dd89
   73972d149421874d3849e3708d71354e a33bcdc356f3ea6e2a1a1bd7c3d14003
   8d3e784d04c30a2cdb40c32523aba2da fe1c1bf3d27a6be38fe38ae033fbb071
   3c1c73661bb6639795b42b97f77068ea d51f11fbf9489af2501d09481e6c64d4
   b8551cd3cea70d830ce2aeeec789ef55 1a7fbe36b3f7e1549a9f8d8e153b3fac
   3fb7b7812c9ed7c20b4be190ebd89956 26e7f0fc887925ec6f0606c5d36aa81b
   ebb7aacdc4a31bb5f23d55faef5c5190 5783384f375a43235b5c742c78ab1bae
   0a188b75efbde6b3774ed61282f9670a 9dea19e1566103ce675ab4e21081fb58
   60340a1e88e4f10e39eae25cd685b109 29636d4f02e7fad2a5a458249f5c0298
   a6d53acbe41a7fc83fa7cc01973f7a74 d1237a51974e097636b6203997f921d0
   7bc1940a6f2d0de9f5a11432946159ed 6cc21df65c4ddd1115f86427259a196c
   7148b25b6478b0dc7766e1c4d1b1f515 9f90eabc61636226244642ee148b464c
   9e619ee50a5e3ddc836227cad938987c 4ea3c1fa7c75bbf88d89e9ada642b2b8
   8fe8107b7ea375b1b64889a4e9e5c38a 1c896ce275a5658d250e2d76e1ed3a34
   ce7e3a3f383d0c996d0bed106c2899ca 6fc263ef0455e74bb6ac1640ea7bfedc
   59f03fee0e1725ea150ff4d69a7660c5 542119c71de270ae7c3ecfd1af2c4ce5
   51986949cc34a66b3e216bfe18b347e6 c05fd050f85912db303a8f054ec23e38
   f44d1c725ab641ae929fecc8e3cefa56 19df4231f5b4c009fa0c0bbc60bc75f7
   6d06ef154fc8577077d9d6a1d2bd9bf0 81dc783ece60111bea7da9e5a9748069
   d078b2bef48de04cabe3755b197d52b3 2046949ecaa310274b4aac0d008b1948
   c1082cdfe2083e386d4fd84c0ed0666d 3ee26c4515c4fee73433ac703b690a9f
   7bf278a77486ace44c489a0c7ac8dfe4 d1a58fb3a730b993ff0f0d61b4d89557
   831eb4c752ffd39c10f6b9f46d8db278 da624fd800e4af85548a294c1518893a
   8778c4f6d6d73c93df200960104e062b 388ea97dcf4016bced7f62b4f062cb6c
   04c20693d9a0e3b74ba8fe74cc012378 84f40d765ae56a51688d985cf0ceaef4
   3045ed8c3f0c33bced08537f6882613a cd3b08d665fce9dd8aa73171e2d3771a
   61dba2790e491d413d93d987e2745af2 9418e428be34941485c93447520ffe23
   1da2304d6a0fd5d07d08372202369661 59bef3cf904d722324dd852513df39ae
   030d8173908da6364786d3c1bfcb19ea 77a63b25f1e7fc661def480c5d00d444
   56269ebd84efd8e3a8b2c257eec76060 682848cbf5194bc99e49ee75e4d0d254
   bad4bfd74970c30e44b65511d4ad0e6e c7398e08e01307eeeea14e46ccd87cf3
   6b285221254d8fc6a6765c524ded0085 dca5bd688ddf722e2c0faf9d0fb2ce7a
   0c3f2cee19ca0ffba461ca8dc5d2c817 8b0762cf67135558494d2a96f1a139f0
   edb42d2af89a9c9122b07acbc29e5e72 2df8615c343702491098478a389c9872
   a10b0c9875125e257c7bfdf27eef4060 bd3d00f4c14fd3e3496c38d3c5d1a566
   8c39350effbc2d16ca17be4ce29f02ed 969504dda2a8c6b9ff919e693ee79e09
   089316e7d1d89ec099db3b2b268725d8 88536a4b8bf9aee8fb43e82a4d919d48
   b5a464ca5b62df3be35ee0d0a2ec68f3
    "
);

/// A successfully decrypted Initial packet
#[derive(Debug)]
pub struct DecryptedInitial {
    /// The decrypted frame payload (auth tag removed)
    pub plaintext: Vec<u8>,
    pub packet_number: u32,
    /// Unprotected header length, including the packet number field
    pub header_len: usize,
}

/// Removes header protection and opens the AEAD payload of one Initial
/// packet.
///
/// `packet` spans from the first header byte through the end of this
/// packet (as declared by its length field); `pn_offset` is the offset
/// of the protected packet-number field.
pub fn decrypt_initial_packet(
    packet: &[u8],
    pn_offset: usize,
    secrets: &InitialSecrets,
) -> Result<DecryptedInitial, CryptoError> {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
    //# in sampling packet ciphertext for header protection, the Packet Number field is
    //# assumed to be 4 bytes long
    let sample_start = pn_offset + 4;
    let sample = packet
        .get(sample_start..sample_start + SAMPLE_LEN)
        .ok_or(CryptoError::Truncated)?;

    let hp_key = aead::quic::HeaderProtectionKey::new(&aead::quic::AES_128, &secrets.hp)
        .map_err(|_| CryptoError::HeaderProtection)?;
    let mask = hp_key
        .new_mask(sample)
        .map_err(|_| CryptoError::HeaderProtection)?;

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
    //# pn_length = (packet[0] & 0x03) + 1
    let first = packet[0] ^ (mask[0] & 0x0f);
    let pn_len = (first & 0x03) as usize + 1;
    let header_len = pn_offset + pn_len;
    if header_len + TAG_LEN >= packet.len() {
        return Err(CryptoError::Truncated);
    }

    let mut header = packet[..header_len].to_vec();
    header[0] = first;
    let mut packet_number = 0u32;
    for index in 0..pn_len {
        let byte = packet[pn_offset + index] ^ mask[1 + index];
        header[pn_offset + index] = byte;
        packet_number = (packet_number << 8) | byte as u32;
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.3
    //# The exclusive OR of the padded packet number and the IV forms the
    //# AEAD nonce.
    let mut nonce = secrets.iv;
    for (index, byte) in packet_number.to_be_bytes().iter().enumerate() {
        nonce[IV_LEN - 4 + index] ^= byte;
    }

    let key = aead::LessSafeKey::new(
        aead::UnboundKey::new(&aead::AES_128_GCM, &secrets.key).map_err(|_| CryptoError::Aead)?,
    );
    let mut payload = packet[header_len..].to_vec();
    let plaintext_len = key
        .open_in_place(
            aead::Nonce::assume_unique_for_key(nonce),
            aead::Aad::from(header.as_slice()),
            &mut payload,
        )
        .map_err(|_| CryptoError::Aead)?
        .len();
    payload.truncate(plaintext_len);

    Ok(DecryptedInitial {
        plaintext: payload,
        packet_number,
        header_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salt::{SALT_DRAFT_29, SALT_V1};
    use hex_literal::hex;

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //# client in:  00200f746c73313320636c69656e7420696e00
    const CLIENT_IN: [u8; 19] = hex!("00200f746c73313320636c69656e7420696e00");

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //# quic key:  00100e746c7331332071756963206b657900
    const QUIC_KEY_16: [u8; 18] = hex!("00100e746c7331332071756963206b657900");

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //# quic iv:  000c0d746c733133207175696320697600
    const QUIC_IV_12: [u8; 17] = hex!("000c0d746c733133207175696320697600");

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //# quic hp:  00100d746c733133207175696320687000
    const QUIC_HP_16: [u8; 17] = hex!("00100d746c733133207175696320687000");

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //# These packets use an 8-byte client-chosen Destination Connection ID
    //# of 0x8394c8f03e515708.
    const EXAMPLE_DCID: [u8; 8] = hex!("8394c8f03e515708");

    #[test]
    fn label_serialization_matches_rfc_9001() {
        assert_eq!(compute_label(32, b"client in"), CLIENT_IN);
        assert_eq!(compute_label(16, b"quic key"), QUIC_KEY_16);
        assert_eq!(compute_label(12, b"quic iv"), QUIC_IV_12);
        assert_eq!(compute_label(16, b"quic hp"), QUIC_HP_16);
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //# key = HKDF-Expand-Label(client_initial_secret, "quic key", "", 16)
    //#     = 1f369613dd76d5467730efcbe3b1a22d
    //#
    //# iv  = HKDF-Expand-Label(client_initial_secret, "quic iv", "", 12)
    //#     = fa044b2f42a3fd3b46fb255c
    //#
    //# hp  = HKDF-Expand-Label(client_initial_secret, "quic hp", "", 16)
    //#     = 9f50449e04a0e810283a1e9933adedd2
    #[test]
    fn v1_key_schedule_matches_rfc_9001() {
        let secrets =
            derive_initial_secrets(&EXAMPLE_DCID, &SALT_V1, Generation::V1).unwrap();
        assert_eq!(secrets.key, hex!("1f369613dd76d5467730efcbe3b1a22d"));
        assert_eq!(secrets.iv, hex!("fa044b2f42a3fd3b46fb255c"));
        assert_eq!(secrets.hp, hex!("9f50449e04a0e810283a1e9933adedd2"));
    }

    //= https://tools.ietf.org/id/draft-ietf-quic-tls-32.txt#A.2
    //# The unprotected header includes the connection ID and a 4 byte packet
    //# number encoding for a packet number of 2:
    //#
    //# c3ff000020088394c8f03e5157080000449e00000002
    #[test]
    fn draft_32_header_unprotection() {
        let secrets =
            derive_initial_secrets(&EXAMPLE_DCID, &SALT_DRAFT_29, Generation::V0).unwrap();
        let packet = EXAMPLE_CLIENT_INITIAL_PACKET;
        let decrypted = decrypt_initial_packet(&packet, 18, &secrets).unwrap();
        assert_eq!(decrypted.packet_number, 2);
        assert_eq!(decrypted.header_len, 22);
        assert_eq!(decrypted.plaintext.len(), 1162);
        // the payload opens with the ClientHello CRYPTO frame
        assert_eq!(&decrypted.plaintext[..4], &hex!("060040f1"));
    }

    #[test]
    fn corrupted_packet_is_rejected() {
        let secrets =
            derive_initial_secrets(&EXAMPLE_DCID, &SALT_DRAFT_29, Generation::V0).unwrap();
        let mut packet = EXAMPLE_CLIENT_INITIAL_PACKET;
        let last = packet.len() - 1;
        packet[last] ^= 0xff;
        assert_eq!(
            decrypt_initial_packet(&packet, 18, &secrets).unwrap_err(),
            CryptoError::Aead
        );
    }
}
