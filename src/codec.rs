//! Translation between algorithm-neutral wire bytes and algorithm-specific
//! public key and signature layouts.
//!
//! Signing back-ends disagree on how an ECDSA signature is laid out: some
//! emit fixed-width `r || s`, Ethereum tooling appends a recovery byte, and
//! others produce ASN.1 DER. Everything is normalized to 64-byte `r || s`
//! before it reaches the verifier.

use ed25519_dalek::VerifyingKey;
use secp256k1::ecdsa;

use crate::crypto::{KeyAlgorithm, PublicKey};
use crate::error::Error;

/// Width of each ECDSA scalar in the fixed layout.
const SCALAR_LEN: usize = 32;

const DER_SEQUENCE: u8 = 0x30;

/// Decode raw public key bytes for the given algorithm.
///
/// - secp256k1: SEC1 compressed (33 bytes), uncompressed (65 bytes), or bare
///   `x || y` (64 bytes).
/// - Ed25519: exactly 32 bytes.
/// - X25519: exactly 32 bytes.
pub fn decode_public_key(bytes: &[u8], algorithm: KeyAlgorithm) -> Result<PublicKey, Error> {
    match algorithm {
        KeyAlgorithm::Secp256k1 => {
            let key = if bytes.len() == 64 {
                let mut uncompressed = Vec::with_capacity(65);
                uncompressed.push(0x04);
                uncompressed.extend_from_slice(bytes);
                secp256k1::PublicKey::from_slice(&uncompressed)
            } else {
                secp256k1::PublicKey::from_slice(bytes)
            }
            .map_err(|e| Error::MalformedKey(format!("secp256k1: {e}")))?;
            Ok(PublicKey::Secp256k1(key))
        }
        KeyAlgorithm::Ed25519 => {
            let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                Error::MalformedKey(format!("Ed25519 key must be 32 bytes, got {}", bytes.len()))
            })?;
            let key = VerifyingKey::from_bytes(&arr)
                .map_err(|e| Error::MalformedKey(format!("Ed25519: {e}")))?;
            Ok(PublicKey::Ed25519(key))
        }
        KeyAlgorithm::X25519 => {
            let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                Error::MalformedKey(format!("X25519 key must be 32 bytes, got {}", bytes.len()))
            })?;
            Ok(PublicKey::X25519(arr))
        }
    }
}

/// Decode raw public key bytes given a registry algorithm tag.
///
/// Fails with [`Error::UnsupportedAlgorithm`] for unknown tags.
pub fn decode_public_key_tagged(bytes: &[u8], tag: &str) -> Result<PublicKey, Error> {
    decode_public_key(bytes, tag.parse()?)
}

/// Normalize signature bytes into the fixed layout for `algorithm`.
///
/// ECDSA accepts 64-byte `r || s` (returned unchanged), 65-byte
/// `r || s || v` (recovery byte dropped), or ASN.1 DER. Ed25519 signatures
/// pass through untouched.
pub fn normalize_signature(bytes: &[u8], algorithm: KeyAlgorithm) -> Result<Vec<u8>, Error> {
    match algorithm {
        KeyAlgorithm::Secp256k1 => match bytes.len() {
            64 => Ok(bytes.to_vec()),
            65 => Ok(bytes[..64].to_vec()),
            _ if bytes.first() == Some(&DER_SEQUENCE) => der_to_fixed(bytes),
            n => Err(Error::MalformedSignature(format!(
                "unexpected ECDSA signature length {n}"
            ))),
        },
        KeyAlgorithm::Ed25519 => Ok(bytes.to_vec()),
        KeyAlgorithm::X25519 => Err(Error::UnsupportedAlgorithm(
            "x25519 keys do not produce signatures".into(),
        )),
    }
}

/// Unmarshal `SEQUENCE { INTEGER r, INTEGER s }` into `r || s`.
///
/// Truncated input, non-minimal padding and trailing bytes fail parsing.
/// libsecp256k1 decodes a negative or out-of-range scalar as zero, so any
/// zero half is rejected here.
fn der_to_fixed(der: &[u8]) -> Result<Vec<u8>, Error> {
    let sig = ecdsa::Signature::from_der(der)
        .map_err(|e| Error::MalformedSignature(format!("DER: {e}")))?;
    let compact = sig.serialize_compact();
    let (r, s) = compact.split_at(SCALAR_LEN);
    for (name, scalar) in [("r", r), ("s", s)] {
        if scalar.iter().all(|b| *b == 0) {
            return Err(Error::MalformedSignature(format!(
                "{name} is not in 1..n"
            )));
        }
    }
    Ok(compact.to_vec())
}
