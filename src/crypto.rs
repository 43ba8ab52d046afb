//! Hashing, encoding, and the algorithm-tagged public key type.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use secp256k1::{ecdsa, Message, Secp256k1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec;
use crate::error::Error;

/// Key algorithm families an agent may register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// ECDSA over secp256k1 (Ethereum-style chains).
    Secp256k1,
    /// Ed25519 (Solana-style chains).
    Ed25519,
    /// X25519 key-encapsulation key. Cannot sign.
    X25519,
}

impl KeyAlgorithm {
    /// The registry tag for this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secp256k1 => "secp256k1",
            Self::Ed25519 => "ed25519",
            Self::X25519 => "x25519",
        }
    }

    /// Value written to the `alg` parameter of `Signature-Input`.
    pub fn http_signature_alg(&self) -> Option<&'static str> {
        match self {
            Self::Secp256k1 => Some("es256k"),
            Self::Ed25519 => Some("ed25519"),
            Self::X25519 => None,
        }
    }

    /// Map an `alg` parameter back to the algorithm that produced it.
    pub fn from_http_signature_alg(alg: &str) -> Option<Self> {
        match alg.to_ascii_lowercase().as_str() {
            "es256k" | "ecdsa-secp256k1" | "ecdsa-secp256k1-sha256" => Some(Self::Secp256k1),
            "ed25519" | "eddsa" => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// Value written to the `alg` field of a JWS header.
    pub fn jws_alg(&self) -> Option<&'static str> {
        match self {
            Self::Secp256k1 => Some("ES256K"),
            Self::Ed25519 => Some("EdDSA"),
            Self::X25519 => None,
        }
    }

    /// Map a JWS `alg` back to a key algorithm.
    pub fn from_jws_alg(alg: &str) -> Option<Self> {
        match alg {
            "ES256K" => Some(Self::Secp256k1),
            "EdDSA" => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// Whether keys of this family can produce signatures.
    pub fn can_sign(&self) -> bool {
        !matches!(self, Self::X25519)
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" | "ecdsa" | "ecdsa-secp256k1" => Ok(Self::Secp256k1),
            "ed25519" => Ok(Self::Ed25519),
            "x25519" | "kem" | "hpke" => Ok(Self::X25519),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// A public key together with the algorithm it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Secp256k1(secp256k1::PublicKey),
    Ed25519(VerifyingKey),
    X25519([u8; 32]),
}

impl PublicKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::Secp256k1(_) => KeyAlgorithm::Secp256k1,
            Self::Ed25519(_) => KeyAlgorithm::Ed25519,
            Self::X25519(_) => KeyAlgorithm::X25519,
        }
    }

    /// Raw wire bytes (SEC1 compressed for secp256k1).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Secp256k1(key) => key.serialize().to_vec(),
            Self::Ed25519(key) => key.to_bytes().to_vec(),
            Self::X25519(key) => key.to_vec(),
        }
    }

    /// Verify `signature` over `message`.
    ///
    /// secp256k1 hashes the message with SHA-256 before checking the ECDSA
    /// signature and accepts any layout [`codec::normalize_signature`] does.
    /// Ed25519 verifies the message bytes directly.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        match self {
            Self::Secp256k1(key) => {
                let compact = codec::normalize_signature(signature, KeyAlgorithm::Secp256k1)?;
                let mut sig = ecdsa::Signature::from_compact(&compact)
                    .map_err(|e| Error::MalformedSignature(format!("secp256k1: {e}")))?;
                sig.normalize_s();
                let msg = Message::from_digest(sha256(message));
                Secp256k1::verification_only()
                    .verify_ecdsa(&msg, &sig, key)
                    .map_err(|_| Error::InvalidSignature("secp256k1 verification failed".into()))
            }
            Self::Ed25519(key) => {
                let sig_arr: [u8; 64] = signature.try_into().map_err(|_| {
                    Error::MalformedSignature(format!(
                        "Ed25519 signature must be 64 bytes, got {}",
                        signature.len()
                    ))
                })?;
                let sig = Ed25519Signature::from_bytes(&sig_arr);
                key.verify(message, &sig)
                    .map_err(|_| Error::InvalidSignature("Ed25519 verification failed".into()))
            }
            Self::X25519(_) => Err(Error::UnsupportedAlgorithm(
                "x25519 keys cannot verify signatures".into(),
            )),
        }
    }
}

/// Compute the SHA-256 digest of the given data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compute the SHA-256 hex digest of the given data.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Encode bytes as standard base64 (with padding), as used in structured headers.
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard base64.
pub fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(data)
}

/// Encode bytes as base64url (no padding).
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode base64url (no padding) to bytes.
pub fn base64url_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data)
}
