//! Signing key pairs held by the agent process.

use ed25519_dalek::{Signer as _, SigningKey};
use secp256k1::{Message, Secp256k1, SecretKey};

use crate::crypto::{self, KeyAlgorithm, PublicKey};
use crate::error::Error;

/// A signing capability bundle.
///
/// `sign` follows the algorithm's native message semantics: secp256k1
/// hashes the message with SHA-256 and signs the digest (JWS `ES256K`),
/// Ed25519 signs the message bytes. [`PublicKey::verify`] mirrors this.
pub trait KeyPair: Send + Sync {
    /// Stable identifier derived from the public key.
    fn id(&self) -> String {
        let digest = crypto::sha256(&self.public_key().to_bytes());
        hex::encode(&digest[..8])
    }

    fn algorithm(&self) -> KeyAlgorithm;

    fn public_key(&self) -> PublicKey;

    /// Raw secret scalar / seed. Never transmitted.
    fn private_key_bytes(&self) -> Vec<u8>;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error>;

    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        self.public_key().verify(message, signature)
    }
}

/// Ed25519 key pair.
pub struct Ed25519KeyPair {
    signing_key: SigningKey,
}

impl Ed25519KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// Load from a 32-byte seed, or a 64-byte seed + public key blob.
    pub fn from_seed(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 32 && bytes.len() != 64 {
            return Err(Error::MalformedKey(format!(
                "Ed25519 private key must be 32 or 64 bytes, got {}",
                bytes.len()
            )));
        }
        let seed: [u8; 32] = bytes[..32]
            .try_into()
            .map_err(|_| Error::MalformedKey("invalid Ed25519 seed".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }
}

impl KeyPair for Ed25519KeyPair {
    fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::Ed25519
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::Ed25519(self.signing_key.verifying_key())
    }

    fn private_key_bytes(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

/// ECDSA secp256k1 key pair.
pub struct Secp256k1KeyPair {
    secret_key: SecretKey,
    public_key: secp256k1::PublicKey,
}

impl Secp256k1KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut secp256k1::rand::thread_rng());
        Self::from_secret_key(secret_key)
    }

    /// Load from a 32-byte secret scalar. A `0x`-prefixed hex string is
    /// accepted by [`Secp256k1KeyPair::from_hex`].
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| Error::MalformedKey(format!("secp256k1 secret key: {e}")))?;
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, Error> {
        let stripped = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let bytes = hex::decode(stripped)
            .map_err(|e| Error::MalformedKey(format!("secp256k1 secret key hex: {e}")))?;
        Self::from_secret_bytes(&bytes)
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = secp256k1::PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }
}

impl KeyPair for Secp256k1KeyPair {
    fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::Secp256k1
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::Secp256k1(self.public_key)
    }

    fn private_key_bytes(&self) -> Vec<u8> {
        self.secret_key.secret_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        let msg = Message::from_digest(crypto::sha256(message));
        let sig = Secp256k1::signing_only().sign_ecdsa(&msg, &self.secret_key);
        Ok(sig.serialize_compact().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_rfc8032_vector() {
        let seed = hex::decode("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60")
            .unwrap();
        let kp = Ed25519KeyPair::from_seed(&seed).unwrap();
        let sig = kp.sign(b"").unwrap();
        let expected = "e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e065224901555fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b";
        assert_eq!(hex::encode(sig), expected);
    }

    #[test]
    fn ed25519_sign_verify() {
        let kp = Ed25519KeyPair::generate();
        let sig = kp.sign(b"hello").unwrap();
        assert!(kp.verify(b"hello", &sig).is_ok());
        assert!(kp.verify(b"hellO", &sig).is_err());
    }

    #[test]
    fn secp256k1_sign_verify() {
        let kp = Secp256k1KeyPair::generate();
        let sig = kp.sign(b"hello").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(kp.verify(b"hello", &sig).is_ok());
        assert!(matches!(
            kp.verify(b"other", &sig),
            Err(Error::InvalidSignature(_))
        ));
    }

    #[test]
    fn secp256k1_accepts_der_encoded_signature() {
        let kp = Secp256k1KeyPair::generate();
        let compact = kp.sign(b"payload").unwrap();
        let der = secp256k1::ecdsa::Signature::from_compact(&compact)
            .unwrap()
            .serialize_der();
        assert!(kp.verify(b"payload", &der).is_ok());
    }

    #[test]
    fn secp256k1_from_hex_roundtrip() {
        let kp = Secp256k1KeyPair::generate();
        let hex_key = format!("0x{}", hex::encode(kp.private_key_bytes()));
        let loaded = Secp256k1KeyPair::from_hex(&hex_key).unwrap();
        assert_eq!(loaded.public_key(), kp.public_key());
        assert_eq!(loaded.id(), kp.id());
    }

    #[test]
    fn ed25519_rejects_bad_seed_length() {
        assert!(matches!(
            Ed25519KeyPair::from_seed(&[0u8; 10]),
            Err(Error::MalformedKey(_))
        ));
    }
}
