//! Shared types used across the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::KeyAlgorithm;
use crate::did::AgentDid;

/// A public key as registered for an agent, seen from the verifier's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredKey {
    /// Algorithm family of the key.
    pub algorithm: KeyAlgorithm,
    /// Raw public key bytes.
    #[serde(with = "base64url_bytes")]
    pub key: Vec<u8>,
    /// Whether the registry attests this key.
    pub verified: bool,
    /// When the key was registered.
    pub created_at: DateTime<Utc>,
}

impl RegisteredKey {
    /// Convenience constructor for a verified key registered now.
    pub fn verified(algorithm: KeyAlgorithm, key: Vec<u8>) -> Self {
        Self {
            algorithm,
            key,
            verified: true,
            created_at: Utc::now(),
        }
    }
}

/// Registry view of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub did: AgentDid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub keys: Vec<RegisteredKey>,
    /// Dedicated key-encapsulation (X25519) key, 32 raw bytes.
    #[serde(default, with = "base64url_bytes_opt")]
    pub kem_public_key: Option<Vec<u8>>,
}

impl AgentMetadata {
    /// An active agent with the given keys.
    pub fn active(did: AgentDid, keys: Vec<RegisteredKey>) -> Self {
        Self {
            did,
            name: None,
            endpoint: None,
            is_active: true,
            keys,
            kem_public_key: None,
        }
    }
}

/// Describes one public key embedded in an Agent Card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyDescriptor {
    /// Key identifier (see [`crate::keys::KeyPair::id`]).
    pub id: String,
    pub algorithm: KeyAlgorithm,
    /// Base64url-encoded raw public key.
    pub public_key: String,
    /// Intended use, e.g. `"signing"` or `"kem"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// Identity and capability document an agent publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub did: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub public_keys: Vec<PublicKeyDescriptor>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AgentCard {
    /// Whether the card's expiry has passed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// An Agent Card with its compact JWS signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedAgentCard {
    pub card: AgentCard,
    /// Compact JWS: `<header>.<payload>.<signature>`.
    pub signature: String,
    pub signed_at: DateTime<Utc>,
}

mod base64url_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&crate::crypto::base64url_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        crate::crypto::base64url_decode(&encoded).map_err(serde::de::Error::custom)
    }
}

mod base64url_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&crate::crypto::base64url_encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| crate::crypto::base64url_decode(&encoded))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_key_json_uses_base64url() {
        let key = RegisteredKey {
            algorithm: KeyAlgorithm::Ed25519,
            key: vec![0xfb, 0xff],
            verified: true,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["algorithm"], "ed25519");
        assert_eq!(json["key"], "-_8");
        let back: RegisteredKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn metadata_without_kem_key_deserializes() {
        let json = serde_json::json!({
            "did": "did:sage:ethereum:0xAAA",
            "is_active": true,
        });
        let meta: AgentMetadata = serde_json::from_value(json).unwrap();
        assert!(meta.keys.is_empty());
        assert!(meta.kem_public_key.is_none());
    }

    #[test]
    fn card_expiry() {
        let now = Utc::now();
        let mut card = AgentCard {
            did: "did:sage:ethereum:0xAAA".into(),
            name: "a".into(),
            description: String::new(),
            endpoint: "https://a.example".into(),
            capabilities: vec![],
            public_keys: vec![],
            created_at: now,
            expires_at: None,
            metadata: Default::default(),
        };
        assert!(!card.is_expired(now));
        card.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(card.is_expired(now));
    }
}
