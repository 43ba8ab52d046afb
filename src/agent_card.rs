//! Agent Card signing and verification with compact JWS.
//!
//! The JWS payload is the card serialized as canonical JSON (object keys
//! sorted, no insignificant whitespace). The verifier re-serializes the
//! embedded card and requires byte equality with the signed payload, so any
//! change to the card after signing is detected.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::config::DEFAULT_RESOLVE_TIMEOUT_MS;
use crate::crypto::{self, KeyAlgorithm, PublicKey};
use crate::did::AgentDid;
use crate::error::Error;
use crate::keys::KeyPair;
use crate::resolver::DidResolver;
use crate::selector::KeySelector;
use crate::types::{AgentCard, SignedAgentCard};

/// JWS protected header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    #[serde(default)]
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// Sign `card` with `key_pair`, producing `<header>.<payload>.<signature>`.
pub fn sign_agent_card(card: &AgentCard, key_pair: &dyn KeyPair) -> Result<SignedAgentCard, Error> {
    validate_card(card)?;

    let algorithm = key_pair.algorithm();
    let alg = algorithm
        .jws_alg()
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("{algorithm} cannot sign a JWS")))?;
    let header = JwsHeader {
        alg: alg.to_string(),
        typ: Some("JWT".into()),
    };

    let header_b64 = crypto::base64url_encode(serde_json::to_string(&header)?.as_bytes());
    let payload_b64 = crypto::base64url_encode(card_payload(card)?.as_bytes());
    let signing_input = format!("{header_b64}.{payload_b64}");

    let raw = key_pair.sign(signing_input.as_bytes())?;
    let signature = codec::normalize_signature(&raw, algorithm)?;

    tracing::debug!(did = %card.did, alg, "agent card signed");

    Ok(SignedAgentCard {
        card: card.clone(),
        signature: format!("{signing_input}.{}", crypto::base64url_encode(&signature)),
        signed_at: Utc::now(),
    })
}

/// Required fields: DID, name, endpoint, creation time.
pub fn validate_card(card: &AgentCard) -> Result<(), Error> {
    if card.did.trim().is_empty() {
        return Err(Error::InvalidAgentCard("did is required".into()));
    }
    AgentDid::parse(&card.did).map_err(|e| Error::InvalidAgentCard(e.to_string()))?;
    if card.name.trim().is_empty() {
        return Err(Error::InvalidAgentCard("name is required".into()));
    }
    if card.endpoint.trim().is_empty() {
        return Err(Error::InvalidAgentCard("endpoint is required".into()));
    }
    if card.created_at.timestamp() <= 0 {
        return Err(Error::InvalidAgentCard("created_at is required".into()));
    }
    Ok(())
}

/// Canonical JSON serialization of a card.
pub fn card_payload(card: &AgentCard) -> Result<String, Error> {
    canonical_json(&serde_json::to_value(card)?)
}

/// Serialize a JSON value with object keys sorted and no whitespace.
pub fn canonical_json(value: &serde_json::Value) -> Result<String, Error> {
    Ok(match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<&str, &serde_json::Value> =
                map.iter().map(|(k, v)| (k.as_str(), v)).collect();
            let mut entries = Vec::with_capacity(sorted.len());
            for (k, v) in sorted {
                entries.push(format!("{}:{}", serde_json::to_string(k)?, canonical_json(v)?));
            }
            format!("{{{}}}", entries.join(","))
        }
        serde_json::Value::Array(items) => {
            let items = items
                .iter()
                .map(canonical_json)
                .collect::<Result<Vec<_>, _>>()?;
            format!("[{}]", items.join(","))
        }
        scalar => serde_json::to_string(scalar)?,
    })
}

/// Verifies signed Agent Cards against registry keys.
#[derive(Clone)]
pub struct AgentCardVerifier {
    selector: KeySelector,
}

impl AgentCardVerifier {
    /// Resolver calls are bounded by [`DEFAULT_RESOLVE_TIMEOUT_MS`], the same
    /// default the request verifier uses.
    pub fn new(resolver: Arc<dyn DidResolver>) -> Self {
        Self {
            selector: KeySelector::new(resolver)
                .with_resolve_timeout(Some(Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS))),
        }
    }

    /// Override the resolver deadline. `None` waits indefinitely.
    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.selector = self.selector.with_resolve_timeout(timeout);
        self
    }

    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.selector.resolve_timeout()
    }

    /// Verify the JWS using the key of the signing algorithm registered for
    /// the card's DID.
    #[tracing::instrument(skip_all, fields(did = %signed.card.did))]
    pub async fn verify(&self, signed: &SignedAgentCard) -> Result<(), Error> {
        let jws = CompactJws::split(&signed.signature)?;
        let algorithm = jws.algorithm()?;
        let did = AgentDid::parse(&signed.card.did)?;
        let public_key = self.selector.active_key_of_type(&did, algorithm).await?;
        verify_parts(signed, &jws, &public_key)
    }

    /// Verify the JWS against a known key, without resolution.
    pub fn verify_with_key(&self, signed: &SignedAgentCard, public_key: &PublicKey) -> Result<(), Error> {
        verify_agent_card_with_key(signed, public_key)
    }
}

/// Verify a signed card against `public_key`.
pub fn verify_agent_card_with_key(signed: &SignedAgentCard, public_key: &PublicKey) -> Result<(), Error> {
    let jws = CompactJws::split(&signed.signature)?;
    let algorithm = jws.algorithm()?;
    if algorithm != public_key.algorithm() {
        return Err(Error::UnsupportedAlgorithm(format!(
            "JWS alg {} does not match {} key",
            jws.header.alg,
            public_key.algorithm()
        )));
    }
    verify_parts(signed, &jws, public_key)
}

struct CompactJws<'a> {
    header: JwsHeader,
    signing_input: &'a str,
    payload_b64: &'a str,
    signature_b64: &'a str,
}

impl<'a> CompactJws<'a> {
    fn split(compact: &'a str) -> Result<Self, Error> {
        let parts: Vec<&str> = compact.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = parts[..] else {
            return Err(Error::InvalidJwsFormat(format!(
                "expected 3 parts, got {}",
                parts.len()
            )));
        };
        let header_bytes = crypto::base64url_decode(header_b64)
            .map_err(|e| Error::InvalidJwsFormat(format!("header: {e}")))?;
        let header: JwsHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| Error::InvalidJwsFormat(format!("header: {e}")))?;
        Ok(Self {
            header,
            signing_input: &compact[..header_b64.len() + 1 + payload_b64.len()],
            payload_b64,
            signature_b64,
        })
    }

    fn algorithm(&self) -> Result<KeyAlgorithm, Error> {
        KeyAlgorithm::from_jws_alg(&self.header.alg).ok_or_else(|| {
            Error::UnsupportedAlgorithm(format!("JWS alg '{}'", self.header.alg))
        })
    }
}

fn verify_parts(signed: &SignedAgentCard, jws: &CompactJws<'_>, public_key: &PublicKey) -> Result<(), Error> {
    let signature = crypto::base64url_decode(jws.signature_b64)
        .map_err(|e| Error::MalformedSignature(format!("JWS signature: {e}")))?;
    public_key.verify(jws.signing_input.as_bytes(), &signature)?;

    let payload = crypto::base64url_decode(jws.payload_b64)
        .map_err(|e| Error::InvalidJwsFormat(format!("payload: {e}")))?;
    let claimed: serde_json::Value = serde_json::from_slice(&payload)
        .map_err(|e| Error::InvalidJwsFormat(format!("payload: {e}")))?;

    let payload_did = claimed.get("did").and_then(|d| d.as_str()).unwrap_or_default();
    if payload_did != signed.card.did {
        return Err(Error::PayloadMismatch(format!(
            "payload DID {payload_did} differs from card DID {}",
            signed.card.did
        )));
    }
    if payload != card_payload(&signed.card)?.as_bytes() {
        return Err(Error::PayloadMismatch(
            "card differs from signed payload".into(),
        ));
    }

    if signed.card.is_expired(Utc::now()) {
        return Err(Error::AgentCardExpired(signed.card.did.clone()));
    }
    Ok(())
}
