//! Deterministic choice of which registered key to use for a DID.
//!
//! Selection order:
//!
//! 1. KEM hints (`hpke`, `kem`, `x25519`): the dedicated KEM key, else the
//!    first verified X25519 key.
//! 2. Chain hints: the chain's preferred signing algorithm, then the other
//!    signing algorithm, then any verified key.
//! 3. No or unknown hint: Ed25519, then secp256k1, then any verified key.
//!
//! "First" means earliest `created_at`, ties broken by key bytes, so the
//! choice does not depend on the order the registry returns keys in.

use std::sync::Arc;
use std::time::Duration;

use crate::codec;
use crate::crypto::{KeyAlgorithm, PublicKey};
use crate::did::AgentDid;
use crate::error::Error;
use crate::resolver::{with_deadline, DidResolver};
use crate::types::RegisteredKey;

/// A key chosen for a DID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedKey {
    pub public_key: PublicKey,
    pub algorithm: KeyAlgorithm,
}

/// What a protocol hint asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HintPreference {
    Kem,
    Prefer(KeyAlgorithm),
    Default,
}

fn classify_hint(hint: &str) -> HintPreference {
    match hint.trim().to_ascii_lowercase().as_str() {
        "hpke" | "kem" | "x25519" => HintPreference::Kem,
        "ethereum" | "eth" | "evm" | "polygon" | "base" | "arbitrum" | "optimism" => {
            HintPreference::Prefer(KeyAlgorithm::Secp256k1)
        }
        "solana" | "sol" => HintPreference::Prefer(KeyAlgorithm::Ed25519),
        _ => HintPreference::Default,
    }
}

/// Chooses among an agent's registered keys.
#[derive(Clone)]
pub struct KeySelector {
    resolver: Arc<dyn DidResolver>,
    resolve_timeout: Option<Duration>,
}

impl KeySelector {
    pub fn new(resolver: Arc<dyn DidResolver>) -> Self {
        Self {
            resolver,
            resolve_timeout: None,
        }
    }

    /// Bound each resolver call; an elapsed deadline fails with
    /// [`Error::ContextCancelled`].
    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.resolve_timeout
    }

    pub fn resolver(&self) -> &Arc<dyn DidResolver> {
        &self.resolver
    }

    /// Select the key to use for `did` in the context named by `protocol_hint`.
    ///
    /// # Errors
    ///
    /// - [`Error::AgentNotFound`] if the DID does not resolve.
    /// - [`Error::AgentInactive`] if the registry marks the agent inactive.
    /// - [`Error::NoKeyOfType`] for KEM hints with no KEM key.
    /// - [`Error::NoVerifiedKeys`] if no usable verified key exists.
    #[tracing::instrument(skip(self, did), fields(did = %did))]
    pub async fn select_key(&self, did: &AgentDid, protocol_hint: &str) -> Result<SelectedKey, Error> {
        let metadata = with_deadline(
            self.resolve_timeout,
            "agent metadata lookup",
            self.resolver.agent_metadata(did),
        )
        .await?
        .ok_or_else(|| Error::AgentNotFound(did.to_string()))?;

        if !metadata.is_active {
            return Err(Error::AgentInactive(did.to_string()));
        }

        let mut verified: Vec<&RegisteredKey> = metadata.keys.iter().filter(|k| k.verified).collect();
        verified.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key.cmp(&b.key))
        });

        let preference = classify_hint(protocol_hint);
        if preference == HintPreference::Kem {
            if let Some(kem) = &metadata.kem_public_key {
                return select(kem, KeyAlgorithm::X25519);
            }
            return first_of(&verified, KeyAlgorithm::X25519).ok_or_else(|| Error::NoKeyOfType {
                did: did.to_string(),
                algorithm: KeyAlgorithm::X25519.to_string(),
            });
        }

        if verified.is_empty() {
            return Err(Error::NoVerifiedKeys(did.to_string()));
        }

        let order = match preference {
            HintPreference::Prefer(KeyAlgorithm::Secp256k1) => {
                [KeyAlgorithm::Secp256k1, KeyAlgorithm::Ed25519]
            }
            _ => [KeyAlgorithm::Ed25519, KeyAlgorithm::Secp256k1],
        };
        if let Some(selected) = order.into_iter().find_map(|alg| first_of(&verified, alg)) {
            return Ok(selected);
        }

        // Any verified key of a recognized type.
        verified
            .iter()
            .find_map(|k| select(&k.key, k.algorithm).ok())
            .ok_or_else(|| Error::NoVerifiedKeys(did.to_string()))
    }

    /// Like [`Self::key_of_type`], but first requires the agent to be known
    /// and active.
    pub async fn active_key_of_type(&self, did: &AgentDid, algorithm: KeyAlgorithm) -> Result<PublicKey, Error> {
        let metadata = with_deadline(
            self.resolve_timeout,
            "agent metadata lookup",
            self.resolver.agent_metadata(did),
        )
        .await?
        .ok_or_else(|| Error::AgentNotFound(did.to_string()))?;
        if !metadata.is_active {
            return Err(Error::AgentInactive(did.to_string()));
        }
        self.key_of_type(did, algorithm).await
    }

    /// Resolve the key of one specific type directly, bypassing the policy.
    pub async fn key_of_type(&self, did: &AgentDid, algorithm: KeyAlgorithm) -> Result<PublicKey, Error> {
        let raw = with_deadline(
            self.resolve_timeout,
            "public key lookup",
            self.resolver.resolve_public_key_by_type(did, algorithm),
        )
        .await?;
        codec::decode_public_key(&raw, algorithm)
    }
}

fn select(raw: &[u8], algorithm: KeyAlgorithm) -> Result<SelectedKey, Error> {
    Ok(SelectedKey {
        public_key: codec::decode_public_key(raw, algorithm)?,
        algorithm,
    })
}

/// Earliest key of `algorithm` that decodes. Undecodable registry entries
/// are skipped so one bad record cannot shadow a usable key.
fn first_of(keys: &[&RegisteredKey], algorithm: KeyAlgorithm) -> Option<SelectedKey> {
    keys.iter()
        .filter(|k| k.algorithm == algorithm)
        .find_map(|k| match select(&k.key, algorithm) {
            Ok(selected) => Some(selected),
            Err(e) => {
                tracing::debug!(%algorithm, error = %e, "skipping undecodable registered key");
                None
            }
        })
}
