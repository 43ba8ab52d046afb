//! DID resolution seam.
//!
//! The registry client that talks to the chain lives outside this crate and
//! plugs in through [`DidResolver`]. [`InMemoryResolver`] serves embedders
//! that already hold agent records, and tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::crypto::KeyAlgorithm;
use crate::did::AgentDid;
use crate::error::Error;
use crate::types::{AgentMetadata, RegisteredKey};

/// Resolves a DID to the keys registered for it.
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// All keys registered for `did`, in registry order.
    async fn resolve_all_public_keys(&self, did: &AgentDid) -> Result<Vec<RegisteredKey>, Error>;

    /// Raw bytes of the key of type `algorithm` registered for `did`.
    async fn resolve_public_key_by_type(
        &self,
        did: &AgentDid,
        algorithm: KeyAlgorithm,
    ) -> Result<Vec<u8>, Error>;

    /// Registry metadata, or `None` if the DID is unknown.
    async fn agent_metadata(&self, did: &AgentDid) -> Result<Option<AgentMetadata>, Error>;
}

#[async_trait]
impl<T: DidResolver + ?Sized> DidResolver for Arc<T> {
    async fn resolve_all_public_keys(&self, did: &AgentDid) -> Result<Vec<RegisteredKey>, Error> {
        (**self).resolve_all_public_keys(did).await
    }

    async fn resolve_public_key_by_type(
        &self,
        did: &AgentDid,
        algorithm: KeyAlgorithm,
    ) -> Result<Vec<u8>, Error> {
        (**self).resolve_public_key_by_type(did, algorithm).await
    }

    async fn agent_metadata(&self, did: &AgentDid) -> Result<Option<AgentMetadata>, Error> {
        (**self).agent_metadata(did).await
    }
}

/// Run a resolver call under an optional deadline.
///
/// An elapsed deadline is reported as [`Error::ContextCancelled`].
pub(crate) async fn with_deadline<T, F>(
    timeout: Option<Duration>,
    what: &str,
    fut: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            Error::ContextCancelled(format!("{what} exceeded {}ms", limit.as_millis()))
        })?,
        None => fut.await,
    }
}

/// Resolver backed by an in-memory map of agent records.
#[derive(Clone, Default)]
pub struct InMemoryResolver {
    agents: Arc<RwLock<HashMap<String, AgentMetadata>>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an agent record.
    pub async fn insert_agent(&self, metadata: AgentMetadata) {
        let mut agents = self.agents.write().await;
        agents.insert(metadata.did.to_string(), metadata);
    }

    /// Flip the active flag of a known agent. Returns `false` if unknown.
    pub async fn set_active(&self, did: &AgentDid, active: bool) -> bool {
        let mut agents = self.agents.write().await;
        match agents.get_mut(did.as_str()) {
            Some(meta) => {
                meta.is_active = active;
                true
            }
            None => false,
        }
    }

    pub async fn remove_agent(&self, did: &AgentDid) -> Option<AgentMetadata> {
        self.agents.write().await.remove(did.as_str())
    }
}

#[async_trait]
impl DidResolver for InMemoryResolver {
    async fn resolve_all_public_keys(&self, did: &AgentDid) -> Result<Vec<RegisteredKey>, Error> {
        let agents = self.agents.read().await;
        agents
            .get(did.as_str())
            .map(|meta| meta.keys.clone())
            .ok_or_else(|| Error::AgentNotFound(did.to_string()))
    }

    async fn resolve_public_key_by_type(
        &self,
        did: &AgentDid,
        algorithm: KeyAlgorithm,
    ) -> Result<Vec<u8>, Error> {
        let agents = self.agents.read().await;
        let meta = agents
            .get(did.as_str())
            .ok_or_else(|| Error::AgentNotFound(did.to_string()))?;
        if algorithm == KeyAlgorithm::X25519 {
            if let Some(kem) = &meta.kem_public_key {
                return Ok(kem.clone());
            }
        }
        meta.keys
            .iter()
            .find(|k| k.verified && k.algorithm == algorithm)
            .map(|k| k.key.clone())
            .ok_or_else(|| Error::NoKeyOfType {
                did: did.to_string(),
                algorithm: algorithm.to_string(),
            })
    }

    async fn agent_metadata(&self, did: &AgentDid) -> Result<Option<AgentMetadata>, Error> {
        Ok(self.agents.read().await.get(did.as_str()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn did() -> AgentDid {
        AgentDid::parse("did:sage:ethereum:0xAAA").unwrap()
    }

    #[tokio::test]
    async fn unknown_agent() {
        let resolver = InMemoryResolver::new();
        assert!(resolver.agent_metadata(&did()).await.unwrap().is_none());
        assert!(matches!(
            resolver.resolve_all_public_keys(&did()).await,
            Err(Error::AgentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn by_type_skips_unverified_keys() {
        let resolver = InMemoryResolver::new();
        let mut unverified = RegisteredKey::verified(KeyAlgorithm::Ed25519, vec![1; 32]);
        unverified.verified = false;
        resolver
            .insert_agent(AgentMetadata::active(did(), vec![unverified]))
            .await;

        assert!(matches!(
            resolver
                .resolve_public_key_by_type(&did(), KeyAlgorithm::Ed25519)
                .await,
            Err(Error::NoKeyOfType { .. })
        ));
    }

    #[tokio::test]
    async fn set_active_toggles_flag() {
        let resolver = InMemoryResolver::new();
        resolver.insert_agent(AgentMetadata::active(did(), vec![])).await;
        assert!(resolver.set_active(&did(), false).await);
        let meta = resolver.agent_metadata(&did()).await.unwrap().unwrap();
        assert!(!meta.is_active);
    }

    #[tokio::test]
    async fn deadline_maps_to_context_cancelled() {
        let result: Result<(), Error> = with_deadline(
            Some(Duration::from_millis(5)),
            "slow lookup",
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(Error::ContextCancelled(_))));
    }
}
