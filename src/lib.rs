//! # SAGE agent authentication
//!
//! DID-bound HTTP message signatures (RFC 9421) and signed Agent Cards for
//! agent-to-agent traffic.
//!
//! ## DID Format
//!
//! ```text
//! did:sage:{chain}:{address}[:{nonce}]
//! ```
//!
//! A request is signed with the agent's private key. The `keyid` signature
//! parameter carries the DID; the verifier resolves the DID to its
//! registered public keys and checks the signature.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use sage_agent_auth::{
//!     AgentDid, AgentMetadata, Ed25519KeyPair, InMemoryResolver, KeyAlgorithm, KeyPair,
//!     RegisteredKey, SignOptions, Verifier,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), sage_agent_auth::Error> {
//! let key_pair = Ed25519KeyPair::generate();
//! let did = AgentDid::parse("did:sage:solana:AgentOne")?;
//!
//! // Registry side: publish the agent's key.
//! let resolver = InMemoryResolver::new();
//! resolver
//!     .insert_agent(AgentMetadata::active(
//!         did.clone(),
//!         vec![RegisteredKey::verified(KeyAlgorithm::Ed25519, key_pair.public_key().to_bytes())],
//!     ))
//!     .await;
//!
//! // Client side: sign an outgoing request.
//! let mut request = http::Request::builder()
//!     .method("POST")
//!     .uri("/task")
//!     .body(b"{\"x\":1}".to_vec())
//!     .unwrap();
//! sage_agent_auth::sign_request(&mut request, did.as_str(), &key_pair, &SignOptions::default())?;
//!
//! // Server side: verify it.
//! let verifier = Verifier::new(Arc::new(resolver));
//! let caller = verifier.verify_with_key_id(&request).await?;
//! assert_eq!(caller, did);
//! # Ok(())
//! # }
//! ```

pub mod agent_card;
pub mod cache;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod did;
pub mod error;
pub mod keys;
pub mod replay;
pub mod resolver;
pub mod selector;
pub mod signing;
pub mod types;
pub mod verifier;

#[cfg(feature = "middleware")]
pub mod middleware;

// Re-export primary types at the crate root.
pub use agent_card::{sign_agent_card, AgentCardVerifier};
pub use cache::CachingResolver;
pub use config::{AuthConfig, VerifierConfig};
pub use crypto::{KeyAlgorithm, PublicKey};
pub use did::AgentDid;
pub use error::{Error, Result};
pub use keys::{Ed25519KeyPair, KeyPair, Secp256k1KeyPair};
pub use replay::NonceCache;
pub use resolver::{DidResolver, InMemoryResolver};
pub use selector::{KeySelector, SelectedKey};
pub use signing::{sign_request, SignOptions, SignatureParameters};
pub use types::*;
pub use verifier::{Verifier, VerifyOptions};

#[cfg(feature = "middleware")]
pub use middleware::{did_auth, AuthOutcome, AuthenticatedDid, DidAuth};
