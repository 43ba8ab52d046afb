use thiserror::Error;

/// Error types for DID-based request and Agent Card authentication.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing Signature-Input or Signature header")]
    MissingHeaders,

    #[error("keyid parameter not found in Signature-Input")]
    KeyIdNotFound,

    #[error("Invalid DID format: {0}")]
    InvalidDidFormat(String),

    #[error("keyid mismatch: expected {expected}, signature names {actual}")]
    KeyIdMismatch { expected: String, actual: String },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid Signature-Input: {0}")]
    InvalidSignatureInput(String),

    #[error("Unsupported covered component: {0}")]
    UnsupportedComponent(String),

    #[error("Signature expired: {0}")]
    SignatureExpired(String),

    #[error("nonce already used: {0}")]
    ReplayedNonce(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent is inactive: {0}")]
    AgentInactive(String),

    #[error("no verified keys registered for {0}")]
    NoVerifiedKeys(String),

    #[error("no {algorithm} key registered for {did}")]
    NoKeyOfType { did: String, algorithm: String },

    #[error("Invalid agent card: {0}")]
    InvalidAgentCard(String),

    #[error("agent card expired for {0}")]
    AgentCardExpired(String),

    #[error("Invalid JWS format: {0}")]
    InvalidJwsFormat(String),

    #[error("payload mismatch: {0}")]
    PayloadMismatch(String),

    #[error("operation cancelled: {0}")]
    ContextCancelled(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Resolver error: {0}")]
    Resolver(String),

    #[error("Request body error: {0}")]
    Body(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
