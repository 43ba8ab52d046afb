//! DID parsing and validation for the `did:sage` method.
//!
//! The DID format is: `did:sage:{chain}:{address}[:{nonce}]`
//!
//! - `chain`: lowercase chain identifier (e.g. `"ethereum"`, `"solana"`)
//! - `address`: the agent's on-chain address, kept exactly as issued
//! - `nonce`: optional discriminator when one address registers several agents
//!
//! DIDs are compared byte-for-byte, so no case normalization is applied.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Every DID handled by this crate starts with this prefix.
pub const DID_PREFIX: &str = "did:sage:";

/// Upper bound on DID length.
pub const MAX_DID_LEN: usize = 256;

/// A parsed `did:sage` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentDid {
    raw: String,
    chain_end: usize,
    address_end: usize,
}

impl AgentDid {
    /// Parse and validate a DID string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDidFormat`] if the string is not
    /// `did:sage:{chain}:{address}[:{nonce}]`.
    pub fn parse(did: &str) -> Result<Self, Error> {
        if did.len() > MAX_DID_LEN {
            return Err(Error::InvalidDidFormat(format!(
                "DID exceeds {MAX_DID_LEN} characters"
            )));
        }

        let rest = did.strip_prefix(DID_PREFIX).ok_or_else(|| {
            Error::InvalidDidFormat(format!("must start with '{DID_PREFIX}': {did}"))
        })?;

        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() != 2 && parts.len() != 3 {
            return Err(Error::InvalidDidFormat(format!(
                "expected did:sage:<chain>:<address>[:<nonce>]: {did}"
            )));
        }

        let chain = parts[0];
        if chain.is_empty()
            || !chain
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidDidFormat(format!(
                "invalid chain identifier: {chain}"
            )));
        }

        let address = parts[1];
        if address.is_empty() || !address.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidDidFormat(format!(
                "invalid agent address: {address}"
            )));
        }

        if let Some(nonce) = parts.get(2) {
            if nonce.is_empty() || !nonce.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(Error::InvalidDidFormat(format!("invalid nonce: {nonce}")));
            }
        }

        let chain_end = DID_PREFIX.len() + chain.len();
        Ok(Self {
            raw: did.to_string(),
            chain_end,
            address_end: chain_end + 1 + address.len(),
        })
    }

    /// Build a DID from its components.
    pub fn new(chain: &str, address: &str, nonce: Option<&str>) -> Result<Self, Error> {
        match nonce {
            Some(n) => Self::parse(&format!("{DID_PREFIX}{chain}:{address}:{n}")),
            None => Self::parse(&format!("{DID_PREFIX}{chain}:{address}")),
        }
    }

    pub fn chain(&self) -> &str {
        &self.raw[DID_PREFIX.len()..self.chain_end]
    }

    pub fn address(&self) -> &str {
        &self.raw[self.chain_end + 1..self.address_end]
    }

    pub fn nonce(&self) -> Option<&str> {
        self.raw.get(self.address_end + 1..)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for AgentDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for AgentDid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentDid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AgentDid> for String {
    fn from(did: AgentDid) -> Self {
        did.raw
    }
}

impl AsRef<str> for AgentDid {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Validate a DID string without returning the parsed result.
pub fn validate(did: &str) -> bool {
    AgentDid::parse(did).is_ok()
}
