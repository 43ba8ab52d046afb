//! Verification of inbound signed requests.

use std::sync::Arc;

use http::Request;

use crate::config::VerifierConfig;
use crate::crypto::{self, KeyAlgorithm, PublicKey};
use crate::did::{AgentDid, DID_PREFIX};
use crate::error::Error;
use crate::replay::NonceCache;
use crate::resolver::DidResolver;
use crate::selector::KeySelector;
use crate::signing::{
    self, SignatureInput, SignatureParameters, CONTENT_DIGEST_HEADER, SIGNATURE_HEADER,
    SIGNATURE_INPUT_HEADER,
};

/// Per-call verification options.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// The DID the caller expects; must equal the signature's `keyid`.
    pub expected_did: Option<String>,
    /// Resolve this key type directly instead of applying the selection policy.
    pub key_type: Option<KeyAlgorithm>,
}

/// Verifies that a request was signed by the key registered for its `keyid`.
#[derive(Clone)]
pub struct Verifier {
    selector: KeySelector,
    config: VerifierConfig,
    nonces: Option<Arc<NonceCache>>,
}

impl Verifier {
    /// Create a verifier with [`VerifierConfig::default`].
    pub fn new(resolver: Arc<dyn DidResolver>) -> Self {
        Self::with_config(resolver, VerifierConfig::default())
    }

    pub fn with_config(resolver: Arc<dyn DidResolver>, config: VerifierConfig) -> Self {
        let selector = KeySelector::new(resolver).with_resolve_timeout(config.resolve_timeout());
        Self {
            selector,
            config,
            nonces: None,
        }
    }

    /// Reject nonces seen before. Only signatures carrying a `nonce` are checked.
    pub fn with_nonce_cache(mut self, nonces: Arc<NonceCache>) -> Self {
        self.nonces = Some(nonces);
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn selector(&self) -> &KeySelector {
        &self.selector
    }

    /// Verify a request and return the DID named by its `keyid`.
    pub async fn verify_with_key_id<B: AsRef<[u8]>>(&self, request: &Request<B>) -> Result<AgentDid, Error> {
        self.verify_with_options(request, &VerifyOptions::default())
            .await
    }

    /// Verify a request that must have been signed by `did`.
    pub async fn verify<B: AsRef<[u8]>>(&self, request: &Request<B>, did: &str) -> Result<(), Error> {
        let options = VerifyOptions {
            expected_did: Some(did.to_string()),
            key_type: None,
        };
        self.verify_with_options(request, &options).await.map(|_| ())
    }

    /// Full verification: headers, DID binding, freshness, key resolution,
    /// signature, and replay check.
    #[tracing::instrument(skip_all, fields(method = %request.method(), path = request.uri().path()))]
    pub async fn verify_with_options<B: AsRef<[u8]>>(
        &self,
        request: &Request<B>,
        options: &VerifyOptions,
    ) -> Result<AgentDid, Error> {
        let (input, signature) = read_signature_headers(request)?;
        let did = parse_keyid(&input.params.keyid)?;

        if let Some(expected) = &options.expected_did {
            if expected != did.as_str() {
                return Err(Error::KeyIdMismatch {
                    expected: expected.clone(),
                    actual: did.to_string(),
                });
            }
        }

        self.check_freshness(&input.params, signing::now_unix())?;

        let key_type = options.key_type.or_else(|| input.params.key_algorithm());
        let public_key = match key_type {
            Some(algorithm) => self.selector.active_key_of_type(&did, algorithm).await?,
            None => self.selector.select_key(&did, "").await?.public_key,
        };

        check_signature(request, &input, &signature, &public_key)?;
        self.check_nonce(&did, &input.params).await?;

        tracing::debug!(%did, "request signature verified");
        Ok(did)
    }

    /// Verify against an already-resolved key. Checks freshness and the
    /// signature; performs no resolution and no replay tracking.
    pub fn verify_with_public_key<B: AsRef<[u8]>>(
        &self,
        request: &Request<B>,
        public_key: &PublicKey,
    ) -> Result<SignatureParameters, Error> {
        let (input, signature) = read_signature_headers(request)?;
        parse_keyid(&input.params.keyid)?;
        self.check_freshness(&input.params, signing::now_unix())?;
        check_signature(request, &input, &signature, public_key)?;
        Ok(input.params)
    }

    fn check_freshness(&self, params: &SignatureParameters, now: u64) -> Result<(), Error> {
        if let Some(expires) = params.expires {
            if now >= expires {
                return Err(Error::SignatureExpired(format!("expired at {expires}")));
            }
        }

        let Some(max_age) = self.config.max_age_secs else {
            return Ok(());
        };
        let created = params
            .created
            .ok_or_else(|| Error::SignatureExpired("created parameter missing".into()))?;
        if created > now.saturating_add(self.config.max_clock_skew_secs) {
            return Err(Error::SignatureExpired(format!(
                "created {created} is in the future"
            )));
        }
        if now.saturating_sub(created) > max_age {
            return Err(Error::SignatureExpired(format!(
                "created {created} is older than {max_age}s"
            )));
        }
        Ok(())
    }

    async fn check_nonce(&self, did: &AgentDid, params: &SignatureParameters) -> Result<(), Error> {
        let Some(nonce) = &params.nonce else {
            if self.config.require_nonce {
                return Err(Error::InvalidSignatureInput("nonce parameter required".into()));
            }
            return Ok(());
        };
        if let Some(cache) = &self.nonces {
            if !cache.check_and_insert(did.as_str(), nonce).await {
                return Err(Error::ReplayedNonce(nonce.clone()));
            }
        }
        Ok(())
    }
}

/// Whether the request carries non-empty `Signature-Input` and `Signature`.
pub fn has_signature_headers<B>(request: &Request<B>) -> bool {
    [SIGNATURE_INPUT_HEADER, SIGNATURE_HEADER].iter().all(|name| {
        request
            .headers()
            .get(*name)
            .is_some_and(|v| !v.as_bytes().iter().all(u8::is_ascii_whitespace))
    })
}

fn read_signature_headers<B>(request: &Request<B>) -> Result<(SignatureInput, Vec<u8>), Error> {
    if !has_signature_headers(request) {
        return Err(Error::MissingHeaders);
    }
    let input = signing::parse_signature_input(header_str(request, SIGNATURE_INPUT_HEADER)?)?;
    let signature = signing::parse_signature(header_str(request, SIGNATURE_HEADER)?, &input.label)?;
    Ok((input, signature))
}

fn header_str<'a, B>(request: &'a Request<B>, name: &str) -> Result<&'a str, Error> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::InvalidSignatureInput(format!("{name} is not valid ASCII")))
}

fn parse_keyid(keyid: &str) -> Result<AgentDid, Error> {
    if !keyid.starts_with(DID_PREFIX) {
        return Err(Error::InvalidDidFormat(format!(
            "keyid must start with '{DID_PREFIX}': {keyid}"
        )));
    }
    AgentDid::parse(keyid)
}

fn check_signature<B: AsRef<[u8]>>(
    request: &Request<B>,
    input: &SignatureInput,
    signature: &[u8],
    public_key: &PublicKey,
) -> Result<(), Error> {
    if input.params.covers(CONTENT_DIGEST_HEADER) {
        check_content_digest(request)?;
    }
    let base = signing::build_signature_base(request, &input.params.components, &input.raw)?;
    let digest = crypto::sha256(base.as_bytes());
    public_key.verify(&digest, signature)
}

/// The `Content-Digest` header must match the body actually received.
fn check_content_digest<B: AsRef<[u8]>>(request: &Request<B>) -> Result<(), Error> {
    let header = request
        .headers()
        .get(CONTENT_DIGEST_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::InvalidSignature("content-digest covered but absent".into()))?;
    let expected = signing::content_digest(request.body().as_ref());
    let matches = header
        .split(',')
        .map(str::trim)
        .any(|member| member == expected);
    if matches {
        Ok(())
    } else {
        Err(Error::InvalidSignature(
            "content-digest does not match body".into(),
        ))
    }
}
