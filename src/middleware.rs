//! DID authentication middleware for axum.
//!
//! ```rust,ignore
//! let auth = DidAuth::from_config(resolver, AuthConfig::default());
//! let app = Router::new()
//!     .route("/task", post(handle_task))
//!     .layer(axum::middleware::from_fn_with_state(auth, did_auth));
//! ```

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::config::AuthConfig;
use crate::did::AgentDid;
use crate::error::Error;
use crate::resolver::DidResolver;
use crate::verifier::{has_signature_headers, Verifier};

/// The verified caller, inserted into request extensions.
///
/// Also usable as an extractor; it rejects with 401 when the request was
/// not authenticated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedDid(pub AgentDid);

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedDid {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedDid>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Result of authenticating one request.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Let through without an authenticated DID.
    Passed,
    Verified(AgentDid),
    Rejected(Error),
}

type ErrorHandler = Arc<dyn Fn(&Error) -> Response + Send + Sync>;

/// Middleware state: a verifier plus policy.
#[derive(Clone)]
pub struct DidAuth {
    verifier: Arc<Verifier>,
    config: AuthConfig,
    on_error: ErrorHandler,
}

impl DidAuth {
    pub fn new(verifier: Arc<Verifier>, config: AuthConfig) -> Self {
        Self {
            verifier,
            config,
            on_error: Arc::new(default_error_response),
        }
    }

    /// Build the verifier from `config.verifier`, so freshness, timeout and
    /// nonce policy come from the same config as the middleware settings.
    pub fn from_config(resolver: Arc<dyn DidResolver>, config: AuthConfig) -> Self {
        let verifier = Verifier::with_config(resolver, config.verifier.clone());
        Self::new(Arc::new(verifier), config)
    }

    /// Replace the response produced for rejected requests.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) -> Response + Send + Sync + 'static,
    {
        self.on_error = Arc::new(handler);
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Authenticate `req`, returning it with its body intact.
    pub async fn authenticate(&self, req: Request<Body>) -> (Request<Body>, AuthOutcome) {
        if req.method() == Method::OPTIONS {
            return (req, AuthOutcome::Passed);
        }

        if !has_signature_headers(&req) {
            let outcome = if self.config.optional {
                AuthOutcome::Passed
            } else {
                AuthOutcome::Rejected(Error::MissingHeaders)
            };
            return (req, outcome);
        }

        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, self.config.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = Error::Body(e.to_string());
                return (Request::from_parts(parts, Body::empty()), AuthOutcome::Rejected(err));
            }
        };

        let buffered: Request<Bytes> = Request::from_parts(parts, bytes);
        let outcome = match self.verifier.verify_with_key_id(&buffered).await {
            Ok(did) => AuthOutcome::Verified(did),
            Err(e) => AuthOutcome::Rejected(e),
        };

        let (parts, bytes) = buffered.into_parts();
        (Request::from_parts(parts, Body::from(bytes)), outcome)
    }
}

fn default_error_response(err: &Error) -> Response {
    (StatusCode::UNAUTHORIZED, err.to_string()).into_response()
}

/// Verifies the request signature and attaches [`AuthenticatedDid`].
///
/// Use with [`axum::middleware::from_fn_with_state`]. Rejected requests never
/// reach the inner handler.
pub async fn did_auth(State(auth): State<DidAuth>, req: Request<Body>, next: Next) -> Response {
    let (mut req, outcome) = auth.authenticate(req).await;
    match outcome {
        AuthOutcome::Passed => next.run(req).await,
        AuthOutcome::Verified(did) => {
            req.extensions_mut().insert(AuthenticatedDid(did));
            next.run(req).await
        }
        AuthOutcome::Rejected(err) => {
            tracing::debug!(error = %err, path = req.uri().path(), "DID authentication failed");
            (auth.on_error)(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyAlgorithm;
    use crate::keys::{Ed25519KeyPair, KeyPair};
    use crate::resolver::InMemoryResolver;
    use crate::signing::{sign_request, SignOptions};
    use crate::types::{AgentMetadata, RegisteredKey};

    const DID: &str = "did:sage:solana:Agent1";

    async fn auth(optional: bool) -> (Ed25519KeyPair, DidAuth) {
        let kp = Ed25519KeyPair::generate();
        let resolver = InMemoryResolver::new();
        resolver
            .insert_agent(AgentMetadata::active(
                AgentDid::parse(DID).unwrap(),
                vec![RegisteredKey::verified(KeyAlgorithm::Ed25519, kp.public_key().to_bytes())],
            ))
            .await;
        let config = AuthConfig {
            optional,
            ..AuthConfig::default()
        };
        (kp, DidAuth::new(Arc::new(Verifier::new(Arc::new(resolver))), config))
    }

    fn signed(kp: &Ed25519KeyPair, body: &[u8]) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/task")
            .body(body.to_vec())
            .unwrap();
        sign_request(&mut req, DID, kp, &SignOptions::default()).unwrap();
        let (parts, body) = req.into_parts();
        Request::from_parts(parts, Body::from(body))
    }

    #[tokio::test]
    async fn options_passes() {
        let (_, auth) = auth(false).await;
        let req = Request::builder()
            .method(Method::OPTIONS)
            .body(Body::empty())
            .unwrap();
        let (_, outcome) = auth.authenticate(req).await;
        assert!(matches!(outcome, AuthOutcome::Passed));
    }

    #[tokio::test]
    async fn missing_headers() {
        let (_, strict) = auth(false).await;
        let req = Request::builder().uri("/task").body(Body::empty()).unwrap();
        let (_, outcome) = strict.authenticate(req).await;
        assert!(matches!(outcome, AuthOutcome::Rejected(Error::MissingHeaders)));

        let (_, optional) = auth(true).await;
        let req = Request::builder().uri("/task").body(Body::empty()).unwrap();
        let (_, outcome) = optional.authenticate(req).await;
        assert!(matches!(outcome, AuthOutcome::Passed));
    }

    #[tokio::test]
    async fn body_restored_after_verification() {
        let (kp, auth) = auth(false).await;
        let (req, outcome) = auth.authenticate(signed(&kp, b"{\"x\":1}")).await;
        assert!(matches!(outcome, AuthOutcome::Verified(ref did) if did.as_str() == DID));
        let body = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\"x\":1}");
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let (kp, auth) = auth(false).await;
        let auth = DidAuth {
            config: AuthConfig {
                max_body_bytes: 4,
                ..AuthConfig::default()
            },
            ..auth
        };
        let (_, outcome) = auth.authenticate(signed(&kp, b"0123456789")).await;
        assert!(matches!(outcome, AuthOutcome::Rejected(Error::Body(_))));
    }

    #[tokio::test]
    async fn from_config_applies_verifier_settings() {
        let kp = Ed25519KeyPair::generate();
        let resolver = InMemoryResolver::new();
        resolver
            .insert_agent(AgentMetadata::active(
                AgentDid::parse(DID).unwrap(),
                vec![RegisteredKey::verified(KeyAlgorithm::Ed25519, kp.public_key().to_bytes())],
            ))
            .await;
        let resolver: Arc<dyn DidResolver> = Arc::new(resolver);
        let stale = SignOptions {
            created: Some(1),
            ..SignOptions::default()
        };
        let old_request = || {
            let mut req = Request::builder()
                .method("POST")
                .uri("/task")
                .body(b"{}".to_vec())
                .unwrap();
            sign_request(&mut req, DID, &kp, &stale).unwrap();
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, Body::from(body))
        };

        let strict = DidAuth::from_config(resolver.clone(), AuthConfig::default());
        let (_, outcome) = strict.authenticate(old_request()).await;
        assert!(matches!(outcome, AuthOutcome::Rejected(Error::SignatureExpired(_))));

        let mut config = AuthConfig::default();
        config.verifier.max_age_secs = None;
        let lenient = DidAuth::from_config(resolver, config);
        assert_eq!(lenient.config().verifier.max_age_secs, None);
        let (_, outcome) = lenient.authenticate(old_request()).await;
        assert!(matches!(outcome, AuthOutcome::Verified(ref did) if did.as_str() == DID));
    }

    #[tokio::test]
    async fn invalid_signature_rejected_in_optional_mode() {
        let (_, auth) = auth(true).await;
        let other = Ed25519KeyPair::generate();
        let (_, outcome) = auth.authenticate(signed(&other, b"{}")).await;
        assert!(matches!(outcome, AuthOutcome::Rejected(Error::InvalidSignature(_))));
    }
}
