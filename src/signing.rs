//! RFC 9421-style HTTP message signatures for agent requests.
//!
//! A signed request carries:
//!
//! ```text
//! Signature-Input: sig1=("@method" "@path" "@query" "content-digest");keyid="did:sage:ethereum:0x...";alg="es256k";created=1708123456
//! Signature: sig1=:<base64>:
//! Content-Digest: sha-256=:<base64>:
//! ```
//!
//! The signed bytes are the SHA-256 digest of the *signature base*: one
//! `"<component>": <value>` line per covered component followed by a final
//! `"@signature-params"` line, joined with `\n`.

use std::time::{SystemTime, UNIX_EPOCH};

use http::header::{HeaderName, HeaderValue};
use http::Request;

use crate::codec;
use crate::crypto::{self, KeyAlgorithm};
use crate::did::AgentDid;
use crate::error::Error;
use crate::keys::KeyPair;

/// Label used for the signature this crate produces.
pub const SIGNATURE_LABEL: &str = "sig1";

pub const SIGNATURE_INPUT_HEADER: &str = "signature-input";
pub const SIGNATURE_HEADER: &str = "signature";
pub const CONTENT_DIGEST_HEADER: &str = "content-digest";

/// Components covered when the caller does not choose.
pub const DEFAULT_COMPONENTS: [&str; 4] = ["@method", "@path", "@query", "content-digest"];

/// Parameters of one signature, as carried in `Signature-Input`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParameters {
    /// Covered component identifiers, in signing order.
    pub components: Vec<String>,
    /// The signer's DID.
    pub keyid: String,
    pub alg: Option<String>,
    /// Unix seconds. Always set on signatures this crate produces.
    pub created: Option<u64>,
    pub expires: Option<u64>,
    pub nonce: Option<String>,
}

impl SignatureParameters {
    /// Serialize as the `Signature-Input` member value (without the label).
    pub fn serialize(&self) -> String {
        let components: Vec<String> = self.components.iter().map(|c| quote(c)).collect();
        let mut out = format!("({});keyid={}", components.join(" "), quote(&self.keyid));
        if let Some(alg) = &self.alg {
            out.push_str(&format!(";alg={}", quote(alg)));
        }
        if let Some(created) = self.created {
            out.push_str(&format!(";created={created}"));
        }
        if let Some(expires) = self.expires {
            out.push_str(&format!(";expires={expires}"));
        }
        if let Some(nonce) = &self.nonce {
            out.push_str(&format!(";nonce={}", quote(nonce)));
        }
        out
    }

    /// Whether `component` is covered (case-insensitive).
    pub fn covers(&self, component: &str) -> bool {
        self.components
            .iter()
            .any(|c| c.eq_ignore_ascii_case(component))
    }

    /// The algorithm named by `alg`, if recognized.
    pub fn key_algorithm(&self) -> Option<KeyAlgorithm> {
        self.alg
            .as_deref()
            .and_then(KeyAlgorithm::from_http_signature_alg)
    }
}

/// A parsed `Signature-Input` member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInput {
    pub label: String,
    pub params: SignatureParameters,
    /// The member value exactly as received. This, not a re-serialization,
    /// is what goes into the `@signature-params` line.
    pub raw: String,
}

/// Options for [`sign_request`].
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Covered components. Defaults to [`DEFAULT_COMPONENTS`].
    pub components: Option<Vec<String>>,
    /// Override `created` (defaults to now).
    pub created: Option<u64>,
    pub expires: Option<u64>,
    pub nonce: Option<String>,
    /// Override the `alg` string derived from the key pair.
    pub algorithm: Option<String>,
}

impl SignOptions {
    /// Cover `components` instead of the defaults.
    pub fn with_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components = Some(components.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_created(mut self, created: u64) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_expires(mut self, expires: u64) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Attach a random 16-byte hex nonce.
    pub fn with_random_nonce(self) -> Self {
        self.with_nonce(generate_nonce())
    }
}

/// Sign an HTTP request, writing `Signature-Input` and `Signature` (and
/// `Content-Digest` when covered and absent).
///
/// # Errors
///
/// - [`Error::InvalidDidFormat`] if `did` is empty or malformed; no header is
///   touched in that case.
/// - [`Error::UnsupportedAlgorithm`] for key pairs that cannot sign.
/// - Any error from [`KeyPair::sign`], unchanged.
#[tracing::instrument(skip(request, key_pair, options), fields(method = %request.method(), path = request.uri().path()))]
pub fn sign_request<B: AsRef<[u8]>>(
    request: &mut Request<B>,
    did: &str,
    key_pair: &dyn KeyPair,
    options: &SignOptions,
) -> Result<(), Error> {
    if did.is_empty() {
        return Err(Error::InvalidDidFormat("DID must not be empty".into()));
    }
    let did = AgentDid::parse(did)?;

    let algorithm = key_pair.algorithm();
    let alg = match &options.algorithm {
        Some(alg) => alg.clone(),
        None => algorithm
            .http_signature_alg()
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("{algorithm} cannot sign")))?
            .to_string(),
    };

    let components: Vec<String> = match &options.components {
        Some(components) => components.clone(),
        None => DEFAULT_COMPONENTS.iter().map(|c| c.to_string()).collect(),
    };

    let params = SignatureParameters {
        components,
        keyid: did.to_string(),
        alg: Some(alg),
        created: Some(options.created.unwrap_or_else(now_unix)),
        expires: options.expires,
        nonce: options.nonce.clone(),
    };
    let params_str = params.serialize();

    if params.covers(CONTENT_DIGEST_HEADER) && !request.headers().contains_key(CONTENT_DIGEST_HEADER) {
        let digest = content_digest(request.body().as_ref());
        request.headers_mut().insert(
            HeaderName::from_static(CONTENT_DIGEST_HEADER),
            header_value(&digest)?,
        );
    }

    let base = build_signature_base(request, &params.components, &params_str)?;
    let digest = crypto::sha256(base.as_bytes());
    let raw_signature = key_pair.sign(&digest)?;
    let signature = codec::normalize_signature(&raw_signature, algorithm)?;

    let headers = request.headers_mut();
    headers.insert(
        HeaderName::from_static(SIGNATURE_INPUT_HEADER),
        header_value(&format!("{SIGNATURE_LABEL}={params_str}"))?,
    );
    headers.insert(
        HeaderName::from_static(SIGNATURE_HEADER),
        header_value(&format!(
            "{SIGNATURE_LABEL}=:{}:",
            crypto::base64_encode(&signature)
        ))?,
    );

    tracing::debug!(%did, alg = params.alg.as_deref().unwrap_or_default(), "signed request");
    Ok(())
}

/// Compute a `Content-Digest` value: `sha-256=:<base64>:`.
pub fn content_digest(body: &[u8]) -> String {
    format!("sha-256=:{}:", crypto::base64_encode(&crypto::sha256(body)))
}

/// Build the signature base for `request`.
///
/// Header components that are absent or empty are omitted. Unknown derived
/// (`@`) components fail with [`Error::UnsupportedComponent`].
pub fn build_signature_base<B>(
    request: &Request<B>,
    components: &[String],
    signature_params: &str,
) -> Result<String, Error> {
    let mut lines = Vec::with_capacity(components.len() + 1);
    for component in components {
        let name = component.to_ascii_lowercase();
        if let Some(value) = component_value(request, &name)? {
            lines.push(format!("\"{name}\": {value}"));
        }
    }
    lines.push(format!("\"@signature-params\": {signature_params}"));
    Ok(lines.join("\n"))
}

fn component_value<B>(request: &Request<B>, name: &str) -> Result<Option<String>, Error> {
    let uri = request.uri();
    let value = match name {
        "@method" => request.method().as_str().to_ascii_uppercase(),
        "@path" => match uri.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        },
        "@query" => format!("?{}", uri.query().unwrap_or("")),
        "@authority" => match uri.authority() {
            Some(authority) => authority.as_str().to_ascii_lowercase(),
            None => match header_text(request, "host") {
                Some(host) => host.to_ascii_lowercase(),
                None => return Ok(None),
            },
        },
        "@scheme" => uri.scheme_str().unwrap_or("http").to_ascii_lowercase(),
        "@target-uri" => uri.to_string(),
        "@request-target" => uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        derived if derived.starts_with('@') => {
            return Err(Error::UnsupportedComponent(derived.to_string()))
        }
        header => return Ok(header_text(request, header)),
    };
    Ok(Some(value))
}

/// Combined value of every instance of `name`, or `None` if absent or empty.
fn header_text<B>(request: &Request<B>, name: &str) -> Option<String> {
    let values: Vec<String> = request
        .headers()
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
        .collect();
    let joined = values.join(", ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Parse a `Signature-Input` header value, taking its first member.
pub fn parse_signature_input(header: &str) -> Result<SignatureInput, Error> {
    let (label, raw) = split_dictionary(header)
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidSignatureInput("empty Signature-Input".into()))?;

    let rest = raw
        .strip_prefix('(')
        .ok_or_else(|| Error::InvalidSignatureInput("expected inner list of components".into()))?;
    let close = find_unquoted(rest, ')')
        .ok_or_else(|| Error::InvalidSignatureInput("unterminated component list".into()))?;
    let components = parse_component_list(&rest[..close])?;

    let mut keyid = None;
    let mut alg = None;
    let mut created = None;
    let mut expires = None;
    let mut nonce = None;
    for param in split_unquoted(&rest[close + 1..], ';').into_iter().skip(1) {
        let param = param.trim();
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        match key {
            "keyid" => keyid = Some(parse_string(value)?),
            "alg" => alg = Some(parse_string(value)?),
            "created" => created = Some(parse_integer("created", value)?),
            "expires" => expires = Some(parse_integer("expires", value)?),
            "nonce" => nonce = Some(parse_string(value)?),
            _ => {}
        }
    }

    Ok(SignatureInput {
        label: label.to_string(),
        params: SignatureParameters {
            components,
            keyid: keyid.ok_or(Error::KeyIdNotFound)?,
            alg,
            created,
            expires,
            nonce,
        },
        raw: raw.to_string(),
    })
}

/// Extract the signature bytes for `label` from a `Signature` header value.
pub fn parse_signature(header: &str, label: &str) -> Result<Vec<u8>, Error> {
    let value = split_dictionary(header)
        .into_iter()
        .find(|(l, _)| *l == label)
        .map(|(_, v)| v)
        .ok_or_else(|| {
            Error::InvalidSignatureInput(format!("no signature labelled '{label}'"))
        })?;
    let encoded = value
        .strip_prefix(':')
        .and_then(|v| v.strip_suffix(':'))
        .ok_or_else(|| Error::MalformedSignature("signature must be a byte sequence".into()))?;
    crypto::base64_decode(encoded)
        .map_err(|e| Error::MalformedSignature(format!("invalid base64: {e}")))
}

fn parse_component_list(list: &str) -> Result<Vec<String>, Error> {
    let mut components = Vec::new();
    let mut rest = list.trim();
    while !rest.is_empty() {
        let inner = rest
            .strip_prefix('"')
            .ok_or_else(|| Error::InvalidSignatureInput(format!("unquoted component in ({list})")))?;
        let end = inner
            .find('"')
            .ok_or_else(|| Error::InvalidSignatureInput("unterminated component name".into()))?;
        components.push(inner[..end].to_string());
        rest = inner[end + 1..].trim_start();
    }
    Ok(components)
}

fn parse_string(value: &str) -> Result<String, Error> {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .ok_or_else(|| Error::InvalidSignatureInput(format!("expected quoted string, got {value}")))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped @ ('"' | '\\')) => out.push(escaped),
                _ => {
                    return Err(Error::InvalidSignatureInput(
                        "invalid escape in string parameter".into(),
                    ))
                }
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn parse_integer(name: &str, value: &str) -> Result<u64, Error> {
    value
        .parse::<u64>()
        .map_err(|_| Error::InvalidSignatureInput(format!("{name} must be an integer, got {value}")))
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Split a structured dictionary into `(label, value)` members.
fn split_dictionary(header: &str) -> Vec<(&str, &str)> {
    split_unquoted(header, ',')
        .into_iter()
        .filter_map(|member| {
            let member = member.trim();
            let (label, value) = member.split_once('=')?;
            Some((label.trim(), value.trim()))
        })
        .collect()
}

/// Split on `sep` outside quoted strings and parentheses.
fn split_unquoted(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn find_unquoted(input: &str, target: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == target {
            return Some(i);
        }
    }
    None
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Signing(format!("invalid header value: {e}")))
}

/// Generate a random 16-byte hex nonce.
pub fn generate_nonce() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Get the current Unix timestamp in seconds.
pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Ed25519KeyPair;

    const DID: &str = "did:sage:ethereum:0xAAA";

    fn request(method: &str, uri: &str, body: &'static [u8]) -> Request<&'static [u8]> {
        Request::builder().method(method).uri(uri).body(body).unwrap()
    }

    #[test]
    fn params_serialize_format() {
        let params = SignatureParameters {
            components: DEFAULT_COMPONENTS.iter().map(|c| c.to_string()).collect(),
            keyid: DID.into(),
            alg: Some("es256k".into()),
            created: Some(1708123456),
            expires: Some(1708123756),
            nonce: Some("abc".into()),
        };
        assert_eq!(
            params.serialize(),
            "(\"@method\" \"@path\" \"@query\" \"content-digest\");keyid=\"did:sage:ethereum:0xAAA\";alg=\"es256k\";created=1708123456;expires=1708123756;nonce=\"abc\""
        );
    }

    #[test]
    fn parse_signature_input_roundtrip() {
        let params = SignatureParameters {
            components: vec!["@method".into(), "x-task-id".into()],
            keyid: DID.into(),
            alg: Some("ed25519".into()),
            created: Some(10),
            expires: None,
            nonce: Some("q\"uote".into()),
        };
        let header = format!("sig1={}", params.serialize());
        let parsed = parse_signature_input(&header).unwrap();
        assert_eq!(parsed.label, "sig1");
        assert_eq!(parsed.params, params);
        assert_eq!(parsed.raw, params.serialize());
    }

    #[test]
    fn parse_signature_input_without_keyid() {
        let err = parse_signature_input("sig1=(\"@method\");created=1").unwrap_err();
        assert!(matches!(err, Error::KeyIdNotFound));
    }

    #[test]
    fn parse_signature_input_rejects_bad_created() {
        let err = parse_signature_input("sig1=(\"@method\");keyid=\"did:sage:a:b\";created=soon")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignatureInput(_)));
    }

    #[test]
    fn parse_signature_picks_label() {
        let header = "other=:AAAA:, sig1=:AQID:";
        assert_eq!(parse_signature(header, "sig1").unwrap(), vec![1, 2, 3]);
        assert!(parse_signature(header, "sig2").is_err());
    }

    #[test]
    fn signature_base_format() {
        let mut req = request("post", "https://agent.example/task?b=2&a=1", b"{}");
        req.headers_mut()
            .insert("content-digest", HeaderValue::from_static("sha-256=:xyz:"));
        let components: Vec<String> = DEFAULT_COMPONENTS.iter().map(|c| c.to_string()).collect();
        let base = build_signature_base(&req, &components, "PARAMS").unwrap();
        assert_eq!(
            base,
            "\"@method\": POST\n\"@path\": /task\n\"@query\": ?b=2&a=1\n\"content-digest\": sha-256=:xyz:\n\"@signature-params\": PARAMS"
        );
    }

    #[test]
    fn signature_base_empty_query_and_missing_header() {
        let req = request("GET", "/", b"");
        let components = vec!["@query".to_string(), "x-missing".to_string()];
        let base = build_signature_base(&req, &components, "P").unwrap();
        assert_eq!(base, "\"@query\": ?\n\"@signature-params\": P");
    }

    #[test]
    fn signature_base_rejects_unknown_derived_component() {
        let req = request("GET", "/", b"");
        let err = build_signature_base(&req, &["@status".to_string()], "P").unwrap_err();
        assert!(matches!(err, Error::UnsupportedComponent(_)));
    }

    #[test]
    fn authority_falls_back_to_host_header() {
        let mut req = request("GET", "/x", b"");
        req.headers_mut()
            .insert("host", HeaderValue::from_static("Agent.Example:8443"));
        let base = build_signature_base(&req, &["@authority".to_string()], "P").unwrap();
        assert_eq!(base, "\"@authority\": agent.example:8443\n\"@signature-params\": P");
    }

    #[test]
    fn content_digest_known_value() {
        // SHA-256 of the empty string, base64
        assert_eq!(
            content_digest(b""),
            "sha-256=:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=:"
        );
    }

    #[test]
    fn sign_sets_headers() {
        let kp = Ed25519KeyPair::generate();
        let mut req = request("POST", "/task", b"{\"x\":1}");
        sign_request(&mut req, DID, &kp, &SignOptions::default().with_created(1000)).unwrap();

        let input = req.headers()["signature-input"].to_str().unwrap();
        assert!(input.starts_with("sig1=(\"@method\" \"@path\" \"@query\" \"content-digest\")"));
        assert!(input.contains("keyid=\"did:sage:ethereum:0xAAA\""));
        assert!(input.contains("alg=\"ed25519\""));
        assert!(input.contains("created=1000"));

        let sig = req.headers()["signature"].to_str().unwrap();
        assert!(sig.starts_with("sig1=:") && sig.ends_with(':'));
        assert_eq!(
            req.headers()["content-digest"].to_str().unwrap(),
            content_digest(b"{\"x\":1}")
        );
    }

    #[test]
    fn sign_keeps_existing_content_digest() {
        let kp = Ed25519KeyPair::generate();
        let mut req = request("POST", "/task", b"body");
        req.headers_mut()
            .insert("content-digest", HeaderValue::from_static("sha-256=:preset:"));
        sign_request(&mut req, DID, &kp, &SignOptions::default()).unwrap();
        assert_eq!(req.headers()["content-digest"], "sha-256=:preset:");
    }

    #[test]
    fn sign_rejects_empty_did_before_touching_headers() {
        let kp = Ed25519KeyPair::generate();
        let mut req = request("POST", "/task", b"body");
        let err = sign_request(&mut req, "", &kp, &SignOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidDidFormat(_)));
        assert!(req.headers().is_empty());
    }

    #[test]
    fn random_nonce_is_32_hex_chars() {
        let opts = SignOptions::default().with_random_nonce();
        let nonce = opts.nonce.unwrap();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
