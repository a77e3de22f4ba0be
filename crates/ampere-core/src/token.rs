//! Signed tokens for the client store and session snapshot
//!
//! A token is `base64url(json payload) "." base64url(hmac)`. The MAC covers
//! the purpose label as well as the payload, so a token issued for the store
//! does not verify as a session token and vice versa.
//!
//! Tokens are signed, not encrypted: anyone holding one can read the payload
//! with [`inspect`].
//!
//! Verification failures are reported through [`TokenCodec::verify`]. The only
//! place they are swallowed is [`TokenCodec::verify_or_empty`], which the hub
//! calls when a client attaches: a stale or tampered token must degrade to an
//! empty store instead of failing the attach.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Separator between payload and signature
const SEPARATOR: char = '.';

/// Length of generated secrets
const GENERATED_SECRET_LEN: usize = 32;

/// What a token is allowed to be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    /// Client key/value store
    Store,
    /// Read-only session snapshot
    Session,
}

impl TokenPurpose {
    /// Context label mixed into the signature
    pub fn label(&self) -> &'static str {
        match self {
            TokenPurpose::Store => "ampere.store",
            TokenPurpose::Session => "ampere.session",
        }
    }
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors from token verification
#[derive(Error, Debug)]
pub enum TokenError {
    /// Token is not `payload.signature`
    #[error("Malformed token")]
    Malformed,

    /// A segment is not valid base64url
    #[error("Invalid token encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Signature does not match the payload under this purpose
    #[error("Token signature mismatch for {purpose}")]
    BadSignature { purpose: TokenPurpose },

    /// Payload is not the expected JSON shape
    #[error("Invalid token payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Signs and verifies tokens with a server-side secret
pub struct TokenCodec {
    key: hmac::Key,
}

impl TokenCodec {
    /// Create a codec from secret material
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Create a codec with a freshly generated random secret
    ///
    /// Tokens signed by this codec do not verify after a restart.
    pub fn generate() -> anyhow::Result<Self> {
        let rng = SystemRandom::new();
        let mut secret = [0u8; GENERATED_SECRET_LEN];
        rng.fill(&mut secret)
            .map_err(|_| anyhow::anyhow!("Failed to generate signing secret"))?;
        Ok(Self::new(&secret))
    }

    /// Serialize and sign `value` for `purpose`
    pub fn sign<T: Serialize>(&self, purpose: TokenPurpose, value: &T) -> Result<String, TokenError> {
        let json = serde_json::to_vec(value)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let tag = hmac::sign(&self.key, &signing_input(purpose, &payload));

        Ok(format!(
            "{}{}{}",
            payload,
            SEPARATOR,
            URL_SAFE_NO_PAD.encode(tag.as_ref())
        ))
    }

    /// Verify `token` under `purpose` and decode its payload
    pub fn verify<T: DeserializeOwned>(
        &self,
        purpose: TokenPurpose,
        token: &str,
    ) -> Result<T, TokenError> {
        let (payload, signature) = split(token)?;
        let signature = URL_SAFE_NO_PAD.decode(signature)?;

        hmac::verify(&self.key, &signing_input(purpose, payload), &signature)
            .map_err(|_| TokenError::BadSignature { purpose })?;

        let json = URL_SAFE_NO_PAD.decode(payload)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Verify `token`, falling back to the empty value on any failure
    pub fn verify_or_empty<T: DeserializeOwned + Default>(&self, purpose: TokenPurpose, token: &str) -> T {
        match self.verify(purpose, token) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(purpose = %purpose, error = %e, "Discarding unverifiable token");
                T::default()
            }
        }
    }
}

/// Decode a token's payload without checking its signature
pub fn inspect<T: DeserializeOwned>(token: &str) -> Result<T, TokenError> {
    let (payload, _) = split(token)?;
    let json = URL_SAFE_NO_PAD.decode(payload)?;
    Ok(serde_json::from_slice(&json)?)
}

fn split(token: &str) -> Result<(&str, &str), TokenError> {
    match token.split_once(SEPARATOR) {
        Some((payload, signature)) if !payload.is_empty() && !signature.is_empty() => {
            Ok((payload, signature))
        }
        _ => Err(TokenError::Malformed),
    }
}

fn signing_input(purpose: TokenPurpose, payload: &str) -> Vec<u8> {
    let label = purpose.label().as_bytes();
    let mut input = Vec::with_capacity(label.len() + 1 + payload.len());
    input.extend_from_slice(label);
    input.push(0);
    input.extend_from_slice(payload.as_bytes());
    input
}
