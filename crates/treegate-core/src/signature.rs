//! HMAC verification of mutating gateway requests.
//!
//! Publishers sign every mutating request with a per-key shared secret:
//!
//! ```text
//! Authorization: <key_id> <base64(HMAC-SHA1(secret, signed_material))>
//! ```
//!
//! Which bytes constitute the signed material depends on the route (the
//! request body for new-lease requests, the token path segment for
//! commit/drop/submit, a bounded body prefix for legacy submits); that
//! selection lives with the HTTP layer. This module owns the pieces that
//! are route-independent: header parsing, secret lookup, MAC computation,
//! and the constant-time comparison.
//!
//! # Security Properties
//!
//! - Comparison uses the `subtle` crate, so verification time does not
//!   depend on where the MACs diverge.
//! - Secrets are held as [`SecretString`] and never logged.
//! - All failure modes collapse into one client-visible `invalid_hmac`
//!   error; the distinctions below exist for logging only.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

/// Errors raised during request signature verification.
///
/// Handlers report all of these to the client as `invalid_hmac`; the
/// variants exist so logs can tell a missing header from a forged MAC.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SignatureError {
    /// The `Authorization` header is absent or not `key_id SP base64`.
    #[error("malformed authorization header")]
    MalformedHeader,

    /// No secret is configured for the presented key ID.
    #[error("unknown key id")]
    UnknownKey,

    /// The presented MAC does not match the signed material.
    #[error("signature mismatch")]
    Mismatch,
}

/// Maps key IDs to their shared secrets.
///
/// Implemented by the gateway's access configuration; the lookup table is
/// read-only at request time.
pub trait SecretLookup: Send + Sync {
    /// Returns the secret for `key_id`, or `None` if the key is unknown.
    fn secret(&self, key_id: &str) -> Option<SecretString>;
}

/// A parsed `Authorization` header: the claimed key and its decoded MAC.
#[derive(Debug, Clone)]
pub struct RequestSignature {
    key_id: String,
    mac: Vec<u8>,
}

impl RequestSignature {
    /// Parses `key_id SP base64(mac)` from the raw header value.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::MalformedHeader`] unless the value is
    /// exactly two tokens and the second is valid base64.
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut tokens = header.split_whitespace();
        let (Some(key_id), Some(mac_b64), None) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(SignatureError::MalformedHeader);
        };
        let mac = STANDARD
            .decode(mac_b64)
            .map_err(|_| SignatureError::MalformedHeader)?;
        Ok(Self {
            key_id: key_id.to_string(),
            mac,
        })
    }

    /// The key ID the client claims to sign with.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Verifies this signature over `material` using `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::UnknownKey`] if the key has no configured
    /// secret and [`SignatureError::Mismatch`] if the MAC does not verify.
    pub fn verify(
        &self,
        material: &[u8],
        lookup: &dyn SecretLookup,
    ) -> Result<(), SignatureError> {
        let secret = lookup
            .secret(&self.key_id)
            .ok_or(SignatureError::UnknownKey)?;
        let expected = compute_mac(&secret, material);
        if bool::from(expected.ct_eq(&self.mac)) {
            Ok(())
        } else {
            tracing::warn!(key_id = %self.key_id, "request signature mismatch");
            Err(SignatureError::Mismatch)
        }
    }
}

/// Computes `HMAC-SHA1(secret, material)`.
///
/// Exposed so tests and client tooling can produce valid signatures.
#[must_use]
pub fn compute_mac(secret: &SecretString, material: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(secret.expose_secret().as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(material);
    mac.finalize().into_bytes().to_vec()
}

/// Renders the `Authorization` header value a client would send.
#[must_use]
pub fn authorization_header(key_id: &str, secret: &SecretString, material: &[u8]) -> String {
    format!("{key_id} {}", STANDARD.encode(compute_mac(secret, material)))
}
