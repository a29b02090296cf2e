//! Session tokens: opaque handles binding requests to a lease.
//!
//! A token carries the lease's public ID, an absolute expiry, and a MAC
//! computed with the lease's own secret:
//!
//! ```text
//! mac = HMAC-SHA256(lease_secret, lease_id ‖ expires_at_ms)
//! ```
//!
//! The wire form is URL-safe base64 over the JSON serialization, so tokens
//! travel safely inside a path segment. Clients treat the value as opaque;
//! only the gateway ever verifies the MAC.
//!
//! Verification is constant-time, and the two failure modes (bad MAC,
//! embedded expiry passed) are distinguished internally but collapse into
//! a single client-visible error at the HTTP boundary.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::lease::{LeaseSecret, PublicId};

type HmacSha256 = Hmac<Sha256>;

/// Errors raised while decoding or verifying a session token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The raw bytes are not a well-formed token.
    #[error("malformed session token")]
    Malformed,

    /// The MAC does not verify under the looked-up secret, or no secret is
    /// known for the embedded lease ID.
    #[error("session token MAC mismatch")]
    InvalidMac,

    /// The token's embedded expiry has passed.
    #[error("session token expired at {expired_at_ms}")]
    Expired {
        /// The embedded expiry, milliseconds since the Unix epoch.
        expired_at_ms: u64,
    },
}

/// The decoded (not yet verified) contents of a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionToken {
    lease_id: PublicId,
    expires_at_ms: u64,
    mac: String,
}

impl SessionToken {
    /// The lease this token claims to belong to.
    ///
    /// Only trustworthy after [`SessionToken::verify`] succeeds; callers
    /// may use it beforehand to look up the candidate lease and its secret.
    #[must_use]
    pub fn lease_id(&self) -> &PublicId {
        &self.lease_id
    }

    /// The embedded absolute expiry in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    /// Decodes the wire form without verifying anything.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Malformed`] if the bytes are not URL-safe
    /// base64 over the expected JSON document.
    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let json = URL_SAFE_NO_PAD
            .decode(raw.as_bytes())
            .map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)
    }

    /// Verifies the MAC in constant time, then the embedded expiry.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidMac`] on MAC mismatch and
    /// [`TokenError::Expired`] if the expiry has passed. The MAC is checked
    /// first so an attacker cannot probe expiry times with forged tokens.
    pub fn verify(&self, secret: &LeaseSecret, now_ms: u64) -> Result<(), TokenError> {
        let claimed = hex::decode(&self.mac).map_err(|_| TokenError::Malformed)?;
        let expected = compute_mac(&self.lease_id, self.expires_at_ms, secret);
        if !bool::from(expected.ct_eq(&claimed)) {
            return Err(TokenError::InvalidMac);
        }
        if now_ms >= self.expires_at_ms {
            return Err(TokenError::Expired {
                expired_at_ms: self.expires_at_ms,
            });
        }
        Ok(())
    }

    /// Encodes the wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("token serialization cannot fail");
        URL_SAFE_NO_PAD.encode(json)
    }
}

/// The verified identity a token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    /// The lease's public ID.
    pub lease_id: PublicId,
    /// The embedded expiry.
    pub expires_at_ms: u64,
}

/// Mints a session token for a freshly granted lease.
#[must_use]
pub fn mint(lease_id: &PublicId, secret: &LeaseSecret, ttl_ms: u64, now_ms: u64) -> String {
    let expires_at_ms = now_ms.saturating_add(ttl_ms);
    let mac = compute_mac(lease_id, expires_at_ms, secret);
    SessionToken {
        lease_id: lease_id.clone(),
        expires_at_ms,
        mac: hex::encode(mac),
    }
    .encode()
}

/// Decodes and verifies a token in one step.
///
/// `lookup` maps the embedded lease ID to its signing secret; returning
/// `None` is reported as [`TokenError::InvalidMac`], indistinguishable from
/// a forged MAC.
///
/// # Errors
///
/// Returns the corresponding [`TokenError`] on any decode or verification
/// failure.
pub fn parse<F>(raw: &str, lookup: F, now_ms: u64) -> Result<ParsedToken, TokenError>
where
    F: FnOnce(&PublicId) -> Option<LeaseSecret>,
{
    let token = SessionToken::decode(raw)?;
    let secret = lookup(&token.lease_id).ok_or(TokenError::InvalidMac)?;
    token.verify(&secret, now_ms)?;
    Ok(ParsedToken {
        lease_id: token.lease_id,
        expires_at_ms: token.expires_at_ms,
    })
}

fn compute_mac(lease_id: &PublicId, expires_at_ms: u64, secret: &LeaseSecret) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(lease_id.as_str().as_bytes());
    mac.update(&expires_at_ms.to_be_bytes());
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (PublicId, LeaseSecret) {
        (PublicId::generate(), LeaseSecret::generate())
    }

    #[test]
    fn mint_then_parse_round_trips() {
        let (id, secret) = fixtures();
        let raw = mint(&id, &secret, 60_000, 1_000);

        let parsed = parse(&raw, |claimed| {
            assert_eq!(claimed, &id);
            Some(secret.clone())
        }, 2_000)
        .unwrap();
        assert_eq!(parsed.lease_id, id);
        assert_eq!(parsed.expires_at_ms, 61_000);
    }

    #[test]
    fn expired_token_is_rejected() {
        let (id, secret) = fixtures();
        let raw = mint(&id, &secret, 1_000, 0);
        let err = parse(&raw, |_| Some(secret.clone()), 1_000).unwrap_err();
        assert_eq!(
            err,
            TokenError::Expired {
                expired_at_ms: 1_000
            }
        );
    }

    #[test]
    fn wrong_secret_is_a_mac_mismatch() {
        let (id, secret) = fixtures();
        let raw = mint(&id, &secret, 60_000, 0);
        let other = LeaseSecret::generate();
        let err = parse(&raw, |_| Some(other), 1).unwrap_err();
        assert_eq!(err, TokenError::InvalidMac);
    }

    #[test]
    fn unknown_lease_is_indistinguishable_from_bad_mac() {
        let (id, secret) = fixtures();
        let raw = mint(&id, &secret, 60_000, 0);
        let err = parse(&raw, |_| None, 1).unwrap_err();
        assert_eq!(err, TokenError::InvalidMac);
    }

    #[test]
    fn any_flipped_byte_invalidates_the_token() {
        let (id, secret) = fixtures();
        let raw = mint(&id, &secret, 60_000, 0);
        let json = URL_SAFE_NO_PAD.decode(raw.as_bytes()).unwrap();

        for i in 0..json.len() {
            let mut tampered = json.clone();
            // Stay within the hex/ASCII alphabet so some mutations still
            // decode; those must fail the MAC instead.
            tampered[i] = if tampered[i] == b'a' { b'b' } else { b'a' };
            let reencoded = URL_SAFE_NO_PAD.encode(&tampered);
            let result = parse(&reencoded, |_| Some(secret.clone()), 1);
            assert!(
                result.is_err(),
                "tampering byte {i} should not yield a valid token"
            );
        }
    }

    #[test]
    fn garbage_input_is_malformed() {
        assert_eq!(
            SessionToken::decode("not base64 !!!").unwrap_err(),
            TokenError::Malformed
        );
        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert_eq!(
            SessionToken::decode(&not_json).unwrap_err(),
            TokenError::Malformed
        );
    }

    #[test]
    fn mac_check_precedes_expiry_check() {
        let (id, secret) = fixtures();
        let raw = mint(&id, &secret, 1_000, 0);
        let other = LeaseSecret::generate();
        // Token is both expired and wrongly signed; MAC failure wins.
        let err = parse(&raw, |_| Some(other), 5_000).unwrap_err();
        assert_eq!(err, TokenError::InvalidMac);
    }
}
