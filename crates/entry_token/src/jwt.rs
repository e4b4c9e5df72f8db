//! Compact HS256 token signing and verification.
//!
//! Tokens are three dot-separated base64url segments (header, payload,
//! signature) without padding. The algorithm allow-list is fixed to HS256;
//! any other `alg` value is rejected before signature verification to rule
//! out algorithm-confusion downgrades.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;

use crate::claims::Claims;
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(segment: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn mac(secret: &[u8]) -> Result<HmacSha256, Error> {
    // HMAC accepts keys of any length, the empty development key included;
    // release builds refuse an unset secret before this layer is reached.
    HmacSha256::new_from_slice(secret).map_err(|_| Error::SecretUnset)
}

/// Sign a claim payload with HS256.
///
/// # Errors
///
/// Returns a JSON error if the claims cannot be serialized.
pub fn sign<T: Claims>(secret: &[u8], claims: &T) -> Result<String, Error> {
    let header_b64 = b64e_json(&TokenHeader::hs256())?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = mac(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an HS256 token and return its decoded claims.
///
/// `expected_audiences` lists the audiences the verifier accepts: an empty
/// slice means the claim must carry no audience; otherwise the claim's
/// audience list must intersect it. Audience mismatch is reported as a
/// generic validation failure rather than a structural one, so callers do
/// not leak which variant a token belongs to.
///
/// The nonce (`jti`) is deliberately *not* consumed here; callers control
/// consumption ordering through the nonce store.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the header algorithm is not HS256,
/// - the signature does not match,
/// - `now` is outside `[iat, exp)`,
/// - the audience check fails.
pub fn verify<T: Claims>(
    secret: &[u8],
    token: &str,
    expected_audiences: &[&str],
    now: i64,
) -> Result<T, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() || header_b64.is_empty() || claims_b64.is_empty() {
        return Err(Error::TokenFormat);
    }

    let header: TokenHeader = b64d_json(header_b64)?;
    if header.alg != "HS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;

    let mut mac = mac(secret)?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)?;

    let claims: T = b64d_json(claims_b64)?;
    let registered = claims.registered();
    if now >= registered.exp {
        return Err(Error::Expired);
    }
    if now < registered.iat {
        return Err(Error::NotYetValid);
    }

    if expected_audiences.is_empty() {
        if !registered.aud.is_empty() {
            return Err(Error::InvalidAudience);
        }
    } else if !registered
        .aud
        .iter()
        .any(|aud| expected_audiences.contains(&aud.as_str()))
    {
        return Err(Error::InvalidAudience);
    }

    Ok(claims)
}
