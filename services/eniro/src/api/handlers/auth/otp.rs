//! One-time code generation and fingerprinting.
//!
//! The 6-digit code is never stored: the claims carry
//! `base64(HMAC-SHA256(KDF(secret), code))` where the KDF is Argon2id with
//! a process-wide fixed salt. Recomputing the fingerprint from a submitted
//! code and comparing constant-time is enough to validate it, and a leaked
//! claim reveals nothing usable without the server secret.

use anyhow::{Context, Result, anyhow};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::{Rng, rngs::OsRng};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Fixed salt for the code-key derivation; domain-separates this KDF use
/// from any other use of the server secret.
const CODE_KEY_SALT: &[u8] = b"eniro/access-code/v1:xRj9VwK2mQ7pZ4sL8nT3";

const KDF_TIME_COST: u32 = 3;
const KDF_MEMORY_KIB: u32 = 64 * 1024;
const KDF_PARALLELISM: u32 = 4;
const KDF_OUTPUT_LEN: usize = 32;

/// Uniform random 6-digit code, zero-padded.
#[must_use]
pub fn generate_otp() -> String {
    let code: u32 = OsRng.gen_range(0..1_000_000);
    format!("{code:06}")
}

fn derive_key(secret: &[u8]) -> Result<[u8; KDF_OUTPUT_LEN]> {
    let params = Params::new(
        KDF_MEMORY_KIB,
        KDF_TIME_COST,
        KDF_PARALLELISM,
        Some(KDF_OUTPUT_LEN),
    )
    .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KDF_OUTPUT_LEN];
    argon2
        .hash_password_into(secret, CODE_KEY_SALT, &mut key)
        .map_err(|err| anyhow!("key derivation failed: {err}"))?;
    Ok(key)
}

/// Fingerprint a code under the server secret.
///
/// # Errors
///
/// Returns an error if key derivation fails.
pub fn otp_encode(otp: &str, secret: &[u8]) -> Result<String> {
    let key = derive_key(secret)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).context("invalid hmac key")?;
    mac.update(otp.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a submitted code against a claim fingerprint.
#[must_use]
pub fn otp_verify(otp: &str, secret: &[u8], expected: &str) -> bool {
    let Ok(computed) = otp_encode(otp, secret) else {
        return false;
    };
    computed.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..16 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn encode_is_deterministic_per_secret() -> Result<()> {
        let first = otp_encode("123456", SECRET)?;
        let second = otp_encode("123456", SECRET)?;
        assert_eq!(first, second);

        let other_code = otp_encode("654321", SECRET)?;
        assert_ne!(first, other_code);

        let other_secret = otp_encode("123456", b"another-secret")?;
        assert_ne!(first, other_secret);
        Ok(())
    }

    #[test]
    fn verify_accepts_only_the_matching_code() -> Result<()> {
        let fingerprint = otp_encode("042731", SECRET)?;
        assert!(otp_verify("042731", SECRET, &fingerprint));
        assert!(!otp_verify("042732", SECRET, &fingerprint));
        assert!(!otp_verify("042731", b"wrong", &fingerprint));
        assert!(!otp_verify("042731", SECRET, "garbage"));
        Ok(())
    }
}
