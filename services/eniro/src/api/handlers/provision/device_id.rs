//! Self-verifying device identifiers.
//!
//! A device id looks like a UUID whose fifth group is replaced by a short
//! HMAC over the first four, keyed from the server secret via PBKDF2. The
//! server can therefore reject fabricated ids without a database lookup,
//! and ids minted under a different secret never validate.

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

const KDF_ITERATIONS: u32 = 100_000;
const KDF_KEY_LENGTH: usize = 32;
/// Version prefix for salt domain separation.
const KDF_SALT_PREFIX: &[u8] = b"device-id-v1";

/// Hex characters of the HMAC kept as the signature group. Matches the
/// UUID group it replaces.
const SIGNATURE_LENGTH: usize = 12;

fn derive_key(secret: &[u8], salt: &[u8]) -> [u8; KDF_KEY_LENGTH] {
    let mut full_salt = Vec::with_capacity(KDF_SALT_PREFIX.len() + salt.len());
    full_salt.extend_from_slice(KDF_SALT_PREFIX);
    full_salt.extend_from_slice(salt);

    let mut key = [0u8; KDF_KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(secret, &full_salt, KDF_ITERATIONS, &mut key);
    key
}

fn signature_for(first_groups: &str, secret: &[u8]) -> String {
    let key = derive_key(secret, first_groups.as_bytes());
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(first_groups.as_bytes());
    let digest = mac.finalize().into_bytes();
    hex::encode(digest)[..SIGNATURE_LENGTH].to_string()
}

/// Mint a fresh device id under `secret`.
#[must_use]
pub fn generate_device_id(secret: &[u8]) -> String {
    let uuid = Uuid::new_v4().to_string();
    let first_groups = uuid
        .rsplit_once('-')
        .map_or(uuid.as_str(), |(head, _)| head);
    let signature = signature_for(first_groups, secret);
    format!("{first_groups}-{signature}")
}

/// Check that a presented device id was minted under `secret`.
#[must_use]
pub fn verify_device_id(device_id: &str, secret: &[u8]) -> bool {
    // Must still parse as a UUID: four random groups plus the signature.
    if Uuid::parse_str(device_id).is_err() {
        return false;
    }
    let Some((first_groups, provided)) = device_id.rsplit_once('-') else {
        return false;
    };
    if first_groups.split('-').count() != 4 {
        return false;
    }

    let expected = signature_for(first_groups, secret);
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
