//! Claim payloads carried by signed entry-access tokens.
//!
//! Every variant embeds [`RegisteredClaims`]: a unique nonce (`jti`), the
//! issue/expiry window, and an optional audience list. The `jti` doubles as
//! the single-use nonce; a token is only honored while its nonce is still
//! present in the nonce store.

use serde::{Deserialize, Serialize};

/// Audience accepted by the email-link click handler.
pub const AUD_EMAIL_LINK: &str = "email_link";
/// Audience accepted by the OTP verification handler.
pub const AUD_EMAIL_OTP: &str = "email_otp";
/// Audience that performs a login on the presenting browser.
pub const AUD_EMAIL_LOGIN: &str = "email_login";

/// Shared header fields present in every claim variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredClaims {
    /// Nonce, also the single-use identity of the token.
    pub jti: String,
    /// Issue time, unix seconds UTC.
    pub iat: i64,
    /// Expiry time, unix seconds UTC. The token is valid in `[iat, exp)`.
    pub exp: i64,
    /// Audience tags. Empty for variants bound to a single verifier.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
}

impl RegisteredClaims {
    #[must_use]
    pub fn new(jti: String, now: i64, ttl_seconds: i64) -> Self {
        Self {
            jti,
            iat: now,
            exp: now + ttl_seconds,
            aud: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_audience(mut self, aud: &str) -> Self {
        self.aud = vec![aud.to_string()];
        self
    }

    /// Remaining lifetime in seconds, negative once expired.
    #[must_use]
    pub fn remaining(&self, now: i64) -> i64 {
        self.exp - now
    }
}

/// Payload types that can be signed and verified.
pub trait Claims: Serialize + for<'de> Deserialize<'de> {
    fn registered(&self) -> &RegisteredClaims;
}

/// Short-lived token rendered as a QR code on the entryway display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryClaims {
    pub entry_id: i64,
    #[serde(flatten)]
    pub registered: RegisteredClaims,
}

impl Claims for EntryClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }
}

/// Binds a device registration intent to the requesting client IP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceProvisionClaims {
    pub device_id: String,
    pub client_ip: String,
    #[serde(flatten)]
    pub registered: RegisteredClaims,
}

impl Claims for DeviceProvisionClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }
}

/// Paired email-link / email-OTP claim.
///
/// The same base payload is signed twice with different audiences; both
/// copies share one `jti`, so consuming either invalidates the other.
/// `verify` is an HMAC fingerprint of the OTP, never the OTP itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessCodeClaims {
    /// HMAC fingerprint binding the 6-digit code to the server secret.
    pub verify: String,
    pub email: String,
    pub entry_id: i64,
    /// When true the bearer logs in directly instead of signalling the
    /// waiting scanner (the `email_login` variant derived for SSE hand-off).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auth: bool,
    #[serde(flatten)]
    pub registered: RegisteredClaims,
}

impl Claims for AccessCodeClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }
}

impl AccessCodeClaims {
    /// Re-tag a copy of this claim with another audience, keeping the shared
    /// `jti` so the pair stays mutually exclusive.
    #[must_use]
    pub fn with_audience(&self, aud: &str) -> Self {
        let mut claims = self.clone();
        claims.registered.aud = vec![aud.to_string()];
        claims
    }
}

/// Long-lived session claim stored in the `auth_token` cookie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// User identifier, currently the email address.
    pub uid: String,
    /// Marks a session that must be rotated on next touch.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub renew: bool,
    #[serde(flatten)]
    pub registered: RegisteredClaims,
}

impl Claims for SessionClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_claims_window() {
        let claims = RegisteredClaims::new("nonce".to_string(), 1_700_000_000, 60);
        assert_eq!(claims.iat, 1_700_000_000);
        assert_eq!(claims.exp, 1_700_000_060);
        assert_eq!(claims.remaining(1_700_000_030), 30);
        assert!(claims.remaining(1_700_000_090) < 0);
    }

    #[test]
    fn audience_is_omitted_when_empty() {
        let claims = EntryClaims {
            entry_id: 1,
            registered: RegisteredClaims::new("n".to_string(), 0, 60),
        };
        let json = serde_json::to_string(&claims).expect("serialize");
        assert!(!json.contains("aud"));
    }

    #[test]
    fn access_code_retag_keeps_jti() {
        let base = AccessCodeClaims {
            verify: "fingerprint".to_string(),
            email: "alice@example.com".to_string(),
            entry_id: 42,
            auth: false,
            registered: RegisteredClaims::new("shared".to_string(), 0, 600)
                .with_audience(AUD_EMAIL_OTP),
        };
        let link = base.with_audience(AUD_EMAIL_LINK);
        assert_eq!(link.registered.jti, base.registered.jti);
        assert_eq!(link.registered.aud, vec![AUD_EMAIL_LINK.to_string()]);
    }

    #[test]
    fn auth_flag_is_omitted_when_false() {
        let base = AccessCodeClaims {
            verify: "v".to_string(),
            email: "a@b.co".to_string(),
            entry_id: 1,
            auth: false,
            registered: RegisteredClaims::new("n".to_string(), 0, 60),
        };
        let json = serde_json::to_string(&base).expect("serialize");
        assert!(!json.contains("\"auth\""));

        let json = serde_json::to_string(&AccessCodeClaims { auth: true, ..base }).expect("serialize");
        assert!(json.contains("\"auth\":true"));
    }
}
