//! Token issuance and verification on top of the nonce store.
//!
//! `entry_token` itself performs no I/O; this service owns the ordering:
//! the nonce is generated and stored *before* the token is signed, and a
//! failed store write aborts issuance so no unrevokable token can exist.
//! Verification never consumes the nonce. Consumption is a separate call,
//! because the three consumers need different orderings: the SSE notifier
//! observes a paired `jti` without destroying it, the OTP verifier consumes
//! only after the code matches, and logout consumes a token that is
//! otherwise still valid.

use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use entry_token::{
    AUD_EMAIL_LINK, AUD_EMAIL_LOGIN, AUD_EMAIL_OTP, AccessCodeClaims, Claims,
    DeviceProvisionClaims, EntryClaims, RegisteredClaims, SessionClaims,
};

use crate::clock::unix_now;
use crate::nonce::{NonceError, NonceStore, generate_nonce};

/// Nonce rows outlive their token by this margin to absorb clock skew.
pub const NONCE_TTL_MARGIN_SECONDS: i64 = 10;

/// Device provision tokens are valid for five minutes.
pub const DEVICE_PROVISION_TTL_SECONDS: i64 = 5 * 60;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Token(#[from] entry_token::Error),
    #[error(transparent)]
    Nonce(#[from] NonceError),
}

/// The email-link / email-OTP pair produced for one login attempt.
#[derive(Debug, Clone)]
pub struct AccessCodePair {
    /// `email_otp` token, returned to the scanner for code entry.
    pub otp_token: String,
    /// `email_link` token, embedded in the emailed URL.
    pub link_token: String,
    /// The shared base claim (OTP audience variant).
    pub claims: AccessCodeClaims,
}

pub struct TokenService {
    secret: Vec<u8>,
    store: Arc<dyn NonceStore>,
}

impl TokenService {
    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns [`entry_token::Error::SecretUnset`] when the secret is empty
    /// in a release build. Debug builds log a warning and continue.
    pub fn new(secret: &str, store: Arc<dyn NonceStore>) -> Result<Self, entry_token::Error> {
        if secret.is_empty() {
            if cfg!(debug_assertions) {
                warn!("signing secret is not set, do not use in production");
            } else {
                return Err(entry_token::Error::SecretUnset);
            }
        }
        Ok(Self {
            secret: secret.as_bytes().to_vec(),
            store,
        })
    }

    /// Generate registered claims with a freshly stored nonce.
    ///
    /// # Errors
    ///
    /// Fails when the nonce cannot be generated or stored; issuance must
    /// not proceed past a failed store write.
    async fn registered(&self, ttl_seconds: i64) -> Result<RegisteredClaims, TokenError> {
        let jti = generate_nonce()?;
        self.store
            .put(&jti, ttl_seconds + NONCE_TTL_MARGIN_SECONDS)
            .await?;
        Ok(RegisteredClaims::new(jti, unix_now(), ttl_seconds))
    }

    /// # Errors
    /// Fails on nonce storage or signing failure.
    pub async fn issue_entry(
        &self,
        entry_id: i64,
        ttl_seconds: i64,
    ) -> Result<(String, EntryClaims), TokenError> {
        let claims = EntryClaims {
            entry_id,
            registered: self.registered(ttl_seconds).await?,
        };
        let token = entry_token::sign(&self.secret, &claims)?;
        Ok((token, claims))
    }

    /// # Errors
    /// Fails on nonce storage or signing failure.
    pub async fn issue_device_provision(
        &self,
        device_id: &str,
        client_ip: &str,
    ) -> Result<String, TokenError> {
        let claims = DeviceProvisionClaims {
            device_id: device_id.to_string(),
            client_ip: client_ip.to_string(),
            registered: self.registered(DEVICE_PROVISION_TTL_SECONDS).await?,
        };
        Ok(entry_token::sign(&self.secret, &claims)?)
    }

    /// Issue the paired `email_otp` / `email_link` tokens. Both carry the
    /// same `jti`, so consuming one invalidates the other.
    ///
    /// # Errors
    /// Fails on nonce storage or signing failure.
    pub async fn issue_access_code_pair(
        &self,
        verify: &str,
        email: &str,
        entry_id: i64,
        ttl_seconds: i64,
    ) -> Result<AccessCodePair, TokenError> {
        let base = AccessCodeClaims {
            verify: verify.to_string(),
            email: email.to_string(),
            entry_id,
            auth: false,
            registered: self.registered(ttl_seconds).await?,
        };

        let otp_claims = base.with_audience(AUD_EMAIL_OTP);
        let link_claims = base.with_audience(AUD_EMAIL_LINK);
        Ok(AccessCodePair {
            otp_token: entry_token::sign(&self.secret, &otp_claims)?,
            link_token: entry_token::sign(&self.secret, &link_claims)?,
            claims: otp_claims,
        })
    }

    /// Derive the `email_login` variant used for the SSE hand-off. The
    /// nonce is shared with the base claim; nothing new is stored.
    ///
    /// # Errors
    /// Fails on signing failure.
    pub fn derive_login_token(&self, base: &AccessCodeClaims) -> Result<String, TokenError> {
        let mut claims = base.with_audience(AUD_EMAIL_LOGIN);
        claims.auth = true;
        Ok(entry_token::sign(&self.secret, &claims)?)
    }

    /// # Errors
    /// Fails on nonce storage or signing failure.
    pub async fn issue_session(
        &self,
        uid: &str,
        ttl_seconds: i64,
    ) -> Result<(String, SessionClaims), TokenError> {
        let claims = SessionClaims {
            uid: uid.to_string(),
            renew: false,
            registered: self.registered(ttl_seconds).await?,
        };
        let token = entry_token::sign(&self.secret, &claims)?;
        Ok((token, claims))
    }

    /// Decode and validate a token without touching its nonce.
    ///
    /// # Errors
    /// Propagates [`entry_token::Error`] verification failures.
    pub fn verify<T: Claims>(
        &self,
        token: &str,
        expected_audiences: &[&str],
    ) -> Result<T, entry_token::Error> {
        entry_token::verify(&self.secret, token, expected_audiences, unix_now())
    }

    /// Verify that the claim is still active: signature-valid claims whose
    /// nonce has been consumed are dead.
    pub async fn nonce_active(&self, claims: &RegisteredClaims) -> bool {
        self.store.exists(&claims.jti).await
    }

    /// Single-use consumption of the claim's nonce.
    ///
    /// # Errors
    /// Returns [`NonceError::Missing`] when the nonce is absent or already
    /// used, [`NonceError::Expired`] when it outlived its TTL.
    pub async fn consume_nonce(&self, claims: &RegisteredClaims) -> Result<(), NonceError> {
        self.store.consume(&claims.jti).await
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn NonceStore> {
        &self.store
    }

    /// The process-wide signing secret, shared with the OTP fingerprint
    /// KDF and the device-id scheme.
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::MemoryStore;
    use anyhow::Result;
    use std::time::Duration;

    fn service() -> Result<TokenService> {
        let store = MemoryStore::spawn(Duration::from_secs(60));
        Ok(TokenService::new("test-secret", store)?)
    }

    #[tokio::test]
    async fn issued_entry_token_is_active() -> Result<()> {
        let service = service()?;
        let (token, claims) = service.issue_entry(42, 60).await?;

        let verified: EntryClaims = service.verify(&token, &[])?;
        assert_eq!(verified.entry_id, 42);
        assert_eq!(verified.registered.jti, claims.registered.jti);
        assert!(service.nonce_active(&verified.registered).await);
        Ok(())
    }

    #[tokio::test]
    async fn consume_is_single_use() -> Result<()> {
        let service = service()?;
        let (_, claims) = service.issue_entry(1, 60).await?;

        service.consume_nonce(&claims.registered).await?;
        assert!(!service.nonce_active(&claims.registered).await);
        assert!(matches!(
            service.consume_nonce(&claims.registered).await,
            Err(NonceError::Missing)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn paired_tokens_share_one_nonce() -> Result<()> {
        let service = service()?;
        let pair = service
            .issue_access_code_pair("fingerprint", "alice@example.com", 42, 600)
            .await?;

        let otp: AccessCodeClaims = service.verify(&pair.otp_token, &[AUD_EMAIL_OTP])?;
        let link: AccessCodeClaims = service.verify(&pair.link_token, &[AUD_EMAIL_LINK])?;
        assert_eq!(otp.registered.jti, link.registered.jti);

        // Consuming via one path kills the other: signature still verifies,
        // nonce consumption fails.
        service.consume_nonce(&otp.registered).await?;
        let link_again: AccessCodeClaims = service.verify(&pair.link_token, &[AUD_EMAIL_LINK])?;
        assert!(matches!(
            service.consume_nonce(&link_again.registered).await,
            Err(NonceError::Missing)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn derived_login_token_reuses_the_nonce() -> Result<()> {
        let service = service()?;
        let pair = service
            .issue_access_code_pair("fingerprint", "alice@example.com", 42, 600)
            .await?;

        let login_token = service.derive_login_token(&pair.claims)?;
        let login: AccessCodeClaims = service.verify(&login_token, &[AUD_EMAIL_LOGIN])?;
        assert!(login.auth);
        assert_eq!(login.registered.jti, pair.claims.registered.jti);
        Ok(())
    }

    #[tokio::test]
    async fn cross_audience_verification_fails() -> Result<()> {
        let service = service()?;
        let pair = service
            .issue_access_code_pair("fingerprint", "alice@example.com", 42, 600)
            .await?;

        let result: Result<AccessCodeClaims, _> =
            service.verify(&pair.otp_token, &[AUD_EMAIL_LINK]);
        assert!(matches!(result, Err(entry_token::Error::InvalidAudience)));
        Ok(())
    }

    #[tokio::test]
    async fn issuance_fails_when_the_store_rejects_the_nonce() -> Result<()> {
        use async_trait::async_trait;

        struct FailingStore;

        #[async_trait]
        impl NonceStore for FailingStore {
            async fn put(&self, _: &str, _: i64) -> Result<(), NonceError> {
                Err(NonceError::Database(sqlx::Error::PoolClosed))
            }
            async fn consume(&self, _: &str) -> Result<(), NonceError> {
                Err(NonceError::Missing)
            }
            async fn exists(&self, _: &str) -> bool {
                false
            }
            async fn expire(&self, _: i64) -> Result<(), NonceError> {
                Ok(())
            }
            fn close(&self) {}
        }

        let service = TokenService::new("test-secret", Arc::new(FailingStore))?;
        let result = service.issue_entry(1, 60).await;
        assert!(matches!(result, Err(TokenError::Nonce(_))));
        Ok(())
    }
}
