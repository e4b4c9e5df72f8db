//! # `entry_token`
//!
//! Signed, nonce-bearing claims for the eniro entry-access service.
//!
//! The crate is a pure signing/verification library: it performs no I/O and
//! does not know about the nonce store. Issuers generate the `jti` nonce,
//! persist it, then sign; verifiers decode, then decide when (or whether)
//! to consume the nonce. Four claim variants exist:
//!
//! - [`EntryClaims`] — the rotating QR token shown on an entryway display.
//! - [`DeviceProvisionClaims`] — binds a device registration to a client IP.
//! - [`AccessCodeClaims`] — the email-link / email-OTP pair; both halves
//!   share one `jti`, tagged apart by audience.
//! - [`SessionClaims`] — the long-lived `auth_token` cookie payload.
//!
//! Only HS256 is accepted; the allow-list is enforced before the signature
//! is checked.

mod claims;
mod error;
mod jwt;

pub use claims::{
    AUD_EMAIL_LINK, AUD_EMAIL_LOGIN, AUD_EMAIL_OTP, AccessCodeClaims, Claims,
    DeviceProvisionClaims, EntryClaims, RegisteredClaims, SessionClaims,
};
pub use error::Error;
pub use jwt::{sign, verify};
