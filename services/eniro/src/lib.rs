//! # Eniro (QR entry-access control)
//!
//! `eniro` mediates physical access to entryways. A camera-equipped
//! display renders a rotating QR code that encodes a short-lived entry
//! token; a person scans it with their phone, authenticates over an
//! emailed link or 6-digit code, and is granted entry.
//!
//! ## One-shot grants
//!
//! Every signed token carries a nonce (`jti`) whose presence in the nonce
//! store means "still valid". Consumption is atomic and at-most-once, so a
//! scanned QR, an OTP claim, or a login link can each be redeemed exactly
//! once, and the email link/OTP pair shares a single nonce so the two
//! paths are mutually exclusive.
//!
//! ## Device provisioning
//!
//! Displays self-register on first contact and wait in a pending pool,
//! bound to the client IP they arrived from. An administrator approves a
//! device for a specific entryway via the CLI; only then will the service
//! hand it QR payloads.

pub mod access;
pub mod api;
pub mod cli;
pub mod clock;
pub mod nonce;
pub mod storage;
pub mod tokens;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::APP_USER_AGENT;

    #[test]
    fn app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
