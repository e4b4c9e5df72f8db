//! Authentication handlers: sessions, the email login choreography, and
//! its server-push status stream.

pub mod email_login;
pub mod otp;
pub mod send_cache;
pub mod session;
pub mod status_stream;
