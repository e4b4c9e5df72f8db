//! Error taxonomy with stable client-facing codes.
//!
//! Every failure a handler can surface maps to one kind, one HTTP status,
//! and one stop code the client can branch on. 5xx responses never carry
//! internal causes; the detail stays in the log.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use tracing::{error, warn};

use crate::nonce::NonceError;
use crate::tokens::TokenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Authentication
    AuthRequired,
    InvalidToken,
    TokenExpired,
    InvalidNonce,
    VerifyTokenUsed,
    // Authorization
    Forbidden,
    InsufficientPermissions,
    // Device provisioning
    DeviceIdRequired,
    DevicePending,
    DeviceRejected,
    DeviceNotFound,
    IpMismatch,
    // Validation
    InvalidRequest,
    MissingParameter,
    InvalidParameter,
    // Internal
    Internal,
    Database,
    ServiceUnavailable,
}

impl ErrorKind {
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::AuthRequired
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::InvalidNonce => StatusCode::UNAUTHORIZED,
            Self::VerifyTokenUsed
            | Self::DeviceIdRequired
            | Self::InvalidRequest
            | Self::MissingParameter
            | Self::InvalidParameter => StatusCode::BAD_REQUEST,
            Self::Forbidden
            | Self::InsufficientPermissions
            | Self::DeviceRejected
            | Self::IpMismatch => StatusCode::FORBIDDEN,
            Self::DevicePending => StatusCode::ACCEPTED,
            Self::DeviceNotFound => StatusCode::NOT_FOUND,
            Self::Internal | Self::Database => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::InvalidToken => "AUTH_INVALID_TOKEN",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::InvalidNonce => "AUTH_INVALID_NONCE",
            Self::VerifyTokenUsed => "VERIFY_TOKEN_USED",
            Self::Forbidden => "FORBIDDEN",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::DeviceIdRequired => "DEVICE_ID_REQUIRED",
            Self::DevicePending => "DEVICE_PENDING",
            Self::DeviceRejected => "DEVICE_REJECTED",
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::IpMismatch => "IP_MISMATCH",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::MissingParameter => "MISSING_PARAMETER",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::Internal => "INTERNAL",
            Self::Database => "DATABASE",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::AuthRequired => "Authentication required",
            Self::InvalidToken => "Invalid or expired authentication token",
            Self::TokenExpired => "Authentication token has expired",
            Self::InvalidNonce => "Invalid or reused token",
            Self::VerifyTokenUsed => {
                "This login code has already been used. Please request a new login link."
            }
            Self::Forbidden => "Access denied",
            Self::InsufficientPermissions => {
                "You don't have permission to perform this action"
            }
            Self::DeviceIdRequired => "Device ID is required",
            Self::DevicePending => "Device is pending approval",
            Self::DeviceRejected => "Device access has been rejected",
            Self::DeviceNotFound => "Device not found",
            Self::IpMismatch => "Request from unauthorized IP address",
            Self::InvalidRequest => "Invalid request format",
            Self::MissingParameter => "Required parameter is missing",
            Self::InvalidParameter => "Invalid parameter value",
            Self::Internal => "An internal error occurred",
            Self::Database => "Database operation failed",
            Self::ServiceUnavailable => "Service is temporarily unavailable",
        }
    }
}

/// A handler failure carrying its public shape and an optional private
/// cause for the log.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: Option<String>,
    cause: Option<anyhow::Error>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            cause: None,
        }
    }

    /// Override the public message. Ignored for 5xx kinds, which always
    /// render their generic message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        if self.kind.status().is_server_error() {
            return self.kind.default_message();
        }
        self.message
            .as_deref()
            .unwrap_or_else(|| self.kind.default_message())
    }
}

impl From<ErrorKind> for ApiError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<entry_token::Error> for ApiError {
    fn from(err: entry_token::Error) -> Self {
        match err {
            entry_token::Error::Expired => Self::new(ErrorKind::TokenExpired),
            other => Self::new(ErrorKind::InvalidToken).with_source(other.into()),
        }
    }
}

impl From<NonceError> for ApiError {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::Missing | NonceError::Expired { .. } => {
                Self::new(ErrorKind::InvalidNonce)
            }
            other => Self::new(ErrorKind::Database).with_source(other.into()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Token(err) => err.into(),
            TokenError::Nonce(err) => err.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(ErrorKind::Internal).with_source(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    code: Vec<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        if status.is_server_error() {
            error!(
                code = self.kind.code(),
                status = status.as_u16(),
                cause = ?self.cause,
                "request failed with server error"
            );
        } else if status.is_client_error() {
            warn!(
                code = self.kind.code(),
                status = status.as_u16(),
                "request failed with client error"
            );
        }

        let body = ErrorBody {
            success: false,
            status: "error",
            message: self.message().to_string(),
            code: vec![self.kind.code()],
        };
        (status, Json(body)).into_response()
    }
}
