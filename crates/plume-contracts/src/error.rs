use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified failure taxonomy shared by every vendor integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ContentModerationError,
    InvalidCredential,
    InvalidParameter,
    VendorUnavailable,
    InvalidVendorResponse,
    Timeout,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentModerationError => "ContentModerationError",
            Self::InvalidCredential => "InvalidCredential",
            Self::InvalidParameter => "InvalidParameter",
            Self::VendorUnavailable => "VendorUnavailable",
            Self::InvalidVendorResponse => "InvalidVendorResponse",
            Self::Timeout => "Timeout",
            Self::InternalError => "InternalError",
        }
    }

    /// HTTP status a host framework should answer with for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            Self::ContentModerationError | Self::InvalidParameter => 400,
            Self::InvalidCredential => 401,
            Self::VendorUnavailable | Self::InvalidVendorResponse => 502,
            Self::Timeout => 504,
            Self::InternalError => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("content rejected by moderation: {message}")]
    ContentModeration {
        message: String,
        code: Option<String>,
    },

    #[error("invalid credential: {message}")]
    InvalidCredential {
        message: String,
        code: Option<String>,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("vendor unavailable: {message}")]
    VendorUnavailable {
        message: String,
        code: Option<String>,
    },

    #[error("invalid vendor response: {0}")]
    InvalidVendorResponse(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContentModeration { .. } => ErrorKind::ContentModerationError,
            Self::InvalidCredential { .. } => ErrorKind::InvalidCredential,
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::VendorUnavailable { .. } => ErrorKind::VendorUnavailable,
            Self::InvalidVendorResponse(_) => ErrorKind::InvalidVendorResponse,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::ContentModeration { message, .. }
            | Self::InvalidCredential { message, .. }
            | Self::VendorUnavailable { message, .. } => message,
            Self::InvalidParameter(message)
            | Self::InvalidVendorResponse(message)
            | Self::Timeout(message)
            | Self::Internal(message) => message,
        }
    }

    /// Vendor-side code preserved from the upstream payload, when one was reported.
    pub fn vendor_code(&self) -> Option<&str> {
        match self {
            Self::ContentModeration { code, .. }
            | Self::InvalidCredential { code, .. }
            | Self::VendorUnavailable { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidVendorResponse(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::VendorUnavailable {
            message: message.into(),
            code: None,
        }
    }

    pub fn credential(message: impl Into<String>) -> Self {
        Self::InvalidCredential {
            message: message.into(),
            code: None,
        }
    }
}

/// Serialized form of a failed result's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&GatewayError> for ErrorInfo {
    fn from(error: &GatewayError) -> Self {
        Self {
            kind: error.kind(),
            message: error.message().to_string(),
            code: error.vendor_code().map(str::to_string),
        }
    }
}
