use serde::{Deserialize, Serialize};

/// Stable machine-readable error taxonomy surfaced across crate boundaries.
/// An outer HTTP layer maps these onto status codes; this core never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    UnsupportedMedia,
    PayloadTooLarge,
    Unauthenticated,
    AccessDenied,
    NotFound,
    ConflictUnique,
    ConflictState,
    PolicyRefusal,
    UpstreamTimeout,
    UpstreamUnavailable,
    UpstreamError,
    Internal,
}

impl ErrorCode {
    /// True for errors where retrying the same request later may succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorCode::UpstreamTimeout | ErrorCode::UpstreamUnavailable)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::UnsupportedMedia => "UNSUPPORTED_MEDIA",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ConflictUnique => "CONFLICT_UNIQUE",
            ErrorCode::ConflictState => "CONFLICT_STATE",
            ErrorCode::PolicyRefusal => "POLICY_REFUSAL",
            ErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Every crate's error type implements this so callers can match on
/// `error_code()` without downcasting through `std::error::Error`.
pub trait RagError: std::error::Error {
    fn error_code(&self) -> ErrorCode;

    /// A stable correlation id for `Internal` errors, so an operator can
    /// find the detailed log line from a generic message shown upstream.
    fn error_id(&self) -> Option<uuid::Uuid> {
        None
    }
}
