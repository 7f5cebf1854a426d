use reqwest::StatusCode;
use std::fmt::{Display, Formatter};
use std::{fmt, io};

/// Error taxonomy for every call that leaves the crate.
///
/// `Unauthorized` is the only variant the request pipeline recovers from
/// (via refresh-and-retry); everything else propagates to the caller
/// unchanged.
#[derive(Debug)]
pub enum ApiError {
    /// Transport-level failure, including timeouts. Never enters the
    /// refresh path.
    Network(reqwest::Error),
    Io(io::Error),
    Json(serde_json::Error),
    /// The server answered 401 on an authenticated endpoint.
    Unauthorized,
    /// The refresh endpoint rejected the refresh token. Terminal: the
    /// session is logged out.
    RefreshRejected,
    /// A refresh was attempted while no refresh token is held. Terminal.
    NoRefreshToken,
    /// Any non-401 error status, with the server-provided message when the
    /// body carried one.
    Api { status: StatusCode, message: String },
    /// Credential store read/write failure.
    Storage(String),
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Network(e) => write!(f, "network error: {e}"),
            ApiError::Io(e) => write!(f, "io error: {e}"),
            ApiError::Json(e) => write!(f, "json error: {e}"),
            ApiError::Unauthorized => write!(f, "unauthorized"),
            ApiError::RefreshRejected => write!(f, "refresh token rejected"),
            ApiError::NoRefreshToken => write!(f, "no refresh token held"),
            ApiError::Api { status, message } => {
                write!(f, "api error ({status}): {message}")
            }
            ApiError::Storage(msg) => write!(f, "credential store error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Network(e)
    }
}

impl From<io::Error> for ApiError {
    fn from(e: io::Error) -> Self {
        ApiError::Io(e)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Json(e)
    }
}

impl ApiError {
    /// True when this error means the access token was not accepted.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
