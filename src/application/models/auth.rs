use serde::{Deserialize, Serialize};
use std::fmt;

/// Access/refresh token pair as returned by every auth endpoint.
///
/// The pair is always handled as a unit: callers replace both tokens
/// together, never one of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp of access-token expiry. Informational only (expiry is
    /// detected by a 401, not by the clock); absent on pairs restored from
    /// the credential store.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl fmt::Display for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{\"access_token\":\"[REDACTED]\",\"refresh_token\":\"[REDACTED]\",\"expires_at\":{}}}",
            self.expires_at
                .map_or("null".to_string(), |t| t.to_string())
        )
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body for the Google and Apple sign-in endpoints.
#[derive(Debug, Serialize)]
pub struct SocialLoginRequest {
    pub id_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}
