//! Error taxonomy shared by the issuer and client crates.
//!
//! Recoverable protocol failures carry an RFC 6749 error code and travel to
//! the client either as JSON (`/token`) or as `error` / `error_description`
//! query parameters on a redirect (`/authorize`). Everything else is
//! funneled into `server_error` at the HTTP boundary; descriptions never
//! carry key material or backtraces.

use serde::{Deserialize, Serialize};

use tollgate_storage::StorageError;

/// Result type alias for tollgate-core operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Standard OAuth 2.0 error codes used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OauthErrorCode {
    InvalidRequest,
    InvalidGrant,
    InvalidClient,
    InvalidRedirectUri,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedGrantType,
    ServerError,
    TemporarilyUnavailable,
    ValidationError,
}

impl OauthErrorCode {
    /// The snake_case wire form of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidClient => "invalid_client",
            Self::InvalidRedirectUri => "invalid_redirect_uri",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::ValidationError => "validation_error",
        }
    }
}

impl std::fmt::Display for OauthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable OAuth protocol error: wire code plus description.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {description}")]
pub struct OauthError {
    /// RFC 6749 error code
    pub code: OauthErrorCode,
    /// Human-readable description, safe to show to end users
    pub description: String,
}

impl OauthError {
    /// Build an error from a code and description.
    pub fn new(code: OauthErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    /// Shorthand for `invalid_grant`, the most common `/token` outcome.
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(OauthErrorCode::InvalidGrant, description)
    }

    /// Shorthand for `server_error`.
    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new(OauthErrorCode::ServerError, description)
    }
}

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A required request parameter was absent
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// The `allow` check rejected the client/redirect combination
    #[error("client {client_id} is not authorized for this redirect")]
    UnauthorizedClient {
        /// The rejected client id
        client_id: String,
    },

    /// The authorization cookie was missing or expired mid-flow
    #[error("authorization state cookie is missing or expired")]
    UnknownState,

    /// A recoverable OAuth protocol error
    #[error(transparent)]
    Oauth(#[from] OauthError),

    /// Storage layer failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No usable signing or encryption key could be loaded or generated
    #[error("key material unavailable: {0}")]
    Key(String),

    /// A cryptographic primitive failed (sealing, signing, hashing)
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    /// A subject payload failed schema validation
    #[error("subject {subject_type:?} rejected: {reason}")]
    InvalidSubject {
        /// The subject variant that was attempted
        subject_type: String,
        /// First validation failure
        reason: String,
    },

    /// JSON (de)serialization failure
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    /// Collapse this error into the wire-visible OAuth pair.
    ///
    /// Internal failures deliberately flatten to a generic `server_error`
    /// so storage and key details stay out of responses.
    pub fn to_oauth(&self) -> OauthError {
        match self {
            Self::MissingParameter(name) => OauthError::new(
                OauthErrorCode::InvalidRequest,
                format!("missing required parameter: {name}"),
            ),
            Self::UnauthorizedClient { client_id } => OauthError::new(
                OauthErrorCode::UnauthorizedClient,
                format!("client {client_id} is not authorized"),
            ),
            Self::UnknownState => OauthError::new(
                OauthErrorCode::InvalidRequest,
                "authorization state is missing or expired",
            ),
            Self::Oauth(err) => err.clone(),
            Self::InvalidSubject { reason, .. } => {
                OauthError::new(OauthErrorCode::ValidationError, reason.clone())
            }
            Self::Storage(_) | Self::Key(_) | Self::Crypto(_) | Self::Serialization(_) => {
                OauthError::server_error("internal error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_wire_form() {
        assert_eq!(OauthErrorCode::InvalidGrant.as_str(), "invalid_grant");
        assert_eq!(
            serde_json::to_value(OauthErrorCode::UnsupportedGrantType).unwrap(),
            serde_json::json!("unsupported_grant_type")
        );
    }

    #[test]
    fn test_internal_errors_flatten_to_server_error() {
        let err = AuthError::Key("no signing key".into());
        let oauth = err.to_oauth();
        assert_eq!(oauth.code, OauthErrorCode::ServerError);
        // The storage/key detail must not leak.
        assert_eq!(oauth.description, "internal error");
    }

    #[test]
    fn test_missing_parameter_maps_to_invalid_request() {
        let oauth = AuthError::MissingParameter("redirect_uri").to_oauth();
        assert_eq!(oauth.code, OauthErrorCode::InvalidRequest);
        assert!(oauth.description.contains("redirect_uri"));
    }
}
