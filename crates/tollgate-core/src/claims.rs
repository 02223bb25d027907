//! Access-token claims shared by the issuer and the client verifier.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Claims carried by every issued access JWT.
///
/// `mode` is always `"access"`; verifiers reject anything else so refresh
/// material can never be replayed as an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Token mode discriminator, always `access`
    pub mode: String,
    /// Subject variant name (e.g. `user`)
    #[serde(rename = "type")]
    pub subject_type: String,
    /// Schema-validated subject properties
    pub properties: Value,
    /// Subject string: `<type>:<16-hex digest>` unless overridden
    pub sub: String,
    /// Audience, the requesting `client_id`
    pub aud: String,
    /// Issuer base URL
    pub iss: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

impl AccessClaims {
    /// True when this is an access-mode token.
    pub fn is_access(&self) -> bool {
        self.mode == "access"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_field_renames() {
        let claims = AccessClaims {
            mode: "access".into(),
            subject_type: "user".into(),
            properties: json!({"email": "a@b"}),
            sub: "user:0011223344556677".into(),
            aud: "client".into(),
            iss: "https://auth.example.com".into(),
            iat: 1,
            exp: 2,
        };
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["type"], json!("user"));
        assert!(value.get("subject_type").is_none());
        assert!(claims.is_access());
    }
}
