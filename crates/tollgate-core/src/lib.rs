//! # Tollgate Core - crypto utilities and key lifecycle
//!
//! Shared foundation for the tollgate issuer and client crates:
//!
//! - **Errors** - OAuth protocol error codes and the crate-wide error type
//! - **Random** - CSRNG tokens, unbiased digits, constant-time comparison,
//!   and the minimum-duration wrapper used around sensitive checks
//! - **PKCE** - RFC 7636 verifier/challenge generation and timing-normalized
//!   validation
//! - **Keys** - generation, persistence and JWKS publication of ES256
//!   signing and RSA-OAEP-512 encryption key pairs
//! - **JWE** - compact RSA-OAEP-512 + A256GCM seal/open for cookie payloads
//! - **Subjects** - named, schema-validated token payload variants
//! - **Revocation** - hashed-token deny-list with TTL-bounded cleanup

pub mod claims;
pub mod error;
pub mod jwe;
pub mod keys;
pub mod pkce;
pub mod random;
pub mod revocation;
pub mod subject;

pub use claims::AccessClaims;
pub use error::{AuthError, OauthError, OauthErrorCode, Result};
pub use keys::{EncryptionKeyPair, KeyManager, SigningKeyPair};
pub use pkce::Pkce;
pub use revocation::RevocationLedger;
pub use subject::{resolve_subject, SubjectSchema};
