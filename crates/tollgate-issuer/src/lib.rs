//! # Tollgate Issuer - OAuth 2.0 authorization server
//!
//! The issuer state machine: `/authorize` -> provider flow -> `/token`,
//! with PKCE, single-use authorization codes, refresh-token rotation with
//! reuse detection, JWKS/discovery publication, and an encrypted cookie
//! session carrying authorization state across provider sub-flows.
//!
//! ## Architecture
//!
//! - `issuer` - builder, router assembly, `/authorize`, `/token`,
//!   `/.well-known/*`, and the error funnel
//! - `state` - cookie- and storage-resident flow state
//! - `session` - encrypted (JWE) cookie codec
//! - `token` - access-JWT minting and refresh rotation
//! - `allow` - default redirect-domain allow check
//! - `request` - externally visible origin from proxy headers
//! - `provider` - the capability surface handed to every provider
//! - `providers` - code, magic-link, password, passkey, TOTP and generic
//!   OAuth2 state machines
//! - `plugin` - route namespacing and lifecycle hooks
//!
//! The issuer is a library: [`Issuer::build`] yields an `axum::Router` the
//! host mounts wherever it likes.

pub mod allow;
pub mod issuer;
pub mod plugin;
pub mod provider;
pub mod providers;
pub mod request;
pub mod session;
pub mod state;
pub mod token;

pub use issuer::{
    AllowHook, BuildError, ErrorRenderer, Issuer, IssuerBuilder, SelectRenderer, SubjectResolver,
};
pub use plugin::{HookContext, Plugin, PluginRoute};
pub use provider::{
    AuthProvider, ProviderContext, ProviderOutput, ProviderSession, SubjectPayload,
    SuccessOptions,
};
pub use state::{AuthorizationState, PkceChallenge, ResponseType, TokenTtl, TtlConfig};
pub use token::{IssuedTokens, RefreshHook, RefreshUpdate};

/// Result alias re-exported from tollgate-core.
pub type Result<T> = tollgate_core::Result<T>;
