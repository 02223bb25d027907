//! # Tollgate Storage - composite-key KV abstraction
//!
//! Typed, prefix-scannable, TTL-aware key/value storage used by every other
//! tollgate crate. Keys are ordered segment lists joined with an escape-safe
//! encoding, so adapters only ever see flat strings while callers keep
//! structured paths.
//!
//! ## Architecture
//!
//! - `key` - `StorageKey` segment validation, escaping and round-trip codec
//! - `adapter` - the async `Storage` trait, TTL rules, typed JSON helpers
//! - `memory` - `DashMap`-backed adapter for tests and single-node use
//!
//! Adapters must preserve values exactly (round-trip JSON), treat concurrent
//! writes to one key as last-writer-wins, and hide expired rows from both
//! `get` and `scan`.

pub mod adapter;
pub mod key;
pub mod memory;

pub use adapter::{Storage, StorageExt, MAX_SCAN_RESULTS, MAX_TTL_SECS};
pub use key::StorageKey;
pub use memory::MemoryStorage;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the storage layer
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A key segment was empty or whitespace-only
    #[error("storage key segment must not be empty")]
    EmptySegment,

    /// An encoded key could not be decoded (dangling escape)
    #[error("malformed encoded storage key: {0}")]
    MalformedKey(String),

    /// TTL was zero or exceeded the 10-year ceiling
    #[error("invalid ttl: {0} seconds")]
    InvalidTtl(u64),

    /// A stored value could not be (de)serialized
    #[error("value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing adapter failed
    #[error("storage backend error: {0}")]
    Backend(String),
}
