//! Storage key construction and the escape-safe wire encoding.
//!
//! A key is an ordered list of non-empty segments. On the wire the segments
//! are joined with the ASCII Unit Separator (U+001F) after per-segment
//! escaping: every backslash is doubled, then every separator is prefixed
//! with a backslash. Decoding is the exact inverse, so no two distinct
//! segment lists can collide on their encoded form.

use std::fmt;

use crate::{Result, StorageError};

/// Joining character between escaped segments.
pub const SEPARATOR: char = '\u{1f}';

const ESCAPE: char = '\\';

/// A validated, ordered list of key segments.
///
/// Segments are validated at construction: empty or whitespace-only
/// segments are rejected before they can reach an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    segments: Vec<String>,
}

impl StorageKey {
    /// Build a key from segments, validating each one.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EmptySegment`] if any segment is empty or
    /// whitespace-only.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(StorageError::EmptySegment);
        }
        for segment in &segments {
            if segment.trim().is_empty() {
                return Err(StorageError::EmptySegment);
            }
        }
        Ok(Self { segments })
    }

    /// The raw (unescaped) segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Append one segment, returning a new key.
    pub fn child(&self, segment: impl Into<String>) -> Result<Self> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::new(segments)
    }

    /// True if `self` starts with every segment of `prefix`, in order.
    pub fn starts_with(&self, prefix: &StorageKey) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self
                .segments
                .iter()
                .zip(prefix.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// Encode to the joined wire form handed to adapters.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.push_str(&escape_segment(segment));
        }
        out
    }

    /// Decode a wire-form string back into segments.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MalformedKey`] when the input ends in a
    /// dangling escape, and [`StorageError::EmptySegment`] when a decoded
    /// segment is empty.
    pub fn decode(encoded: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = encoded.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => match chars.next() {
                    Some(next @ (ESCAPE | SEPARATOR)) => current.push(next),
                    Some(other) => {
                        return Err(StorageError::MalformedKey(format!(
                            "unexpected escape before {other:?}"
                        )));
                    }
                    None => {
                        return Err(StorageError::MalformedKey(
                            "dangling escape at end of key".into(),
                        ));
                    }
                },
                SEPARATOR => {
                    segments.push(std::mem::take(&mut current));
                }
                other => current.push(other),
            }
        }
        segments.push(current);
        Self::new(segments)
    }

    /// The encoded form of this key used as a scan prefix.
    ///
    /// Includes a trailing separator so `oauth:refresh/a` never matches
    /// `oauth:refresh/ab`'s children.
    pub fn encode_as_prefix(&self) -> String {
        let mut out = self.encode();
        out.push(SEPARATOR);
        out
    }
}

fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        if c == ESCAPE || c == SEPARATOR {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

impl fmt::Display for StorageKey {
    /// Human-readable form for logs. Not the wire encoding.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl TryFrom<&[&str]> for StorageKey {
    type Error = StorageError;

    fn try_from(segments: &[&str]) -> Result<Self> {
        Self::new(segments.iter().copied())
    }
}

/// Convenience constructor used across the issuer crates.
#[macro_export]
macro_rules! storage_key {
    ($($segment:expr),+ $(,)?) => {
        $crate::StorageKey::new([$(String::from($segment)),+])
    };
}
