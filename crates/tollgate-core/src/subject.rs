//! Named, schema-validated token payload variants.
//!
//! Every issued token embeds a `{type, properties}` pair that must match
//! exactly one registered variant. Schemas come either from
//! `schemars`-derived Rust types or from raw JSON Schema documents, and are
//! compiled once with `jsonschema` at registry build time.

use std::collections::HashMap;

use jsonschema::Validator;
use schemars::JsonSchema;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{AuthError, Result};

/// Registry of subject variants.
#[derive(Debug)]
pub struct SubjectSchema {
    validators: HashMap<String, Validator>,
}

/// Builder collecting raw schemas before compilation.
#[derive(Debug, Default)]
pub struct SubjectSchemaBuilder {
    schemas: HashMap<String, Value>,
}

impl SubjectSchemaBuilder {
    /// Register a variant whose schema is derived from a Rust type.
    pub fn define<T: JsonSchema>(mut self, name: impl Into<String>) -> Self {
        let schema = schemars::schema_for!(T);
        self.schemas.insert(
            name.into(),
            serde_json::to_value(schema).unwrap_or(Value::Bool(true)),
        );
        self
    }

    /// Register a variant from a raw JSON Schema document.
    pub fn define_raw(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.schemas.insert(name.into(), schema);
        self
    }

    /// Compile every registered schema.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Crypto`]-free, schema-specific failures as
    /// [`AuthError::InvalidSubject`] naming the offending variant.
    pub fn build(self) -> Result<SubjectSchema> {
        let mut validators = HashMap::with_capacity(self.schemas.len());
        for (name, schema) in self.schemas {
            let validator =
                jsonschema::validator_for(&schema).map_err(|e| AuthError::InvalidSubject {
                    subject_type: name.clone(),
                    reason: format!("schema does not compile: {e}"),
                })?;
            validators.insert(name, validator);
        }
        Ok(SubjectSchema { validators })
    }
}

impl SubjectSchema {
    /// Start building a registry.
    pub fn builder() -> SubjectSchemaBuilder {
        SubjectSchemaBuilder::default()
    }

    /// Registered variant names.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }

    /// True when `name` is a registered variant.
    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Validate `properties` against the variant named `subject_type`.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidSubject`] when the variant is unknown or the
    /// properties fail its schema.
    pub fn validate(&self, subject_type: &str, properties: &Value) -> Result<()> {
        let validator =
            self.validators
                .get(subject_type)
                .ok_or_else(|| AuthError::InvalidSubject {
                    subject_type: subject_type.to_string(),
                    reason: "unknown subject type".to_string(),
                })?;
        validator
            .validate(properties)
            .map_err(|err| AuthError::InvalidSubject {
                subject_type: subject_type.to_string(),
                reason: err.to_string(),
            })
    }
}

/// Compute the default subject string for a `{type, properties}` pair:
/// `<type>:<first 16 hex chars of SHA-256(JSON(properties))>`.
///
/// Serialization goes through `serde_json`'s ordered maps, so two equal
/// property sets hash identically regardless of insertion order.
pub fn resolve_subject(subject_type: &str, properties: &Value) -> String {
    let canonical = serde_json::to_string(properties).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let hex = hex::encode(digest);
    format!("{subject_type}:{}", &hex[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct UserProps {
        email: String,
    }

    fn registry() -> SubjectSchema {
        SubjectSchema::builder()
            .define::<UserProps>("user")
            .define_raw(
                "admin",
                json!({
                    "type": "object",
                    "properties": { "id": { "type": "string" } },
                    "required": ["id"],
                }),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_valid_properties_accepted() {
        let subjects = registry();
        assert!(subjects.validate("user", &json!({"email": "a@b"})).is_ok());
        assert!(subjects.validate("admin", &json!({"id": "1"})).is_ok());
    }

    #[test]
    fn test_invalid_properties_rejected() {
        let subjects = registry();
        let err = subjects.validate("user", &json!({"email": 42})).unwrap_err();
        assert!(matches!(err, AuthError::InvalidSubject { .. }));
        assert!(subjects.validate("admin", &json!({})).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let subjects = registry();
        let err = subjects
            .validate("service", &json!({"id": "1"}))
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::InvalidSubject { subject_type, .. } if subject_type == "service"
        ));
    }

    #[test]
    fn test_resolve_subject_shape() {
        let subject = resolve_subject("user", &json!({"email": "a@b"}));
        let (kind, digest) = subject.split_once(':').unwrap();
        assert_eq!(kind, "user");
        assert_eq!(digest.len(), 16);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_resolve_subject_is_order_insensitive() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(resolve_subject("user", &a), resolve_subject("user", &b));
    }

    #[test]
    fn test_resolve_subject_distinguishes_properties() {
        assert_ne!(
            resolve_subject("user", &json!({"email": "a@b"})),
            resolve_subject("user", &json!({"email": "c@d"}))
        );
    }
}
