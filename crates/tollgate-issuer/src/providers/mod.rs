//! Concrete provider state machines.

pub mod code;
pub mod link;
pub mod oauth2;
pub mod passkey;
pub mod password;
pub mod totp;

pub use code::{CodeProvider, CodeProviderConfig};
pub use link::{LinkProvider, LinkProviderConfig};
pub use oauth2::{OAuth2Provider, OAuth2ProviderConfig};
pub use passkey::{PasskeyProvider, PasskeyProviderConfig};
pub use password::{PasswordHasher, PasswordProvider, PasswordProviderConfig};
pub use totp::{TotpProvider, TotpProviderConfig};

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Collect the free-form claim fields of a form body, skipping the
/// provider's control fields (`action`, `code`, ...).
pub(crate) fn claims_from_form(form: &HashMap<String, String>, skip: &[&str]) -> Value {
    let mut claims = Map::new();
    for (key, value) in form {
        if !skip.contains(&key.as_str()) {
            claims.insert(key.clone(), Value::String(value.clone()));
        }
    }
    Value::Object(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_claims_skip_control_fields() {
        let mut form = HashMap::new();
        form.insert("action".to_string(), "request".to_string());
        form.insert("email".to_string(), "a@b".to_string());
        form.insert("code".to_string(), "123456".to_string());

        let claims = claims_from_form(&form, &["action", "code"]);
        assert_eq!(claims, json!({"email": "a@b"}));
    }
}
