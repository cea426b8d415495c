//! Transaction authorization extensions
//!
//! The authenticator signs over a mapping of extension names to values.
//! Step-up verification binds the operation text into that mapping under
//! [`TX_AUTH_SIMPLE`] and accepts an assertion only when the signed mapping
//! is exactly the expected one.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Wire name of the simple transaction authorization extension
pub const TX_AUTH_SIMPLE: &str = "txAuthSimple";

/// Mapping from extension name to extension value.
///
/// Has no `PartialEq`; compare with [`TransactionExtensions::matches`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionExtensions(BTreeMap<String, Value>);

impl TransactionExtensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mapping `{"txAuthSimple": text}`
    pub fn tx_auth_simple(text: impl Into<String>) -> Self {
        let mut extensions = Self::new();
        extensions.insert(TX_AUTH_SIMPLE, Value::String(text.into()));
        extensions
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Exact structural comparison over the whole mapping.
    ///
    /// Both mappings must hold the same key set and every value must be
    /// identical, including its JSON type: `"50"` never matches `50`.
    pub fn matches(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0
            .iter()
            .all(|(name, value)| other.0.get(name).is_some_and(|theirs| theirs == value))
    }
}

impl From<serde_json::Map<String, Value>> for TransactionExtensions {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl fmt::Display for TransactionExtensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

/// The signed extensions differ from the expected ones
#[derive(Debug, Clone, Error)]
#[error("Extensions verification failed: expected {expected}, received {received}")]
pub struct ExtensionMismatch {
    pub expected: TransactionExtensions,
    pub received: TransactionExtensions,
}

/// Predicate run by the crypto engine over the extensions the authenticator signed
pub trait ExtensionsVerifier: Send + Sync {
    fn verify(&self, signed: &TransactionExtensions) -> Result<(), ExtensionMismatch>;
}

/// Accepts exactly one extension mapping
#[derive(Debug, Clone)]
pub struct ExpectedExtensions {
    expected: TransactionExtensions,
}

impl ExpectedExtensions {
    fn new(expected: TransactionExtensions) -> Self {
        Self { expected }
    }

    /// Expect `{"txAuthSimple": text}` and nothing else
    pub fn tx_auth_simple(text: impl Into<String>) -> Self {
        Self::new(TransactionExtensions::tx_auth_simple(text))
    }
}

impl ExtensionsVerifier for ExpectedExtensions {
    fn verify(&self, signed: &TransactionExtensions) -> Result<(), ExtensionMismatch> {
        if self.expected.matches(signed) {
            Ok(())
        } else {
            Err(ExtensionMismatch {
                expected: self.expected.clone(),
                received: signed.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn from_json(value: Value) -> TransactionExtensions {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_exact_mapping_matches() {
        let expected = ExpectedExtensions::tx_auth_simple("withdraw $50");
        let signed = from_json(json!({ "txAuthSimple": "withdraw $50" }));
        assert!(expected.verify(&signed).is_ok());
    }

    #[test]
    fn test_different_text_is_rejected() {
        let expected = ExpectedExtensions::tx_auth_simple("withdraw $50");
        let signed = from_json(json!({ "txAuthSimple": "withdraw $500" }));
        let err = expected.verify(&signed).unwrap_err();
        assert_eq!(err.received.get(TX_AUTH_SIMPLE), Some(&json!("withdraw $500")));
        assert_eq!(err.expected.get(TX_AUTH_SIMPLE), Some(&json!("withdraw $50")));
    }

    #[test]
    fn test_extra_key_is_rejected() {
        let expected = ExpectedExtensions::tx_auth_simple("withdraw $50");
        let signed = from_json(json!({ "txAuthSimple": "withdraw $50", "appid": true }));
        assert!(expected.verify(&signed).is_err());
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let expected = ExpectedExtensions::tx_auth_simple("withdraw $50");
        assert!(expected.verify(&TransactionExtensions::new()).is_err());
        let renamed = from_json(json!({ "txAuthGeneric": "withdraw $50" }));
        assert!(expected.verify(&renamed).is_err());
    }

    #[test]
    fn test_no_type_coercion() {
        let mut expected = TransactionExtensions::new();
        expected.insert("txAuthSimple", "50");
        let signed = from_json(json!({ "txAuthSimple": 50 }));
        assert!(!expected.matches(&signed));
    }

    #[test]
    fn test_substring_does_not_match() {
        let expected = TransactionExtensions::tx_auth_simple("withdraw $50");
        let signed = TransactionExtensions::tx_auth_simple("withdraw $50 ");
        assert!(!expected.matches(&signed));
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let a = from_json(json!({ "a": "1", "b": "2" }));
        let mut b = TransactionExtensions::new();
        b.insert("b", "2");
        b.insert("a", "1");
        assert!(a.matches(&b));
        assert!(b.matches(&a));
    }

    #[test]
    fn test_display_is_json() {
        let extensions = TransactionExtensions::tx_auth_simple("pay");
        assert_eq!(extensions.to_string(), r#"{"txAuthSimple":"pay"}"#);
    }
}
