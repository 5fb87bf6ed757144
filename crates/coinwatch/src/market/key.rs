//! Query parameters and order-stable cache keys for upstream requests.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A primitive query parameter value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(n) => write!(f, "{}", n),
            ParamValue::UInt(n) => write!(f, "{}", n),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Int(n)
    }
}

impl From<u32> for ParamValue {
    fn from(n: u32) -> Self {
        ParamValue::UInt(u64::from(n))
    }
}

impl From<u64> for ParamValue {
    fn from(n: u64) -> Self {
        ParamValue::UInt(n)
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Query parameters, always iterated in name order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, ParamValue>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a parameter.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Name/value pairs rendered for a URL query string.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = QueryParams::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Cache key: SHA-256 over the canonical JSON of `(endpoint, params)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(endpoint: &str, params: &QueryParams) -> Self {
        let canonical = canonical_request(endpoint, params);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compact JSON with object keys sorted; parameter order never leaks in.
pub fn canonical_request(endpoint: &str, params: &QueryParams) -> String {
    serde_json::json!({ "endpoint": endpoint, "params": params }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_insertion_order() {
        let a = QueryParams::new().with("a", 1i64).with("b", 2i64);
        let b = QueryParams::new().with("b", 2i64).with("a", 1i64);
        assert_eq!(CacheKey::new("/x", &a), CacheKey::new("/x", &b));
    }

    #[test]
    fn key_distinguishes_endpoint_and_values() {
        let p = QueryParams::new().with("days", 30u32);
        let q = QueryParams::new().with("days", 90u32);
        assert_ne!(CacheKey::new("/a", &p), CacheKey::new("/b", &p));
        assert_ne!(CacheKey::new("/a", &p), CacheKey::new("/a", &q));
    }

    #[test]
    fn key_is_hex_sha256() {
        let k = CacheKey::new("/coins/markets", &QueryParams::new());
        assert_eq!(k.as_str().len(), 64);
        assert!(k.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn canonical_form_sorts_params() {
        let p: QueryParams = [("z", "last"), ("a", "first")].into_iter().collect();
        assert_eq!(
            canonical_request("/s", &p),
            r#"{"endpoint":"/s","params":{"a":"first","z":"last"}}"#
        );
    }

    #[test]
    fn query_pairs_render_primitives() {
        let p = QueryParams::new()
            .with("sparkline", false)
            .with("per_page", 100u32)
            .with("vs_currency", "usd");
        assert_eq!(
            p.to_query_pairs(),
            vec![
                ("per_page".to_string(), "100".to_string()),
                ("sparkline".to_string(), "false".to_string()),
                ("vs_currency".to_string(), "usd".to_string()),
            ]
        );
    }
}
