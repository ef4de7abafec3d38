use std::fmt::{self, Write};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// Identifies a request by its endpoint and parameters.
///
/// The key has the form `{endpoint}:{params}`, where `params` is the JSON serialization of the
/// parameters with all object keys sorted recursively. Two logically identical requests always
/// produce the same key, regardless of the order their parameters were inserted in. Empty
/// parameters (`null`, `{}` or `[]`) serialize to the empty string. Other falsy scalars such as
/// `0`, `false` or `""` are real parameters and stay part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Creates a [`CacheKey`] from already serialized parameters.
    pub fn new(endpoint: &str, params: &Value) -> Self {
        let mut key = String::with_capacity(endpoint.len() + 1);
        key.push_str(endpoint);
        key.push(':');
        if !is_empty(params) {
            write_canonical(&mut key, params);
        }
        Self(key.into())
    }

    /// Serializes `params` and creates a [`CacheKey`] from them.
    ///
    /// Returns the serialized parameters alongside the key.
    pub fn from_params<P>(endpoint: &str, params: &P) -> Result<(Self, Value), serde_json::Error>
    where
        P: Serialize + ?Sized,
    {
        let params = serde_json::to_value(params)?;
        Ok((Self::new(endpoint, &params), params))
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

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_empty(params: &Value) -> bool {
    match params {
        Value::Null => true,
        Value::Object(object) => object.is_empty(),
        Value::Array(array) => array.is_empty(),
        _ => false,
    }
}

/// Writes compact JSON with object keys in sorted order.
///
/// This does not rely on the iteration order of [`serde_json::Map`], which depends on whether
/// the `preserve_order` feature is enabled anywhere in the dependency graph.
fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(object) => {
            let mut members: Vec<_> = object.iter().collect();
            members.sort_unstable_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // writing into a `String` cannot fail
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(out, value);
            }
            out.push('}');
        }
        Value::Array(array) => {
            out.push('[');
            for (i, value) in array.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, value);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
