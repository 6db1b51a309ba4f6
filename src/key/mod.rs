//! Canonical keys for dispatch arguments.
//!
//! Arguments are arbitrary JSON values; results and retries are indexed by a
//! [`Key`] derived from them. Arrays become ordered tuples (recursively),
//! strings stay atomic, and objects are rejected because their iteration order
//! carries no structural identity.
//!
//! ```rust
//! use paced_dispatch::key::{to_key, Key};
//! use serde_json::json;
//!
//! let key = to_key(&json!([[1, 2], "edge"])).unwrap();
//! assert_eq!(
//!     key,
//!     Key::Tuple(vec![
//!         Key::Tuple(vec![Key::Int(1), Key::Int(2)]),
//!         Key::Str("edge".into()),
//!     ])
//! );
//! assert_eq!(key.to_argument(), json!([[1, 2], "edge"]));
//! ```

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt::{self, Write as _};

/// Hashable, structurally faithful identifier of an argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// Bit pattern of a finite `f64`; `-0.0` is folded onto `0.0`.
    Float(u64),
    Str(String),
    Tuple(Vec<Key>),
    /// Key of a bulk batch: the ordered keys of its arguments.
    ///
    /// Only the feeder produces this variant, so it never collides with the
    /// key of an argument that happens to be a sequence.
    Batch(Vec<Key>),
}

impl Key {
    pub fn float(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let value = if value == 0.0 { 0.0 } else { value };
        Some(Key::Float(value.to_bits()))
    }

    pub fn batch(keys: Vec<Key>) -> Self {
        Key::Batch(keys)
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Key::Batch(_))
    }

    /// Keys of the arguments grouped under a batch key.
    pub fn sub_keys(&self) -> Option<&[Key]> {
        match self {
            Key::Batch(keys) => Some(keys),
            _ => None,
        }
    }

    /// Rebuilds the argument this key was derived from.
    ///
    /// Exact inverse of [`to_key`]: `to_key(&k.to_argument())` yields `k` for
    /// every key that `to_key` can produce. A batch key rebuilds the array of
    /// its arguments.
    pub fn to_argument(&self) -> Value {
        match self {
            Key::Null => Value::Null,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Number((*i).into()),
            Key::UInt(u) => Value::Number((*u).into()),
            Key::Float(bits) => Number::from_f64(f64::from_bits(*bits)).map_or(Value::Null, Value::Number),
            Key::Str(s) => Value::String(s.clone()),
            Key::Tuple(keys) | Key::Batch(keys) => {
                Value::Array(keys.iter().map(Key::to_argument).collect())
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Null => write!(f, "null"),
            Key::Bool(b) => write!(f, "{}", b),
            Key::Int(i) => write!(f, "{}", i),
            Key::UInt(u) => write!(f, "{}", u),
            Key::Float(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            Key::Str(s) => write!(f, "{:?}", s),
            Key::Tuple(keys) => write_seq(f, "(", keys, ")"),
            Key::Batch(keys) => write_seq(f, "batch[", keys, "]"),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, keys: &[Key], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", key)?;
    }
    f.write_str(close)
}

/// Derives the canonical key of an argument.
///
/// # Errors
///
/// Returns [`Error::UnkeyableArgument`] when the argument (or any nested
/// element) is a JSON object or a number with no finite representation. The
/// error's `field_path` points at the offending element, e.g. `[3][1]`.
pub fn to_key(arg: &Value) -> Result<Key> {
    let mut path = String::new();
    canonicalize(arg, &mut path)
}

fn canonicalize(arg: &Value, path: &mut String) -> Result<Key> {
    match arg {
        Value::Null => Ok(Key::Null),
        Value::Bool(b) => Ok(Key::Bool(*b)),
        Value::String(s) => Ok(Key::Str(s.clone())),
        Value::Number(n) => number_key(n, path),
        Value::Array(items) => {
            let mut keys = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let len = path.len();
                let _ = write!(path, "[{}]", i);
                keys.push(canonicalize(item, path)?);
                path.truncate(len);
            }
            Ok(Key::Tuple(keys))
        }
        Value::Object(_) => Err(unkeyable("objects have no canonical key", arg, path)),
    }
}

fn number_key(n: &Number, path: &str) -> Result<Key> {
    if let Some(i) = n.as_i64() {
        return Ok(Key::Int(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Key::UInt(u));
    }
    n.as_f64()
        .and_then(Key::float)
        .ok_or_else(|| unkeyable("number has no finite f64 representation", &Value::Number(n.clone()), path))
}

fn unkeyable(msg: &str, value: &Value, path: &str) -> Error {
    let mut context = ErrorContext::new()
        .with_details(truncate(value.to_string(), 120))
        .with_source("key_canonicalizer");
    if !path.is_empty() {
        context = context.with_field_path(path);
    }
    Error::unkeyable_with_context(msg, context)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}
