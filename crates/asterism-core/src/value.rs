//! Primitive attribute kinds and string⇄value conversion.
//!
//! Attribute values are stored as strings for audit/debug simplicity and
//! converted to typed JSON values exactly once, at the read boundary.
//! [`coerce`] is pure and total: unparseable input degrades to `Null`
//! (or `false` for booleans, see below), never to an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The closed set of primitive kinds an attribute type can map to.
///
/// Each entry needs corresponding handling in [`coerce`] and [`stringify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttribKind {
    Bool,
    Float,
    Integer,
    String,
    Dict,
}

impl AttribKind {
    pub const ALL: [AttribKind; 5] = [
        AttribKind::Bool,
        AttribKind::Float,
        AttribKind::Integer,
        AttribKind::String,
        AttribKind::Dict,
    ];

    /// Legacy upper-case name, as used in exchange documents and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            AttribKind::Bool => "BOOL",
            AttribKind::Float => "FLOAT",
            AttribKind::Integer => "INTEGER",
            AttribKind::String => "STRING",
            AttribKind::Dict => "DICT",
        }
    }
}

impl fmt::Display for AttribKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttribKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BOOL" => Ok(AttribKind::Bool),
            "FLOAT" => Ok(AttribKind::Float),
            "INTEGER" => Ok(AttribKind::Integer),
            "STRING" => Ok(AttribKind::String),
            "DICT" => Ok(AttribKind::Dict),
            other => Err(format!("unknown primitive kind: {other}")),
        }
    }
}

/// Convert a stored value string into a typed JSON value.
///
/// Conversion rules, kept bit-compatible with the data already in the wild:
///
/// - `Bool`: case-insensitive compare against `"TRUE"`. **Any** other input,
///   including garbage, yields `false` — the legacy format cannot distinguish
///   "false" from "not parseable" and changing that would silently reinterpret
///   stored data.
/// - `Float`/`Integer`: parse; failure yields `Null` ("value intentionally
///   absent"), never an error.
/// - `Dict`: parse as JSON; failure yields `Null`.
/// - `String`: the raw string unchanged.
pub fn coerce(kind: AttribKind, raw: &str) -> Value {
    match kind {
        AttribKind::Bool => Value::Bool(raw.eq_ignore_ascii_case("true")),
        AttribKind::Float => match raw.parse::<f64>() {
            Ok(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
            Err(_) => Value::Null,
        },
        AttribKind::Integer => match raw.parse::<i64>() {
            Ok(i) => Value::Number(i.into()),
            Err(_) => Value::Null,
        },
        AttribKind::Dict => serde_json::from_str(raw).unwrap_or(Value::Null),
        AttribKind::String => Value::String(raw.to_string()),
    }
}

/// Convert a typed JSON value into its stored string form.
///
/// The write-side counterpart of [`coerce`]: `Dict` kinds are canonically
/// JSON-encoded; JSON strings are stored without surrounding quotes; every
/// other value uses its JSON text form. `stringify(kind, v)` followed by
/// `coerce(kind, ..)` reproduces `v` for well-typed inputs.
pub fn stringify(kind: AttribKind, value: &Value) -> String {
    match kind {
        AttribKind::Dict => value.to_string(),
        _ => match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}
