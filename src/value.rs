//! Dynamic reply values.
//!
//! Typed accessors return concrete Rust types, but batches, the result cache
//! and the attribute front end need a single representation that every
//! attribute type converts into. [`Value`] is that representation and
//! [`AttrValue`] is the conversion contract.

use crate::error::{PaceError, PaceResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No payload (an acknowledged command)
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Look up a field of a `Map` value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(name),
            _ => None,
        }
    }

    pub(crate) fn mismatch(&self, expected: &'static str) -> PaceError {
        PaceError::TypeMismatch {
            expected,
            value: self.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "-"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Conversion between an attribute's Rust type and [`Value`].
pub trait AttrValue: Sized + Clone + Send + Sync + 'static {
    /// Name used in type mismatch errors.
    const TYPE_NAME: &'static str;

    fn into_value(self) -> Value;

    fn from_value(value: &Value) -> PaceResult<Self>;
}

impl AttrValue for Value {
    const TYPE_NAME: &'static str = "value";

    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        Ok(value.clone())
    }
}

impl AttrValue for () {
    const TYPE_NAME: &'static str = "none";

    fn into_value(self) -> Value {
        Value::None
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        match value {
            Value::None => Ok(()),
            other => Err(other.mismatch(Self::TYPE_NAME)),
        }
    }
}

impl AttrValue for bool {
    const TYPE_NAME: &'static str = "bool";

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        value.as_bool().ok_or_else(|| value.mismatch(Self::TYPE_NAME))
    }
}

impl AttrValue for i64 {
    const TYPE_NAME: &'static str = "int";

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        value.as_i64().ok_or_else(|| value.mismatch(Self::TYPE_NAME))
    }
}

impl AttrValue for f64 {
    const TYPE_NAME: &'static str = "float";

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        value.as_f64().ok_or_else(|| value.mismatch(Self::TYPE_NAME))
    }
}

impl AttrValue for String {
    const TYPE_NAME: &'static str = "text";

    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn from_value(value: &Value) -> PaceResult<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| value.mismatch(Self::TYPE_NAME))
    }
}
