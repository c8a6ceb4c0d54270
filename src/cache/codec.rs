//! Value Codec Module
//!
//! Converts typed values to the canonical text stored in an item envelope
//! and back, keeping `undefined` and `null` distinct from the string
//! literals `"undefined"` and `"null"`.
//!
//! JSON has no `undefined`, and an array may mix `undefined`, `null` and
//! strings, so array leaves are rewritten before serialization: the two
//! empty values become reserved sentinel strings, and any real string that
//! happens to start with the reserved prefix is escaped. The item's
//! [`ValueType`] tag tells the decoder which rewrite to reverse.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};

use crate::error::{LockerError, Result};

/// Prefix shared by every sentinel. Starts with NUL so ordinary text never
/// begins with it by accident.
const RESERVED_PREFIX: &str = "\u{0}locker:";
const UNDEFINED_SENTINEL: &str = "\u{0}locker:undefined";
const NULL_SENTINEL: &str = "\u{0}locker:null";
const ESCAPED_STRING_PREFIX: &str = "\u{0}locker:str:";

/// Largest integer an `f64` represents exactly (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

// == Value Type ==
/// Tag stored alongside the encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Undefined,
    Null,
    String,
    Number,
    Boolean,
    Object,
    Array,
}

// == Value ==
/// A value the locker can store.
///
/// `Undefined` and `Null` are both "empty" but survive a round trip as
/// distinct values. Objects are plain JSON maps; arrays may nest and may
/// contain either empty value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(Map<String, JsonValue>),
    Array(Vec<Value>),
}

impl Value {
    // == Type Detection ==
    /// Returns the tag for this value.
    ///
    /// Non-finite numbers have no text encoding and are rejected here,
    /// before any serialization is attempted.
    pub fn value_type(&self) -> Result<ValueType> {
        match self {
            Value::Undefined => Ok(ValueType::Undefined),
            Value::Null => Ok(ValueType::Null),
            Value::Bool(_) => Ok(ValueType::Boolean),
            Value::Number(n) if !n.is_finite() => Err(LockerError::Validation(format!(
                "unsupported value: non-finite number {}",
                n
            ))),
            Value::Number(_) => Ok(ValueType::Number),
            Value::String(_) => Ok(ValueType::String),
            Value::Object(_) => Ok(ValueType::Object),
            Value::Array(items) => {
                for item in items {
                    item.value_type()?;
                }
                Ok(ValueType::Array)
            }
        }
    }

    /// Converts any serde-serializable value.
    ///
    /// `None` serializes to JSON null and therefore becomes [`Value::Null`];
    /// use `Value::from(Option<T>)` to map `None` to [`Value::Undefined`].
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::from(serde_json::to_value(value)?))
    }

    /// Converts this value into any deserializable type.
    ///
    /// `Undefined` is presented to serde as null.
    pub fn deserialize_into<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.into_json())?)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn into_json(self) -> JsonValue {
        match self {
            Value::Undefined | Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(b),
            Value::Number(n) => number_to_json(n),
            Value::String(s) => JsonValue::String(s),
            Value::Object(map) => JsonValue::Object(map),
            Value::Array(items) => JsonValue::Array(items.into_iter().map(Value::into_json).collect()),
        }
    }
}

/// Integral numbers are written without a fraction so they deserialize
/// into integer types.
fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        JsonValue::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
    }
}

// == Conversions ==
impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => Value::Object(map),
        }
    }
}

impl From<Map<String, JsonValue>> for Value {
    fn from(map: Map<String, JsonValue>) -> Self {
        Value::Object(map)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

impl_from_number!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(option: Option<T>) -> Self {
        option.map_or(Value::Undefined, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

// == Encode ==
/// Encodes a value into its tag and canonical text.
pub fn encode(value: &Value) -> Result<(ValueType, String)> {
    let value_type = value.value_type()?;
    let json = match value {
        Value::Undefined => JsonValue::String(UNDEFINED_SENTINEL.to_string()),
        Value::Null => JsonValue::String(NULL_SENTINEL.to_string()),
        Value::Array(items) => JsonValue::Array(items.iter().map(leaf_to_json).collect()),
        other => other.clone().into_json(),
    };
    let text = serde_json::to_string(&json)?;
    Ok((value_type, text))
}

fn leaf_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Undefined => JsonValue::String(UNDEFINED_SENTINEL.to_string()),
        Value::Null => JsonValue::String(NULL_SENTINEL.to_string()),
        Value::String(s) if s.starts_with(RESERVED_PREFIX) => {
            JsonValue::String(format!("{}{}", ESCAPED_STRING_PREFIX, s))
        }
        Value::Array(items) => JsonValue::Array(items.iter().map(leaf_to_json).collect()),
        other => other.clone().into_json(),
    }
}

// == Decode ==
/// Reverses [`encode`] using the recorded tag.
pub fn decode(value_type: ValueType, text: &str) -> Result<Value> {
    let json: JsonValue = serde_json::from_str(text)?;
    let value = match (value_type, json) {
        (ValueType::Array, JsonValue::Array(items)) => {
            Value::Array(items.into_iter().map(leaf_from_json).collect())
        }
        (ValueType::Undefined, JsonValue::String(s)) if s == UNDEFINED_SENTINEL => Value::Undefined,
        (ValueType::Null, JsonValue::String(s)) if s == NULL_SENTINEL => Value::Null,
        (_, json) => Value::from(json),
    };

    let decoded_type = value.value_type()?;
    if decoded_type != value_type {
        return Err(LockerError::Serialization(format!(
            "payload decodes to {:?} but is tagged {:?}",
            decoded_type, value_type
        )));
    }
    Ok(value)
}

fn leaf_from_json(json: JsonValue) -> Value {
    match json {
        JsonValue::String(s) => {
            if s == UNDEFINED_SENTINEL {
                Value::Undefined
            } else if s == NULL_SENTINEL {
                Value::Null
            } else if let Some(original) = s.strip_prefix(ESCAPED_STRING_PREFIX) {
                Value::String(original.to_string())
            } else {
                Value::String(s)
            }
        }
        JsonValue::Array(items) => Value::Array(items.into_iter().map(leaf_from_json).collect()),
        other => Value::from(other),
    }
}
