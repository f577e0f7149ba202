//! Core value types shared by operators, bands and image properties.
//!
//! The type system uses an enum-based approach:
//! - Closed set of parameter value kinds: operators declare typed parameters
//! - Zero-cost pattern matching when reading parameters
//! - Serialization: serde handles enums natively

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sample data type of a band or raster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int8,
    #[default]
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl DataType {
    /// All data types in ascending size order.
    pub fn all() -> &'static [DataType] {
        &[
            DataType::Int8,
            DataType::UInt8,
            DataType::Int16,
            DataType::UInt16,
            DataType::Int32,
            DataType::UInt32,
            DataType::Float32,
            DataType::Float64,
        ]
    }

    /// Size of one sample in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// Whether samples are integral.
    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// Whether samples are floating point.
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Smallest representable sample value.
    pub fn min_value(&self) -> f64 {
        match self {
            DataType::Int8 => i8::MIN as f64,
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 => 0.0,
            DataType::Int16 => i16::MIN as f64,
            DataType::Int32 => i32::MIN as f64,
            DataType::Float32 => f32::MIN as f64,
            DataType::Float64 => f64::MIN,
        }
    }

    /// Largest representable sample value.
    pub fn max_value(&self) -> f64 {
        match self {
            DataType::Int8 => i8::MAX as f64,
            DataType::UInt8 => u8::MAX as f64,
            DataType::Int16 => i16::MAX as f64,
            DataType::UInt16 => u16::MAX as f64,
            DataType::Int32 => i32::MAX as f64,
            DataType::UInt32 => u32::MAX as f64,
            DataType::Float32 => f32::MAX as f64,
            DataType::Float64 => f64::MAX,
        }
    }

    /// Coerce an arbitrary value into the range and precision of this type.
    ///
    /// Integral types round to the nearest integer and saturate at their
    /// bounds; NaN maps to zero for integral types.
    pub fn coerce(&self, value: f64) -> f64 {
        match self {
            DataType::Float64 => value,
            DataType::Float32 => value as f32 as f64,
            _ => {
                if value.is_nan() {
                    0.0
                } else {
                    value.round().clamp(self.min_value(), self.max_value())
                }
            }
        }
    }

    /// Lowercase name used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::UInt8 => "uint8",
            DataType::Int16 => "int16",
            DataType::UInt16 => "uint16",
            DataType::Int32 => "int32",
            DataType::UInt32 => "uint32",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::all()
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown data type '{}'", s))
    }
}

/// Values carried by operator parameters, image properties and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Value {
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point number
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Boolean value
    Boolean(bool),
    /// Homogeneous array of values
    Array(Vec<Value>),
    /// Represents absence of value
    None,
}

/// Declared type of a parameter or property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "inner")]
pub enum ValueType {
    Integer,
    Float,
    String,
    Boolean,
    /// Array of a specific type
    Array(Box<ValueType>),
    /// Accepts any type
    Any,
}

impl Value {
    /// Get the type of this value.
    pub fn get_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Array(arr) => match arr.first() {
                Some(first) => ValueType::Array(Box::new(first.get_type())),
                None => ValueType::Array(Box::new(ValueType::Any)),
            },
            Value::None => ValueType::Any,
        }
    }

    /// Try to get this value as an integer.
    pub fn as_integer(&self) -> Option<i64> {
        if let Value::Integer(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    /// Try to get this value as a float. Integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string slice.
    pub fn as_string(&self) -> Option<&str> {
        if let Value::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Boolean(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    /// Try to get this value as an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        if let Value::Array(arr) = self {
            Some(arr)
        } else {
            None
        }
    }

    /// Check if this is the None value.
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Parse a value from its textual form, inferring the type.
    ///
    /// `true`/`false` become booleans, numbers become integers or floats,
    /// comma separated lists become arrays, everything else is a string.
    pub fn parse_inferred(text: &str) -> Value {
        let text = text.trim();
        if text.contains(',') {
            return Value::Array(text.split(',').map(Value::parse_inferred).collect());
        }
        if let Ok(b) = text.parse::<bool>() {
            return Value::Boolean(b);
        }
        if let Ok(i) = text.parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return Value::Float(f);
        }
        Value::String(text.to_string())
    }

    /// Convert a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(arr) => Value::Array(arr.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(_) => Value::String(json.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Array(arr) => {
                let parts: Vec<String> = arr.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::None => f.write_str("none"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl ValueType {
    /// Check whether a value satisfies this type.
    ///
    /// Integers are accepted where floats are declared.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Any, _) => true,
            (ValueType::Integer, Value::Integer(_)) => true,
            (ValueType::Float, Value::Float(_) | Value::Integer(_)) => true,
            (ValueType::String, Value::String(_)) => true,
            (ValueType::Boolean, Value::Boolean(_)) => true,
            (ValueType::Array(inner), Value::Array(items)) => items.iter().all(|v| inner.matches(v)),
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Integer => f.write_str("Integer"),
            ValueType::Float => f.write_str("Float"),
            ValueType::String => f.write_str("String"),
            ValueType::Boolean => f.write_str("Boolean"),
            ValueType::Array(inner) => write!(f, "Array<{}>", inner),
            ValueType::Any => f.write_str("Any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_integral_types() {
        assert_eq!(DataType::UInt8.coerce(300.0), 255.0);
        assert_eq!(DataType::UInt8.coerce(-4.0), 0.0);
        assert_eq!(DataType::Int8.coerce(-3.6), -4.0);
        assert_eq!(DataType::Int16.coerce(f64::NAN), 0.0);
        assert_eq!(DataType::Float64.coerce(1.25), 1.25);
    }

    #[test]
    fn test_data_type_names() {
        for t in DataType::all() {
            assert_eq!(t.name().parse::<DataType>().unwrap(), *t);
        }
        assert!("complex64".parse::<DataType>().is_err());
        assert_eq!(DataType::Float32.size_in_bytes(), 4);
    }

    #[test]
    fn test_value_type_matching() {
        assert!(ValueType::Float.matches(&Value::Integer(3)));
        assert!(!ValueType::Integer.matches(&Value::Float(3.0)));
        assert!(ValueType::Array(Box::new(ValueType::String)).matches(&Value::from(vec!["a", "b"])));
        assert!(!ValueType::Array(Box::new(ValueType::String)).matches(&Value::from(vec![1, 2])));
    }

    #[test]
    fn test_parse_inferred() {
        assert_eq!(Value::parse_inferred("true"), Value::Boolean(true));
        assert_eq!(Value::parse_inferred("42"), Value::Integer(42));
        assert_eq!(Value::parse_inferred("2.5"), Value::Float(2.5));
        assert_eq!(Value::parse_inferred("red"), Value::String("red".to_string()));
        assert_eq!(
            Value::parse_inferred("a,b"),
            Value::Array(vec![Value::from("a"), Value::from("b")])
        );
    }
}
