//! Database values and entity identifiers.

use rkyv::{Archive, Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single column value as read from or bound to the database.
///
/// Floats compare and hash by bit pattern so values can take part in
/// identity keys and structural expression identity.
#[derive(Debug, Clone, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int32(_) => "integer",
            Value::Int64(_) => "long",
            Value::Float64(_) => "double",
            Value::Char(_) => "character",
            Value::String(_) => "string",
            Value::Bytes(_) => "binary",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) | Value::Timestamp(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Char(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => {
                for byte in v {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Timestamp(v) => write!(f, "{}", v),
            Value::Uuid(v) => {
                for (i, byte) in v.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        write!(f, "-")?;
                    }
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An entity identifier: one value for simple ids, several for composite ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Vec<Value>);

impl Identifier {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn simple(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }

    /// True when every component is null (e.g. the absent side of an outer join).
    pub fn is_null(&self) -> bool {
        self.0.iter().all(Value::is_null)
    }
}

impl From<Value> for Identifier {
    fn from(value: Value) -> Self {
        Identifier(vec![value])
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Identifier::simple(value)
    }
}

impl From<i32> for Identifier {
    fn from(value: i32) -> Self {
        Identifier::simple(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::simple(value)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{}", single),
            many => {
                write!(f, "(")?;
                for (i, v) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn floats_hash_by_bits() {
        let mut set = HashSet::new();
        set.insert(Value::Float64(1.5));
        assert!(set.contains(&Value::Float64(1.5)));
        assert!(!set.contains(&Value::Int64(1)));
    }

    #[test]
    fn different_variants_are_unequal() {
        assert_ne!(Value::Int32(1), Value::Int64(1));
        assert_ne!(Value::Char('a'), Value::String("a".into()));
    }

    #[test]
    fn identifier_display() {
        assert_eq!(Identifier::simple(7i64).to_string(), "7");
        let composite = Identifier::new(vec![Value::Int64(1), Value::String("A-1".into())]);
        assert_eq!(composite.to_string(), "(1, A-1)");
        assert!(composite.is_composite());
    }

    #[test]
    fn null_identifier() {
        assert!(Identifier::new(vec![Value::Null, Value::Null]).is_null());
        assert!(!Identifier::simple(0).is_null());
    }

    #[test]
    fn uuid_display() {
        let v = Value::Uuid([0x12; 16]);
        assert_eq!(v.to_string(), "12121212-1212-1212-1212-121212121212");
    }
}
