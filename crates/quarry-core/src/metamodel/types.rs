//! Basic (column-level) types and the types query expressions can take.

use crate::value::Value;
use std::fmt;

/// Types that map onto a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasicType {
    Boolean,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    Double,
    Character,
    String,
    Binary,
    /// Microseconds since the Unix epoch.
    Timestamp,
    Uuid,
}

impl BasicType {
    pub fn is_numeric(self) -> bool {
        matches!(self, BasicType::Integer | BasicType::Long | BasicType::Double)
    }

    pub fn is_string_like(self) -> bool {
        matches!(self, BasicType::Character | BasicType::String)
    }

    pub fn name(self) -> &'static str {
        match self {
            BasicType::Boolean => "boolean",
            BasicType::Integer => "integer",
            BasicType::Long => "long",
            BasicType::Double => "double",
            BasicType::Character => "character",
            BasicType::String => "string",
            BasicType::Binary => "binary",
            BasicType::Timestamp => "timestamp",
            BasicType::Uuid => "uuid",
        }
    }

    /// SQL column type used when describing the mapping.
    pub fn sql_type_name(self) -> &'static str {
        match self {
            BasicType::Boolean => "BOOLEAN",
            BasicType::Integer => "INTEGER",
            BasicType::Long => "BIGINT",
            BasicType::Double => "DOUBLE",
            BasicType::Character => "CHAR(1)",
            BasicType::String => "VARCHAR",
            BasicType::Binary => "BLOB",
            BasicType::Timestamp => "TIMESTAMP",
            BasicType::Uuid => "UUID",
        }
    }

    /// The natural type of a value, if it has one.
    pub fn of_value(value: &Value) -> Option<BasicType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(BasicType::Boolean),
            Value::Int32(_) => Some(BasicType::Integer),
            Value::Int64(_) => Some(BasicType::Long),
            Value::Float64(_) => Some(BasicType::Double),
            Value::Char(_) => Some(BasicType::Character),
            Value::String(_) => Some(BasicType::String),
            Value::Bytes(_) => Some(BasicType::Binary),
            Value::Timestamp(_) => Some(BasicType::Timestamp),
            Value::Uuid(_) => Some(BasicType::Uuid),
        }
    }

    /// Whether a value of type `other` may be compared with or assigned to this type.
    pub fn is_compatible_with(self, other: BasicType) -> bool {
        self == other
            || (self.is_numeric() && other.is_numeric())
            || (self.is_string_like() && other.is_string_like())
            || matches!(
                (self, other),
                (BasicType::Timestamp, BasicType::Long) | (BasicType::Long, BasicType::Timestamp)
            )
    }

    /// Re-wrap a value as this type, or `None` if it cannot be represented.
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (BasicType::Boolean, Value::Bool(b)) => Some(Value::Bool(b)),
            (BasicType::Boolean, Value::Int32(i)) if i == 0 || i == 1 => Some(Value::Bool(i == 1)),
            (BasicType::Boolean, Value::Int64(i)) if i == 0 || i == 1 => Some(Value::Bool(i == 1)),
            (BasicType::Integer, Value::Int32(i)) => Some(Value::Int32(i)),
            (BasicType::Integer, Value::Int64(i)) => i32::try_from(i).ok().map(Value::Int32),
            (BasicType::Long, Value::Int32(i)) => Some(Value::Int64(i64::from(i))),
            (BasicType::Long, Value::Int64(i)) => Some(Value::Int64(i)),
            (BasicType::Long, Value::Timestamp(i)) => Some(Value::Int64(i)),
            (BasicType::Double, Value::Int32(i)) => Some(Value::Float64(f64::from(i))),
            (BasicType::Double, Value::Int64(i)) => Some(Value::Float64(i as f64)),
            (BasicType::Double, Value::Float64(f)) => Some(Value::Float64(f)),
            (BasicType::Character, Value::Char(c)) => Some(Value::Char(c)),
            (BasicType::Character, Value::String(s)) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(Value::Char(c)),
                    _ => None,
                }
            }
            (BasicType::String, Value::String(s)) => Some(Value::String(s)),
            (BasicType::String, Value::Char(c)) => Some(Value::String(c.to_string())),
            (BasicType::Binary, Value::Bytes(b)) => Some(Value::Bytes(b)),
            (BasicType::Timestamp, Value::Timestamp(t)) => Some(Value::Timestamp(t)),
            (BasicType::Timestamp, Value::Int64(t)) => Some(Value::Timestamp(t)),
            (BasicType::Timestamp, Value::Int32(t)) => Some(Value::Timestamp(i64::from(t))),
            (BasicType::Uuid, Value::Uuid(u)) => Some(Value::Uuid(u)),
            (BasicType::Uuid, Value::Bytes(b)) => <[u8; 16]>::try_from(b.as_slice())
                .ok()
                .map(Value::Uuid),
            _ => None,
        }
    }

    /// Result type of arithmetic between two numeric types.
    pub fn widen(self, other: BasicType) -> BasicType {
        match (self, other) {
            (BasicType::Double, _) | (_, BasicType::Double) => BasicType::Double,
            (BasicType::Long, _) | (_, BasicType::Long) => BasicType::Long,
            _ => BasicType::Integer,
        }
    }
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The type of a query expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExpressableType {
    Basic(BasicType),
    /// An entity-valued expression; compares by identifier.
    Entity(String),
    Embeddable(String),
    /// A plural attribute; only usable in joins, `member of` and `is empty`.
    Collection { role: String, element: String },
}

impl ExpressableType {
    pub fn basic(&self) -> Option<BasicType> {
        match self {
            ExpressableType::Basic(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_entity(&self) -> bool {
        matches!(self, ExpressableType::Entity(_))
    }
}

impl fmt::Display for ExpressableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressableType::Basic(t) => write!(f, "{}", t),
            ExpressableType::Entity(name) => write!(f, "entity {}", name),
            ExpressableType::Embeddable(name) => write!(f, "embeddable {}", name),
            ExpressableType::Collection { role, .. } => write!(f, "collection {}", role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn character_promotes_to_string() {
        assert_eq!(
            BasicType::String.coerce(Value::Char('A')),
            Some(Value::String("A".into()))
        );
        assert_eq!(
            BasicType::Character.coerce(Value::String("B".into())),
            Some(Value::Char('B'))
        );
        assert_eq!(BasicType::Character.coerce(Value::String("BB".into())), None);
    }

    #[test]
    fn integer_widening() {
        assert_eq!(BasicType::Long.coerce(Value::Int32(100)), Some(Value::Int64(100)));
        assert_eq!(
            BasicType::Double.coerce(Value::Int32(3)),
            Some(Value::Float64(3.0))
        );
        assert_eq!(BasicType::Integer.coerce(Value::Int64(i64::MAX)), None);
    }

    #[test]
    fn incompatible_values_do_not_coerce() {
        assert_eq!(BasicType::Boolean.coerce(Value::String("yes".into())), None);
        assert_eq!(BasicType::Long.coerce(Value::Bool(true)), None);
        assert_eq!(BasicType::Uuid.coerce(Value::Null), Some(Value::Null));
    }

    #[test]
    fn compatibility() {
        assert!(BasicType::Integer.is_compatible_with(BasicType::Double));
        assert!(BasicType::String.is_compatible_with(BasicType::Character));
        assert!(!BasicType::String.is_compatible_with(BasicType::Boolean));
    }

    #[test]
    fn widen_numeric() {
        assert_eq!(BasicType::Integer.widen(BasicType::Long), BasicType::Long);
        assert_eq!(BasicType::Long.widen(BasicType::Double), BasicType::Double);
        assert_eq!(BasicType::Integer.widen(BasicType::Integer), BasicType::Integer);
    }
}
