//! Dynamic in-memory values.
//!
//! Readers return and writers accept [`Value`]s.  Nested values are owned
//! boxes; recursive schema types are rejected at parse time, so nesting depth
//! is bounded by the schema.

use std::fmt;

/// A decoded or to-be-encoded protocol value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The empty case of a union.
    Null,
    Bool(bool),
    Int8(i8),
    Uint8(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Size(u64),
    Float32(f32),
    Float64(f64),
    ComplexFloat32(f32, f32),
    ComplexFloat64(f64, f64),
    String(String),
    /// Days since the Unix epoch.
    Date(i64),
    /// Nanoseconds since midnight.
    Time(i64),
    /// Nanoseconds since the Unix epoch.
    DateTime(i64),
    Optional(Option<Box<Value>>),
    /// `index` counts every declared case, the null case included.
    Union {
        index: u8,
        value: Box<Value>,
    },
    Vector(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// Field values in declaration order.
    Record(Vec<Value>),
}

impl Value {
    pub fn some(value: Value) -> Self {
        Value::Optional(Some(Box::new(value)))
    }

    pub fn none() -> Self {
        Value::Optional(None)
    }

    pub fn union(index: u8, value: Value) -> Self {
        Value::Union {
            index,
            value: Box::new(value),
        }
    }

    /// Short name of the variant, used in type-mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int8(_) => "int8",
            Value::Uint8(_) => "uint8",
            Value::Int16(_) => "int16",
            Value::Uint16(_) => "uint16",
            Value::Int32(_) => "int32",
            Value::Uint32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::Uint64(_) => "uint64",
            Value::Size(_) => "size",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::ComplexFloat32(..) => "complexfloat32",
            Value::ComplexFloat64(..) => "complexfloat64",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::Optional(_) => "optional",
            Value::Union { .. } => "union",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int8(v) => Some(v.into()),
            Value::Int16(v) => Some(v.into()),
            Value::Int32(v) => Some(v.into()),
            Value::Int64(v) => Some(v),
            Value::Uint8(v) => Some(v.into()),
            Value::Uint16(v) => Some(v.into()),
            Value::Uint32(v) => Some(v.into()),
            Value::Uint64(v) | Value::Size(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Uint8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Uint16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Uint32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Uint64(v) | Value::Size(v) => write!(f, "{v}"),
            // `{}` on floats prints the shortest text that parses back exactly.
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::ComplexFloat32(re, im) => write!(f, "({re}, {im})"),
            Value::ComplexFloat64(re, im) => write!(f, "({re}, {im})"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Date(d) => write!(f, "date({d})"),
            Value::Time(t) => write!(f, "time({t})"),
            Value::DateTime(t) => write!(f, "datetime({t})"),
            Value::Optional(None) => f.write_str("none"),
            Value::Optional(Some(v)) => write!(f, "some({v})"),
            Value::Union { index, value } => write!(f, "#{index}({value})"),
            Value::Vector(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Record(fields) => {
                f.write_str("{")?;
                for (i, v) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_i64_rejects_out_of_range_unsigned() {
        assert_eq!(Value::Int8(-128).as_i64(), Some(-128));
        assert_eq!(Value::Uint64(u64::MAX).as_i64(), None);
    }

    #[test]
    fn test_display_nested_values() {
        let v = Value::Vector(vec![Value::some(Value::Int32(1)), Value::none()]);
        assert_eq!(v.to_string(), "[some(1), none]");
    }
}
