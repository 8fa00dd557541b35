//! Dynamic scalar values bridging mapped properties to the driver.
//!
//! Property getters and setters are type-erased, so the values flowing
//! between mapped objects and generated SQL need a closed runtime
//! representation. [`Value`] is that representation: it binds as a query
//! parameter via `ToSql` and hydrates from result columns via `FromSql`,
//! delegating to the concrete scalar encodings per variant.

use crate::error::{OrmError, OrmResult};
use bytes::BytesMut;
use chrono::{DateTime, TimeZone, Utc};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use uuid::Uuid;

/// A runtime scalar value for a mapped column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Whether this value is the zero value of its scalar kind.
    ///
    /// The save decision treats a zero-valued primary key as "not yet
    /// persisted": `0` for integers, empty for text/bytes, the nil UUID,
    /// the epoch for timestamps, and `Null` always.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Int(v) => *v == 0,
            Value::Float(v) => *v == 0.0,
            Value::Text(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Uuid(u) => u.is_nil(),
            Value::Timestamp(t) => t.timestamp() == 0 && t.timestamp_subsec_nanos() == 0,
        }
    }

    /// Read this value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Read this value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read this value as a bool, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::Int(v) => match *ty {
                Type::INT2 => (*v as i16).to_sql(ty, out),
                Type::INT4 => (*v as i32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Text(v) => v.to_sql(ty, out),
            Value::Bytes(v) => v.to_sql(ty, out),
            Value::Uuid(v) => v.to_sql(ty, out),
            Value::Timestamp(v) => match *ty {
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // A Value is dynamically typed; mismatches surface per-variant in to_sql.
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> Result<Value, Box<dyn std::error::Error + Sync + Send>> {
        match *ty {
            Type::BOOL => Ok(Value::Bool(bool::from_sql(ty, raw)?)),
            Type::INT2 => Ok(Value::Int(i16::from_sql(ty, raw)? as i64)),
            Type::INT4 => Ok(Value::Int(i32::from_sql(ty, raw)? as i64)),
            Type::INT8 => Ok(Value::Int(i64::from_sql(ty, raw)?)),
            Type::FLOAT4 => Ok(Value::Float(f32::from_sql(ty, raw)? as f64)),
            Type::FLOAT8 => Ok(Value::Float(f64::from_sql(ty, raw)?)),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                Ok(Value::Text(String::from_sql(ty, raw)?))
            }
            Type::BYTEA => Ok(Value::Bytes(Vec::<u8>::from_sql(ty, raw)?)),
            Type::UUID => Ok(Value::Uuid(Uuid::from_sql(ty, raw)?)),
            Type::TIMESTAMPTZ => Ok(Value::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?)),
            Type::TIMESTAMP => {
                let naive = chrono::NaiveDateTime::from_sql(ty, raw)?;
                Ok(Value::Timestamp(Utc.from_utc_datetime(&naive)))
            }
            _ => Err(format!("unsupported column type for Value: {}", ty).into()),
        }
    }

    fn from_sql_null(_ty: &Type) -> Result<Value, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Value::Null)
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::BOOL
                | Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::BYTEA
                | Type::UUID
                | Type::TIMESTAMPTZ
                | Type::TIMESTAMP
        )
    }
}

/// Conversion from a mapped field's type into a [`Value`].
pub trait IntoValue {
    fn into_value(self) -> Value;
}

/// Conversion from a hydrated [`Value`] back into a mapped field's type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> OrmResult<Self>;
}

macro_rules! int_value {
    ($($t:ty),*) => {
        $(
            impl IntoValue for $t {
                fn into_value(self) -> Value {
                    Value::Int(self as i64)
                }
            }

            impl FromValue for $t {
                fn from_value(value: Value) -> OrmResult<Self> {
                    match value {
                        Value::Int(v) => Ok(v as $t),
                        other => Err(OrmError::decode(
                            stringify!($t),
                            format!("expected integer, got {:?}", other),
                        )),
                    }
                }
            }
        )*
    };
}

int_value!(i16, i32, i64);

macro_rules! float_value {
    ($($t:ty),*) => {
        $(
            impl IntoValue for $t {
                fn into_value(self) -> Value {
                    Value::Float(self as f64)
                }
            }

            impl FromValue for $t {
                fn from_value(value: Value) -> OrmResult<Self> {
                    match value {
                        Value::Float(v) => Ok(v as $t),
                        Value::Int(v) => Ok(v as $t),
                        other => Err(OrmError::decode(
                            stringify!($t),
                            format!("expected float, got {:?}", other),
                        )),
                    }
                }
            }
        )*
    };
}

float_value!(f32, f64);

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(OrmError::decode("bool", format!("expected bool, got {:?}", other))),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(OrmError::decode("text", format!("expected text, got {:?}", other))),
        }
    }
}

impl IntoValue for Vec<u8> {
    fn into_value(self) -> Value {
        Value::Bytes(self)
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(OrmError::decode("bytea", format!("expected bytes, got {:?}", other))),
        }
    }
}

impl IntoValue for Uuid {
    fn into_value(self) -> Value {
        Value::Uuid(self)
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Uuid(u) => Ok(u),
            other => Err(OrmError::decode("uuid", format!("expected uuid, got {:?}", other))),
        }
    }
}

impl IntoValue for DateTime<Utc> {
    fn into_value(self) -> Value {
        Value::Timestamp(self)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Timestamp(t) => Ok(t),
            other => Err(OrmError::decode(
                "timestamptz",
                format!("expected timestamp, got {:?}", other),
            )),
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> OrmResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> OrmResult<Self> {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values() {
        assert!(Value::Null.is_zero());
        assert!(Value::Int(0).is_zero());
        assert!(Value::Text(String::new()).is_zero());
        assert!(Value::Uuid(Uuid::nil()).is_zero());
        assert!(!Value::Int(7).is_zero());
        assert!(!Value::Text("x".into()).is_zero());
        assert!(!Value::Uuid(Uuid::from_u128(1)).is_zero());
    }

    #[test]
    fn int_round_trip() {
        let v = 42_i32.into_value();
        assert_eq!(v, Value::Int(42));
        assert_eq!(i32::from_value(v).unwrap(), 42);
    }

    #[test]
    fn option_round_trip() {
        let v: Option<String> = None;
        assert_eq!(v.into_value(), Value::Null);
        let back: Option<String> = FromValue::from_value(Value::Null).unwrap();
        assert_eq!(back, None);

        let v = Some("abc".to_string()).into_value();
        assert_eq!(v, Value::Text("abc".into()));
    }

    #[test]
    fn mismatched_kind_is_decode_error() {
        let err = i64::from_value(Value::Text("nope".into())).unwrap_err();
        assert!(matches!(err, OrmError::Decode { .. }));
    }
}
