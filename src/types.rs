//! Types and values of the fact language.
//!
//! A [`Type`] describes the shape of a predicate argument: one of the scalar
//! kinds or a composition of other types as a tuple or a homogeneous list.
//! A [`Value`] is a runtime datum; [`Value::type_check`] decides whether it
//! conforms to a type.
//!
//! Values carry two external encodings. The SQL encoding (via
//! [`rusqlite::types::ToSql`] and [`Value::from_sql`]) stores scalars natively
//! and composites as canonical JSON text. The canonical JSON form is also what
//! persisted fact digests are computed over, so it must stay deterministic.

// used for persistence
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

// used for the calendar date scalar
use chrono::NaiveDate;

// used for the canonical encoding of composite values
use serde_json::Value as Json;

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Bool,
    UInt64,
    Int64,
    String,
    Blob,
    Date,
    Tuple(Vec<Type>),
    List(Box<Type>),
}

impl Type {
    /// Built-in scalar types, keyed by the name they are declared with.
    pub fn scalars() -> Vec<(&'static str, Type)> {
        vec![
            ("bool", Type::Bool),
            ("uint64", Type::UInt64),
            ("int64", Type::Int64),
            ("string", Type::String),
            ("blob", Type::Blob),
            ("date", Type::Date),
        ]
    }
    /// Column affinity used when a value of this type is stored by SQLite.
    pub fn sql_repr(&self) -> &'static str {
        match self {
            Type::Bool | Type::UInt64 | Type::Int64 => "integer",
            Type::Blob => "blob",
            Type::String | Type::Date | Type::Tuple(_) | Type::List(_) => "text",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::UInt64 => write!(f, "uint64"),
            Type::Int64 => write!(f, "int64"),
            Type::String => write!(f, "string"),
            Type::Blob => write!(f, "blob"),
            Type::Date => write!(f, "date"),
            Type::Tuple(types) => {
                let inner: Vec<String> = types.iter().map(|t| t.to_string()).collect();
                write!(f, "({})", inner.join(", "))
            }
            Type::List(elem) => write!(f, "[{}]", elem),
        }
    }
}

impl FromStr for Type {
    type Err = Error;
    fn from_str(s: &str) -> Result<Type> {
        crate::script::parse_type(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Bool(bool),
    UInt64(u64),
    Int64(i64),
    String(String),
    Blob(Vec<u8>),
    Date(NaiveDate),
    Tuple(Vec<Value>),
    List(Vec<Value>),
}

impl Value {
    pub fn type_check(&self, ty: &Type) -> bool {
        match (self, ty) {
            (Value::Bool(_), Type::Bool)
            | (Value::UInt64(_), Type::UInt64)
            | (Value::Int64(_), Type::Int64)
            | (Value::String(_), Type::String)
            | (Value::Blob(_), Type::Blob)
            | (Value::Date(_), Type::Date) => true,
            (Value::Tuple(values), Type::Tuple(types)) => {
                values.len() == types.len()
                    && values.iter().zip(types.iter()).all(|(v, t)| v.type_check(t))
            }
            (Value::List(values), Type::List(elem)) => values.iter().all(|v| v.type_check(elem)),
            _ => false,
        }
    }
    /// The type of this value, if it can be told from the value alone.
    /// An empty list carries no element type, so it yields `None`, as does a
    /// list whose elements do not all share the type of the first.
    pub fn type_of(&self) -> Option<Type> {
        Some(match self {
            Value::Bool(_) => Type::Bool,
            Value::UInt64(_) => Type::UInt64,
            Value::Int64(_) => Type::Int64,
            Value::String(_) => Type::String,
            Value::Blob(_) => Type::Blob,
            Value::Date(_) => Type::Date,
            Value::Tuple(values) => {
                Type::Tuple(values.iter().map(|v| v.type_of()).collect::<Option<Vec<_>>>()?)
            }
            Value::List(values) => {
                let elem = values.first()?.type_of()?;
                if !values.iter().all(|v| v.type_check(&elem)) {
                    return None;
                }
                Type::List(Box::new(elem))
            }
        })
    }
    pub fn to_json(&self) -> Json {
        match self {
            Value::Bool(b) => Json::from(*b),
            Value::UInt64(n) => Json::from(*n),
            Value::Int64(n) => Json::from(*n),
            Value::String(s) => Json::from(s.as_str()),
            Value::Blob(bytes) => Json::from(to_hex(bytes)),
            Value::Date(d) => Json::from(d.to_string()),
            Value::Tuple(values) | Value::List(values) => {
                Json::Array(values.iter().map(|v| v.to_json()).collect())
            }
        }
    }
    pub fn from_json(ty: &Type, json: &Json) -> Result<Value> {
        let corrupt = || Error::DataCorruption {
            message: format!("{} is not a valid {}", json, ty),
        };
        Ok(match ty {
            Type::Bool => Value::Bool(json.as_bool().ok_or_else(corrupt)?),
            Type::UInt64 => Value::UInt64(json.as_u64().ok_or_else(corrupt)?),
            Type::Int64 => Value::Int64(json.as_i64().ok_or_else(corrupt)?),
            Type::String => Value::String(json.as_str().ok_or_else(corrupt)?.to_owned()),
            Type::Blob => Value::Blob(from_hex(json.as_str().ok_or_else(corrupt)?).ok_or_else(corrupt)?),
            Type::Date => Value::Date(
                NaiveDate::from_str(json.as_str().ok_or_else(corrupt)?).map_err(|_| corrupt())?,
            ),
            Type::Tuple(types) => {
                let items = json.as_array().ok_or_else(corrupt)?;
                if items.len() != types.len() {
                    return Err(corrupt());
                }
                Value::Tuple(
                    types
                        .iter()
                        .zip(items.iter())
                        .map(|(t, j)| Value::from_json(t, j))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            Type::List(elem) => Value::List(
                json.as_array()
                    .ok_or_else(corrupt)?
                    .iter()
                    .map(|j| Value::from_json(elem, j))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }
    /// Reads a stored column back into a value of the declared type.
    pub fn from_sql(ty: &Type, value: ValueRef) -> Result<Value> {
        let corrupt = |detail: &str| Error::DataCorruption {
            message: format!("column holding {} contains {}", ty, detail),
        };
        Ok(match (ty, value) {
            (Type::Bool, ValueRef::Integer(n)) => Value::Bool(n != 0),
            // u64 values are stored bit-for-bit in SQLite's signed integers
            (Type::UInt64, ValueRef::Integer(n)) => Value::UInt64(n as u64),
            (Type::Int64, ValueRef::Integer(n)) => Value::Int64(n),
            (Type::String, ValueRef::Text(bytes)) => Value::String(
                String::from_utf8(bytes.to_vec()).map_err(|_| corrupt("invalid utf-8"))?,
            ),
            (Type::Blob, ValueRef::Blob(bytes)) => Value::Blob(bytes.to_vec()),
            (Type::Date, ValueRef::Text(bytes)) => {
                let text = std::str::from_utf8(bytes).map_err(|_| corrupt("invalid utf-8"))?;
                Value::Date(NaiveDate::from_str(text).map_err(|_| corrupt(text))?)
            }
            (Type::Tuple(_) | Type::List(_), ValueRef::Text(bytes)) => {
                let json: Json = serde_json::from_slice(bytes).map_err(|e| corrupt(&e.to_string()))?;
                Value::from_json(ty, &json)?
            }
            (_, other) => return Err(corrupt(&format!("{:?}", other.data_type()))),
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Bool(b) => ToSqlOutput::from(*b as i64),
            Value::UInt64(n) => ToSqlOutput::from(*n as i64),
            Value::Int64(n) => ToSqlOutput::from(*n),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            Value::Date(d) => ToSqlOutput::from(d.to_string()),
            Value::Tuple(_) | Value::List(_) => ToSqlOutput::from(self.to_json().to_string()),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::UInt64(n) => write!(f, "{}", n),
            Value::Int64(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Blob(bytes) => write!(f, "x\"{}\"", to_hex(bytes)),
            Value::Date(d) => write!(f, "d\"{}\"", d),
            Value::Tuple(values) => {
                let inner: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", inner.join(", "))
            }
            Value::List(values) => {
                let inner: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", inner.join(", "))
            }
        }
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_checks_against_any_list() {
        let empty = Value::List(vec![]);
        assert!(empty.type_check(&Type::List(Box::new(Type::String))));
        assert!(empty.type_check(&Type::List(Box::new(Type::UInt64))));
        assert!(!empty.type_check(&Type::String));
        assert_eq!(empty.type_of(), None);
    }

    #[test]
    fn mixed_lists_have_no_type() {
        let mixed = Value::List(vec![Value::UInt64(1), Value::String("a".into())]);
        assert_eq!(mixed.type_of(), None);
        let nested = Value::List(vec![Value::Tuple(vec![Value::UInt64(1)]), Value::Tuple(vec![])]);
        assert_eq!(nested.type_of(), None);
        let uniform = Value::List(vec![Value::Int64(-1), Value::Int64(2)]);
        assert_eq!(uniform.type_of(), Some(Type::List(Box::new(Type::Int64))));
    }

    #[test]
    fn tuple_arity_is_part_of_the_type() {
        let pair = Value::Tuple(vec![Value::UInt64(1), Value::String("a".into())]);
        assert!(pair.type_check(&Type::Tuple(vec![Type::UInt64, Type::String])));
        assert!(!pair.type_check(&Type::Tuple(vec![Type::UInt64])));
        assert!(!pair.type_check(&Type::Tuple(vec![Type::String, Type::UInt64])));
    }

    #[test]
    fn composite_json_is_decoded_by_type() {
        let ty = Type::List(Box::new(Type::Tuple(vec![Type::Blob, Type::Date])));
        let value = Value::List(vec![Value::Tuple(vec![
            Value::Blob(vec![0, 255, 16]),
            Value::Date(NaiveDate::from_ymd_opt(2016, 2, 29).unwrap()),
        ])]);
        assert_eq!(value.to_json().to_string(), r#"[["00ff10","2016-02-29"]]"#);
        assert_eq!(Value::from_json(&ty, &value.to_json()).unwrap(), value);
    }

    #[test]
    fn hex_rejects_odd_input() {
        assert_eq!(from_hex("abc"), None);
        assert_eq!(from_hex("zz"), None);
        assert_eq!(from_hex("0a0B"), Some(vec![10, 11]));
    }

    #[test]
    fn display_renders_nested_types() {
        let ty = Type::Tuple(vec![Type::String, Type::List(Box::new(Type::UInt64))]);
        assert_eq!(ty.to_string(), "(string, [uint64])");
    }
}
