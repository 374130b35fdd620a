//! Row values and row tuples.
//!
//! A `Row` owns its values outright. Cloning a row is a deep copy, which is what
//! lets the engine hand the same logical tuple to several consumers without any
//! of them observing another's mutations.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::schema::ValueType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    /// Decimal in canonical string form, e.g. "123.45".
    BigNumber(String),
    Binary(Vec<u8>),
    Serializable(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `None` for nulls.
    pub fn value_type(&self) -> Option<ValueType> {
        Some(match self {
            Value::Null => return None,
            Value::String(_) => ValueType::String,
            Value::Integer(_) => ValueType::Integer,
            Value::Number(_) => ValueType::Number,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Date(_) => ValueType::Date,
            Value::BigNumber(_) => ValueType::BigNumber,
            Value::Binary(_) => ValueType::Binary,
            Value::Serializable(_) => ValueType::Serializable,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.value_type().map(ValueType::name).unwrap_or("Null")
    }

    /// Nulls conform to every type.
    pub fn conforms_to(&self, ty: ValueType) -> bool {
        self.value_type().map_or(true, |t| t == ty)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) | Value::Date(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::BigNumber(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a textual literal into a value of the given type.
    pub fn parse_as(ty: ValueType, literal: &str) -> Option<Value> {
        let lit = literal.trim();
        Some(match ty {
            ValueType::String => Value::String(lit.trim_matches('\'').to_string()),
            ValueType::Integer => Value::Integer(lit.parse().ok()?),
            ValueType::Number => Value::Number(lit.parse().ok()?),
            ValueType::Boolean => Value::Boolean(lit.parse().ok()?),
            ValueType::Date => Value::Date(lit.parse().ok()?),
            ValueType::BigNumber => {
                // Validate the literal is numeric; keep the text as given.
                lit.parse::<f64>().ok()?;
                Value::BigNumber(lit.to_string())
            }
            ValueType::Binary => Value::Binary(lit.as_bytes().to_vec()),
            ValueType::Serializable => Value::Serializable(serde_json::from_str(lit).ok()?),
        })
    }
}

/// Compare two values of the same type.
///
/// Nulls sort first. Values of different types are ordered by type rank; NaN
/// sorts after every other number.
pub fn value_cmp(a: &Value, b: &Value) -> Ordering {
    use Value::*;

    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (String(x), String(y)) => x.cmp(y),
        (Integer(x), Integer(y)) | (Date(x), Date(y)) => x.cmp(y),
        (Number(x), Number(y)) => {
            if x.is_nan() && y.is_nan() {
                Ordering::Equal
            } else if x.is_nan() {
                Ordering::Greater
            } else if y.is_nan() {
                Ordering::Less
            } else {
                x.partial_cmp(y).unwrap_or(Ordering::Equal)
            }
        }
        (Boolean(x), Boolean(y)) => x.cmp(y),
        (BigNumber(x), BigNumber(y)) => {
            match (x.parse::<f64>(), y.parse::<f64>()) {
                (Ok(fx), Ok(fy)) => fx.partial_cmp(&fy).unwrap_or(Ordering::Equal),
                _ => x.cmp(y),
            }
        }
        (Binary(x), Binary(y)) => x.cmp(y),
        (Serializable(x), Serializable(y)) => x.to_string().cmp(&y.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Numeric rank of a value's type, used for mixed-type ordering and hashing.
pub(crate) fn type_rank(v: &Value) -> u8 {
    use Value::*;
    match v {
        Null => 0,
        String(_) => 1,
        Integer(_) => 2,
        Number(_) => 3,
        Boolean(_) => 4,
        Date(_) => 5,
        BigNumber(_) => 6,
        Binary(_) => 7,
        Serializable(_) => 8,
    }
}

/// A fixed-length tuple of values, positionally bound to a `RowSchema`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Value> {
        self.0.get_mut(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn push(&mut self, v: Value) {
        self.0.push(v);
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}
