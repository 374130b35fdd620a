//! Row schemas: ordered, immutable lists of typed field descriptors.
//!
//! Every row flowing through the engine conforms positionally to a schema.
//! Schemas are shared as `Arc<RowSchema>`; identity comparison (`Arc::ptr_eq`)
//! is the fast path, structural compatibility the slow one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    /// Milliseconds since the Unix epoch.
    Date,
    /// Arbitrary-precision decimal kept in canonical string form.
    BigNumber,
    Binary,
    /// Free-form JSON document.
    Serializable,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::String => "String",
            ValueType::Integer => "Integer",
            ValueType::Number => "Number",
            ValueType::Boolean => "Boolean",
            ValueType::Date => "Date",
            ValueType::BigNumber => "BigNumber",
            ValueType::Binary => "Binary",
            ValueType::Serializable => "Serializable",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub value_type: ValueType,
    /// Display length, if known.
    pub length: Option<u32>,
    /// Display precision, if known.
    pub precision: Option<u32>,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
        }
    }

    pub fn with_length(mut self, length: u32, precision: Option<u32>) -> Self {
        self.length = Some(length);
        self.precision = precision;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    fields: Vec<FieldMeta>,
}

impl RowSchema {
    /// Build a schema, rejecting duplicate field names.
    pub fn new(fields: Vec<FieldMeta>) -> Result<Self> {
        for (i, f) in fields.iter().enumerate() {
            if fields[..i].iter().any(|g| g.name == f.name) {
                return Err(Error::Schema(format!("duplicate field name '{}'", f.name)));
            }
        }
        Ok(Self { fields })
    }

    pub fn empty() -> Self {
        Self { fields: vec![] }
    }

    pub fn builder() -> RowSchemaBuilder {
        RowSchemaBuilder { fields: vec![] }
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&FieldMeta> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Resolve several field names at once; fails on the first unknown name.
    pub fn indices_of(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                self.index_of(n)
                    .ok_or_else(|| Error::Schema(format!("field '{}' not found", n)))
            })
            .collect()
    }

    /// Same count, order and types. Names are not compared.
    pub fn is_compatible_with(&self, other: &RowSchema) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.value_type == b.value_type)
    }

    /// Check arity and per-value type conformance of a row.
    pub fn check_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.fields.len() {
            return Err(Error::Schema(format!(
                "row has {} values, schema has {} fields",
                row.len(),
                self.fields.len()
            )));
        }
        for (field, value) in self.fields.iter().zip(row.values()) {
            if !value.conforms_to(field.value_type) {
                return Err(Error::Schema(format!(
                    "field '{}' expects {}, got {}",
                    field.name,
                    field.value_type,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Append a field, producing a new schema (used by steps that add columns).
    pub fn with_field(&self, field: FieldMeta) -> Result<Self> {
        let mut fields = self.fields.clone();
        fields.push(field);
        Self::new(fields)
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

pub struct RowSchemaBuilder {
    fields: Vec<FieldMeta>,
}

impl RowSchemaBuilder {
    pub fn field(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.fields.push(FieldMeta::new(name, value_type));
        self
    }

    pub fn meta(mut self, meta: FieldMeta) -> Self {
        self.fields.push(meta);
        self
    }

    pub fn build(self) -> Result<RowSchema> {
        RowSchema::new(self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn sample() -> RowSchema {
        RowSchema::builder()
            .field("name", ValueType::String)
            .field("qty", ValueType::Integer)
            .field("ok", ValueType::Boolean)
            .build()
            .unwrap()
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = RowSchema::builder()
            .field("a", ValueType::String)
            .field("a", ValueType::Integer)
            .build();
        assert!(matches!(err, Err(Error::Schema(_))));
    }

    #[test]
    fn compatibility_ignores_names() {
        let a = sample();
        let b = RowSchema::builder()
            .field("x", ValueType::String)
            .field("y", ValueType::Integer)
            .field("z", ValueType::Boolean)
            .build()
            .unwrap();
        assert!(a.is_compatible_with(&b));

        let c = RowSchema::builder()
            .field("name", ValueType::String)
            .field("ok", ValueType::Boolean)
            .field("qty", ValueType::Integer)
            .build()
            .unwrap();
        assert!(!a.is_compatible_with(&c));
    }

    #[test]
    fn check_row_accepts_nulls_and_rejects_wrong_types() {
        let s = sample();
        let good = Row::new(vec![Value::Null, Value::Integer(3), Value::Boolean(true)]);
        assert!(s.check_row(&good).is_ok());

        let bad = Row::new(vec![
            Value::String("a".into()),
            Value::String("3".into()),
            Value::Boolean(true),
        ]);
        assert!(s.check_row(&bad).is_err());

        let short = Row::new(vec![Value::Null]);
        assert!(s.check_row(&short).is_err());
    }
}
