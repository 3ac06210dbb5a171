use serde::{Deserialize, Serialize};

use trac_error::{Result, TracError};

/// The basic, scalar type of a schema field or a tag attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    Decimal,
    String,
    Date,
    DateTime,
}

impl FieldType {
    /// The stable name used on the wire and in the metadata store's
    /// `attr_type`/schema columns.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Boolean => "BOOLEAN",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Decimal => "DECIMAL",
            FieldType::String => "STRING",
            FieldType::Date => "DATE",
            FieldType::DateTime => "DATETIME",
        }
    }

    /// Parses a wire-format field type name (spec §6 `SchemaField.field_type`).
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "BOOLEAN" => FieldType::Boolean,
            "INTEGER" => FieldType::Integer,
            "FLOAT" => FieldType::Float,
            "DECIMAL" => FieldType::Decimal,
            "STRING" => FieldType::String,
            "DATE" => FieldType::Date,
            "DATETIME" => FieldType::DateTime,
            other => return Err(TracError::InputValidation(format!("unknown field type '{other}'"))),
        })
    }
}

/// One field of a table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub label: Option<String>,
    pub business_key: bool,
    pub categorical: bool,
    pub not_null: bool,
    pub format_code: Option<String>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            label: None,
            business_key: false,
            categorical: false,
            not_null: false,
            format_code: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn categorical(mut self) -> Self {
        self.categorical = true;
        self
    }
}

/// An ordered sequence of field descriptors. A schema with zero fields is a
/// "dynamic schema" — one that will be filled in at runtime from the first
/// batch observed, rather than declared up front.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    pub fn is_dynamic(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.field_index(name).map(|i| &self.fields[i])
    }

    /// A schema is a "table schema" (as opposed to a schema that might carry
    /// nested/compound fields) when every field is one of the scalar
    /// `FieldType`s — which, by construction, `FieldSchema` always is. This
    /// helper exists to document the invariant at call sites that care.
    pub fn is_table_schema(&self) -> bool {
        true
    }

    /// True if `other` is a non-narrowing superset of `self`: every field in
    /// `self` is present in `other` with a type that is the same or a
    /// lossless widening, and no field has been removed.
    pub fn is_non_narrowing_superset(&self, other: &TableSchema) -> bool {
        for field in &self.fields {
            match other.field(&field.name) {
                None => return false,
                Some(candidate) => {
                    if !is_widening_or_equal(field.field_type, candidate.field_type) {
                        return false;
                    }
                    if field.not_null && !candidate.not_null {
                        // Relaxing not-null is fine; tightening it on an
                        // existing field is not considered here since it
                        // would reject pre-existing null rows retroactively.
                    }
                }
            }
        }
        true
    }
}

/// Lossless widening conversions allowed by the codec's field reconciliation
/// step: integer to float, and (within timestamp precisions) no-op today
/// since this model has a single `DateTime` granularity.
pub fn is_widening_or_equal(from: FieldType, to: FieldType) -> bool {
    if from == to {
        return true;
    }
    matches!((from, to), (FieldType::Integer, FieldType::Float))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_name_round_trips_through_parse() {
        for ty in [
            FieldType::Boolean,
            FieldType::Integer,
            FieldType::Float,
            FieldType::Decimal,
            FieldType::String,
            FieldType::Date,
            FieldType::DateTime,
        ] {
            assert_eq!(FieldType::parse(ty.name()).unwrap(), ty);
        }
    }

    #[test]
    fn unknown_field_type_name_is_rejected() {
        assert!(FieldType::parse("NOT_A_TYPE").is_err());
    }

    #[test]
    fn non_narrowing_superset_allows_int_to_float_widening() {
        let base = TableSchema::new(vec![FieldSchema::new("x", FieldType::Integer)]);
        let wider = TableSchema::new(vec![FieldSchema::new("x", FieldType::Float)]);
        assert!(base.is_non_narrowing_superset(&wider));
        assert!(!wider.is_non_narrowing_superset(&base));
    }

    #[test]
    fn non_narrowing_superset_rejects_a_dropped_field() {
        let base = TableSchema::new(vec![
            FieldSchema::new("x", FieldType::Integer),
            FieldSchema::new("y", FieldType::String),
        ]);
        let narrower = TableSchema::new(vec![FieldSchema::new("x", FieldType::Integer)]);
        assert!(!base.is_non_narrowing_superset(&narrower));
    }
}
