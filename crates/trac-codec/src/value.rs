use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::FieldType;

/// A single scalar value of one of the basic field types, shared by table
/// cells and tag attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Scalar {
    pub fn field_type(&self) -> FieldType {
        match self {
            Scalar::Boolean(_) => FieldType::Boolean,
            Scalar::Integer(_) => FieldType::Integer,
            Scalar::Float(_) => FieldType::Float,
            Scalar::Decimal(_) => FieldType::Decimal,
            Scalar::String(_) => FieldType::String,
            Scalar::Date(_) => FieldType::Date,
            Scalar::DateTime(_) => FieldType::DateTime,
        }
    }
}

/// A cell value or a tag attribute value: null, a scalar, or a homogeneous
/// array of scalars. Compound values (maps, nested arrays) have no
/// representation here and so cannot be constructed — that is how the
/// "no compound attributes" invariant is upheld at the type level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Scalar(Scalar),
    Array(FieldType, Vec<Scalar>),
}

impl Value {
    /// Builds an array value, checking that every member matches
    /// `element_type` (the invariant "all members of the same basic type").
    pub fn array(element_type: FieldType, values: Vec<Scalar>) -> Result<Self, String> {
        for v in &values {
            if v.field_type() != element_type {
                return Err(format!(
                    "array element has type {:?}, expected {:?}",
                    v.field_type(),
                    element_type
                ));
            }
        }
        Ok(Value::Array(element_type, values))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}
