use trac_error::{Result, TracError};

use crate::schema::TableSchema;
use crate::value::Value;

/// Reorders and re-cases an incoming row, keyed by field name, into the
/// order declared by `schema`. Extra fields not present in the schema are
/// dropped with a logged warning; fields the schema declares but the row
/// omits are a hard error. Lossless widening (e.g. integer into a float
/// column) is left to the batch builder, which accepts it at the point
/// values are pushed into typed column vectors.
pub fn reconcile_row(schema: &TableSchema, mut raw: Vec<(String, Value)>) -> Result<Vec<Value>> {
    if schema.is_dynamic() {
        // A dynamic schema has no declared fields yet: pass the row through
        // in the order it arrived. Callers filling a dynamic schema are
        // expected to derive its fields from the first row they observe.
        return Ok(raw.into_iter().map(|(_, v)| v).collect());
    }

    let mut by_name: std::collections::HashMap<String, Value> = std::collections::HashMap::new();
    for (name, value) in raw.drain(..) {
        let key = name.to_ascii_lowercase();
        if schema.field_index(&key).is_none() {
            tracing::warn!(field = %name, "dropping field not present in declared schema");
            continue;
        }
        by_name.insert(key, value);
    }

    let mut reordered = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let key = field.name.to_ascii_lowercase();
        match by_name.remove(&key) {
            Some(value) => reordered.push(value),
            None => {
                return Err(TracError::InputValidation(format!(
                    "missing required field '{}'",
                    field.name
                )))
            }
        }
    }

    Ok(reordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSchema, FieldType};
    use crate::value::Scalar;

    #[test]
    fn reorders_and_recases_and_drops_extras() {
        let schema = TableSchema::new(vec![
            FieldSchema::new("id", FieldType::Integer),
            FieldSchema::new("amount", FieldType::Float),
        ]);

        let raw = vec![
            ("Amount".to_string(), Value::Scalar(Scalar::Float(10.5))),
            ("extra".to_string(), Value::Scalar(Scalar::Boolean(true))),
            ("ID".to_string(), Value::Scalar(Scalar::Integer(1))),
        ];

        let row = reconcile_row(&schema, raw).unwrap();
        assert_eq!(row[0], Value::Scalar(Scalar::Integer(1)));
        assert_eq!(row[1], Value::Scalar(Scalar::Float(10.5)));
    }

    #[test]
    fn missing_field_is_an_error() {
        let schema = TableSchema::new(vec![FieldSchema::new("id", FieldType::Integer)]);
        let err = reconcile_row(&schema, vec![]).unwrap_err();
        assert!(matches!(err, TracError::InputValidation(_)));
    }
}
