use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use trac_error::{Result, TracError};

use crate::dictionary::DictionaryStage;
use crate::schema::{FieldType, TableSchema};
use crate::value::{Scalar, Value};

/// One column of an in-memory, Arrow-like record batch.
#[derive(Debug, Clone)]
pub enum Column {
    Boolean(Vec<Option<bool>>),
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Decimal(Vec<Option<Decimal>>),
    String(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    DateTime(Vec<Option<NaiveDateTime>>),
    Dictionary {
        dictionary: Vec<String>,
        indices: Vec<Option<i32>>,
    },
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Boolean(v) => v.len(),
            Column::Integer(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Decimal(v) => v.len(),
            Column::String(v) => v.len(),
            Column::Date(v) => v.len(),
            Column::DateTime(v) => v.len(),
            Column::Dictionary { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize) -> Value {
        match self {
            Column::Boolean(v) => v[row].map(Scalar::Boolean).map_or(Value::Null, Value::Scalar),
            Column::Integer(v) => v[row].map(Scalar::Integer).map_or(Value::Null, Value::Scalar),
            Column::Float(v) => v[row].map(Scalar::Float).map_or(Value::Null, Value::Scalar),
            Column::Decimal(v) => v[row].map(Scalar::Decimal).map_or(Value::Null, Value::Scalar),
            Column::String(v) => v[row]
                .clone()
                .map(Scalar::String)
                .map_or(Value::Null, Value::Scalar),
            Column::Date(v) => v[row].map(Scalar::Date).map_or(Value::Null, Value::Scalar),
            Column::DateTime(v) => v[row]
                .map(Scalar::DateTime)
                .map_or(Value::Null, Value::Scalar),
            Column::Dictionary { dictionary, indices } => match indices[row] {
                None => Value::Null,
                Some(idx) => Value::Scalar(Scalar::String(dictionary[idx as usize].clone())),
            },
        }
    }
}

/// A bounded, schema-shaped set of rows passed between codec stages. The row
/// count never exceeds the decoder's configured `batch_size`.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub schema: TableSchema,
    pub columns: Vec<Column>,
    pub row_count: usize,
}

impl RecordBatch {
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.get(index)).collect()
    }
}

enum ColumnBuilder {
    Boolean(Vec<Option<bool>>),
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Decimal(Vec<Option<Decimal>>),
    String(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    DateTime(Vec<Option<NaiveDateTime>>),
    Dictionary(DictionaryStage),
}

/// Accumulates rows into a [`RecordBatch`], finalizing dictionary staging
/// and signalling "batch ready" exactly when `row_count == batch_size` or
/// the caller explicitly flushes a trailing partial batch at end of stream.
///
/// This is the batch consumer referenced by both the CSV and JSON decoders;
/// only the upstream tokenizers differ between codecs.
pub struct RecordBatchBuilder {
    schema: TableSchema,
    batch_size: usize,
    columns: Vec<ColumnBuilder>,
    current_index: usize,
}

impl RecordBatchBuilder {
    pub fn new(schema: TableSchema, batch_size: usize) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|f| {
                if f.categorical {
                    ColumnBuilder::Dictionary(DictionaryStage::new(true, Vec::new()))
                } else {
                    match f.field_type {
                        FieldType::Boolean => ColumnBuilder::Boolean(Vec::new()),
                        FieldType::Integer => ColumnBuilder::Integer(Vec::new()),
                        FieldType::Float => ColumnBuilder::Float(Vec::new()),
                        FieldType::Decimal => ColumnBuilder::Decimal(Vec::new()),
                        FieldType::String => ColumnBuilder::String(Vec::new()),
                        FieldType::Date => ColumnBuilder::Date(Vec::new()),
                        FieldType::DateTime => ColumnBuilder::DateTime(Vec::new()),
                    }
                }
            })
            .collect();

        Self {
            schema,
            batch_size,
            columns,
            current_index: 0,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_dynamic_schema(&self) -> bool {
        self.schema.fields.is_empty()
    }

    /// Pushes one row, already reordered and re-cased to schema field order.
    /// Returns `Some(batch)` if this row filled the batch.
    pub fn push_row(&mut self, values: Vec<Value>) -> Result<Option<RecordBatch>> {
        if values.len() != self.columns.len() {
            return Err(TracError::Unexpected(format!(
                "row has {} values, schema has {} fields",
                values.len(),
                self.columns.len()
            )));
        }

        for (field, (builder, value)) in self
            .schema
            .fields
            .iter()
            .zip(self.columns.iter_mut().zip(values.into_iter()))
        {
            if field.not_null && value.is_null() {
                return Err(TracError::DataConstraint(format!(
                    "null not allowed in non-nullable field {}",
                    field.name
                )));
            }
            push_value(builder, &field.name, value)?;
        }

        self.current_index += 1;

        if self.current_index == self.batch_size {
            Ok(Some(self.finish_batch()?))
        } else {
            Ok(None)
        }
    }

    /// Finalizes and returns whatever rows remain, even if the batch is not
    /// full. Returns `None` if no rows have been accumulated.
    pub fn flush(&mut self) -> Result<Option<RecordBatch>> {
        if self.current_index == 0 {
            return Ok(None);
        }
        Ok(Some(self.finish_batch()?))
    }

    fn finish_batch(&mut self) -> Result<RecordBatch> {
        let row_count = self.current_index;
        let mut columns = Vec::with_capacity(self.columns.len());

        for builder in &mut self.columns {
            let column = match builder {
                ColumnBuilder::Boolean(v) => Column::Boolean(std::mem::take(v)),
                ColumnBuilder::Integer(v) => Column::Integer(std::mem::take(v)),
                ColumnBuilder::Float(v) => Column::Float(std::mem::take(v)),
                ColumnBuilder::Decimal(v) => Column::Decimal(std::mem::take(v)),
                ColumnBuilder::String(v) => Column::String(std::mem::take(v)),
                ColumnBuilder::Date(v) => Column::Date(std::mem::take(v)),
                ColumnBuilder::DateTime(v) => Column::DateTime(std::mem::take(v)),
                ColumnBuilder::Dictionary(stage) => {
                    let indices = stage.finalize_batch()?;
                    Column::Dictionary {
                        dictionary: stage.dictionary().to_vec(),
                        indices,
                    }
                }
            };
            columns.push(column);
        }

        self.current_index = 0;

        Ok(RecordBatch {
            schema: self.schema.clone(),
            columns,
            row_count,
        })
    }
}

fn push_value(builder: &mut ColumnBuilder, field_name: &str, value: Value) -> Result<()> {
    let scalar = match value {
        Value::Null => None,
        Value::Scalar(s) => Some(s),
        Value::Array(..) => {
            return Err(TracError::DataConstraint(format!(
                "compound (array) value not allowed in table field {field_name}"
            )))
        }
    };

    match (builder, scalar) {
        (ColumnBuilder::Boolean(v), None) => v.push(None),
        (ColumnBuilder::Boolean(v), Some(Scalar::Boolean(b))) => v.push(Some(b)),
        (ColumnBuilder::Integer(v), None) => v.push(None),
        (ColumnBuilder::Integer(v), Some(Scalar::Integer(i))) => v.push(Some(i)),
        (ColumnBuilder::Float(v), None) => v.push(None),
        (ColumnBuilder::Float(v), Some(Scalar::Float(f))) => v.push(Some(f)),
        (ColumnBuilder::Float(v), Some(Scalar::Integer(i))) => v.push(Some(i as f64)),
        (ColumnBuilder::Decimal(v), None) => v.push(None),
        (ColumnBuilder::Decimal(v), Some(Scalar::Decimal(d))) => v.push(Some(d)),
        (ColumnBuilder::String(v), None) => v.push(None),
        (ColumnBuilder::String(v), Some(Scalar::String(s))) => v.push(Some(s)),
        (ColumnBuilder::Date(v), None) => v.push(None),
        (ColumnBuilder::Date(v), Some(Scalar::Date(d))) => v.push(Some(d)),
        (ColumnBuilder::DateTime(v), None) => v.push(None),
        (ColumnBuilder::DateTime(v), Some(Scalar::DateTime(d))) => v.push(Some(d)),
        (ColumnBuilder::Dictionary(stage), None) => stage.stage(None),
        (ColumnBuilder::Dictionary(stage), Some(Scalar::String(s))) => stage.stage(Some(s)),
        (_, Some(other)) => {
            return Err(TracError::DataConstraint(format!(
                "field {field_name} received a value of type {:?} that cannot be losslessly converted",
                other.field_type()
            )))
        }
    }

    Ok(())
}
