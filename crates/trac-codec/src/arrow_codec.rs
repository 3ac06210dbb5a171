//! Arrow IPC stream encode/decode: schema message, then one `RecordBatch`
//! message per input batch, then end-of-stream — the wire format used for
//! TRAC's own on-disk storage of tabular data (§6, `data.arrows`).

use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, BooleanArray, Date32Array, Decimal128Array, DictionaryArray, Float64Array,
    Int32Array, Int64Array, RecordBatch as ArrowBatch, StringArray,
    TimestampMicrosecondArray,
};
use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{DataType, Field, Schema as ArrowSchema};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use trac_error::{Result, TracError};

use crate::batch::{Column, RecordBatch};
use crate::schema::{FieldSchema, FieldType, TableSchema};
use crate::value::{Scalar, Value};

const EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(1970, 1, 1) {
    Some(d) => d,
    None => unreachable!(),
};

fn arrow_type(field: &FieldSchema) -> DataType {
    if field.categorical {
        return DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8));
    }
    match field.field_type {
        FieldType::Boolean => DataType::Boolean,
        FieldType::Integer => DataType::Int64,
        FieldType::Float => DataType::Float64,
        FieldType::Decimal => DataType::Decimal128(38, 12),
        FieldType::String => DataType::Utf8,
        FieldType::Date => DataType::Date32,
        FieldType::DateTime => DataType::Timestamp(arrow_schema::TimeUnit::Microsecond, None),
    }
}

pub fn to_arrow_schema(schema: &TableSchema) -> ArrowSchema {
    let fields: Vec<Field> = schema
        .fields
        .iter()
        .map(|f| Field::new(&f.name, arrow_type(f), !f.not_null))
        .collect();
    ArrowSchema::new(fields)
}

/// Streaming Arrow IPC encoder: one `StreamWriter` per output, fed one
/// `RecordBatch` at a time.
pub struct ArrowEncoder {
    writer: Option<StreamWriter<Vec<u8>>>,
    schema: Option<TableSchema>,
}

impl ArrowEncoder {
    pub fn new() -> Self {
        Self {
            writer: None,
            schema: None,
        }
    }

    pub fn encode_batch(&mut self, batch: &RecordBatch, out: &mut Vec<u8>) -> Result<()> {
        if self.writer.is_none() {
            let arrow_schema = to_arrow_schema(&batch.schema);
            let writer = StreamWriter::try_new(Vec::new(), &arrow_schema)
                .map_err(|e| TracError::DataCorruption(format!("failed to open Arrow IPC stream: {e}")))?;
            self.writer = Some(writer);
            self.schema = Some(batch.schema.clone());
        }

        let arrow_batch = to_arrow_batch(batch)?;
        let writer = self.writer.as_mut().unwrap();
        writer
            .write(&arrow_batch)
            .map_err(|e| TracError::DataCorruption(format!("failed to write Arrow record batch: {e}")))?;

        out.extend_from_slice(writer.get_ref());
        writer.get_mut().clear();
        Ok(())
    }

    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .finish()
                .map_err(|e| TracError::DataCorruption(format!("failed to close Arrow IPC stream: {e}")))?;
            out.extend_from_slice(writer.get_ref());
        }
        Ok(())
    }
}

impl Default for ArrowEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn to_arrow_batch(batch: &RecordBatch) -> Result<ArrowBatch> {
    let arrow_schema = Arc::new(to_arrow_schema(&batch.schema));
    let columns: Vec<ArrayRef> = batch
        .columns
        .iter()
        .map(column_to_array)
        .collect::<Result<_>>()?;
    ArrowBatch::try_new(arrow_schema, columns)
        .map_err(|e| TracError::Unexpected(format!("arrow batch construction failed: {e}")))
}

fn column_to_array(column: &Column) -> Result<ArrayRef> {
    let array: ArrayRef = match column {
        Column::Boolean(v) => Arc::new(BooleanArray::from(v.clone())),
        Column::Integer(v) => Arc::new(Int64Array::from(v.clone())),
        Column::Float(v) => Arc::new(Float64Array::from(v.clone())),
        Column::Decimal(v) => {
            let scaled: Vec<Option<i128>> = v
                .iter()
                .map(|d| d.map(|d| (d.mantissa() as i128) * 10i128.pow(12u32.saturating_sub(d.scale()))))
                .collect();
            Arc::new(
                Decimal128Array::from(scaled)
                    .with_precision_and_scale(38, 12)
                    .map_err(|e| TracError::Unexpected(format!("decimal array: {e}")))?,
            )
        }
        Column::String(v) => Arc::new(StringArray::from(v.clone())),
        Column::Date(v) => {
            let days: Vec<Option<i32>> = v.map_days();
            Arc::new(Date32Array::from(days))
        }
        Column::DateTime(v) => {
            let micros: Vec<Option<i64>> = v
                .iter()
                .map(|dt| dt.map(|dt| dt.and_utc().timestamp_micros()))
                .collect();
            Arc::new(TimestampMicrosecondArray::from(micros))
        }
        Column::Dictionary { dictionary, indices } => {
            let keys = Int32Array::from(indices.clone());
            let values = StringArray::from(dictionary.clone());
            Arc::new(
                DictionaryArray::try_new(keys, Arc::new(values))
                    .map_err(|e| TracError::Unexpected(format!("dictionary array: {e}")))?,
            )
        }
    };
    Ok(array)
}

trait DaysSinceEpoch {
    fn map_days(&self) -> Vec<Option<i32>>;
}

impl DaysSinceEpoch for Vec<Option<NaiveDate>> {
    fn map_days(&self) -> Vec<Option<i32>> {
        self.iter()
            .map(|d| d.map(|d| (d - EPOCH).num_days() as i32))
            .collect()
    }
}

/// Arrow IPC decoder: reads a complete schema + record batch stream. Unlike
/// CSV/JSON, Arrow's IPC framing is not designed to be decoded from
/// arbitrary byte-level chunk boundaries — each `decode_chunk` call expects
/// a buffer containing one or more complete IPC messages, which is how the
/// local storage driver delivers file reads (whole file, chunked only for
/// backpressure, never split inside a message).
pub struct ArrowDecoder {
    pending: Vec<u8>,
}

impl ArrowDecoder {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<RecordBatch>> {
        self.pending.extend_from_slice(chunk);
        Ok(Vec::new())
    }

    pub fn finish(&mut self) -> Result<Vec<RecordBatch>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = std::io::Cursor::new(std::mem::take(&mut self.pending));
        let reader = StreamReader::try_new(cursor, None)
            .map_err(|e| TracError::DataCorruption(format!("CORRUPT_DATA: not a valid Arrow IPC stream: {e}")))?;

        let arrow_schema = reader.schema();
        let schema = from_arrow_schema(&arrow_schema)?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| {
                TracError::DataCorruption(format!("CORRUPT_DATA: failed to decode Arrow record batch: {e}"))
            })?;
            batches.push(from_arrow_batch(&schema, &batch)?);
        }
        Ok(batches)
    }
}

impl Default for ArrowDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn from_arrow_schema(schema: &ArrowSchema) -> Result<TableSchema> {
    let fields = schema
        .fields()
        .iter()
        .map(|f| {
            let (field_type, categorical) = match f.data_type() {
                DataType::Boolean => (FieldType::Boolean, false),
                DataType::Int64 => (FieldType::Integer, false),
                DataType::Float64 => (FieldType::Float, false),
                DataType::Decimal128(..) => (FieldType::Decimal, false),
                DataType::Utf8 => (FieldType::String, false),
                DataType::Date32 => (FieldType::Date, false),
                DataType::Timestamp(..) => (FieldType::DateTime, false),
                DataType::Dictionary(..) => (FieldType::String, true),
                other => {
                    return Err(TracError::SchemaIncompatible(format!(
                        "unsupported Arrow data type {other:?}"
                    )))
                }
            };
            let mut fs = FieldSchema::new(f.name(), field_type);
            fs.not_null = !f.is_nullable();
            fs.categorical = categorical;
            Ok(fs)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TableSchema::new(fields))
}

fn from_arrow_batch(schema: &TableSchema, batch: &ArrowBatch) -> Result<RecordBatch> {
    let mut columns = Vec::with_capacity(schema.fields.len());
    for (i, field) in schema.fields.iter().enumerate() {
        columns.push(array_to_column(field, batch.column(i).as_ref())?);
    }
    Ok(RecordBatch {
        schema: schema.clone(),
        row_count: batch.num_rows(),
        columns,
    })
}

fn array_to_column(field: &FieldSchema, array: &dyn Array) -> Result<Column> {
    use arrow_array::cast::AsArray;

    if field.categorical {
        let dict = array
            .as_any_dictionary_opt()
            .ok_or_else(|| TracError::Unexpected("expected a dictionary array".into()))?;
        let values = dict
            .values()
            .as_string::<i32>()
            .iter()
            .map(|s| s.map(str::to_string))
            .collect::<Vec<_>>();
        let keys = dict.keys();
        let indices: Vec<Option<i32>> = (0..keys.len())
            .map(|i| {
                if keys.is_null(i) {
                    None
                } else {
                    Some(dict.normalized_keys()[i] as i32)
                }
            })
            .collect();
        return Ok(Column::Dictionary {
            dictionary: values.into_iter().flatten().collect(),
            indices,
        });
    }

    let column = match field.field_type {
        FieldType::Boolean => Column::Boolean(
            array
                .as_boolean()
                .iter()
                .collect(),
        ),
        FieldType::Integer => Column::Integer(array.as_primitive::<arrow_array::types::Int64Type>().iter().collect()),
        FieldType::Float => Column::Float(array.as_primitive::<arrow_array::types::Float64Type>().iter().collect()),
        FieldType::Decimal => {
            let arr = array.as_primitive::<arrow_array::types::Decimal128Type>();
            Column::Decimal(
                (0..arr.len())
                    .map(|i| {
                        if arr.is_null(i) {
                            None
                        } else {
                            Some(Decimal::from_i128_with_scale(arr.value(i), arr.scale() as u32))
                        }
                    })
                    .collect(),
            )
        }
        FieldType::String => Column::String(
            array
                .as_string::<i32>()
                .iter()
                .map(|s| s.map(str::to_string))
                .collect(),
        ),
        FieldType::Date => {
            let arr = array.as_primitive::<arrow_array::types::Date32Type>();
            Column::Date(
                (0..arr.len())
                    .map(|i| {
                        if arr.is_null(i) {
                            None
                        } else {
                            Some(EPOCH + chrono::Duration::days(arr.value(i) as i64))
                        }
                    })
                    .collect(),
            )
        }
        FieldType::DateTime => {
            let arr = array.as_primitive::<arrow_array::types::TimestampMicrosecondType>();
            Column::DateTime(
                (0..arr.len())
                    .map(|i| {
                        if arr.is_null(i) {
                            None
                        } else {
                            chrono::DateTime::from_timestamp_micros(arr.value(i)).map(|d| d.naive_utc())
                        }
                    })
                    .collect(),
            )
        }
    };
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::RecordBatchBuilder;
    use crate::schema::FieldSchema;

    #[test]
    fn schema_round_trips_field_types() {
        let schema = TableSchema::new(vec![
            FieldSchema::new("id", FieldType::Integer).not_null(),
            FieldSchema::new("name", FieldType::String),
        ]);
        let arrow_schema = to_arrow_schema(&schema);
        let recovered = from_arrow_schema(&arrow_schema).unwrap();
        assert_eq!(recovered.fields[0].field_type, FieldType::Integer);
        assert!(recovered.fields[0].not_null);
        assert_eq!(recovered.fields[1].field_type, FieldType::String);
    }

    #[test]
    fn encode_then_decode_round_trips_row_values() {
        let schema = TableSchema::new(vec![
            FieldSchema::new("id", FieldType::Integer),
            FieldSchema::new("amount", FieldType::Float),
        ]);
        let mut builder = RecordBatchBuilder::new(schema, 10);
        builder
            .push_row(vec![
                Value::Scalar(Scalar::Integer(7)),
                Value::Scalar(Scalar::Float(1.5)),
            ])
            .unwrap();
        let batch = builder.flush().unwrap().unwrap();

        let mut out = Vec::new();
        let mut encoder = ArrowEncoder::new();
        encoder.encode_batch(&batch, &mut out).unwrap();
        encoder.finish(&mut out).unwrap();

        let mut decoder = ArrowDecoder::new();
        decoder.decode_chunk(&out).unwrap();
        let batches = decoder.finish().unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].row_count, 1);
        assert_eq!(batches[0].row(0)[0], Value::Scalar(Scalar::Integer(7)));
    }
}
