//! JSON encode/decode. The decoder implements the batch-consumer state
//! machine shared conceptually across codecs: tokens are scanned byte by
//! byte so that a record split across two input chunks resumes exactly
//! where it left off, without re-scanning already-consumed bytes.

use std::io::Write;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};

use trac_error::{Result, TracError};

use crate::batch::{Column, RecordBatch, RecordBatchBuilder};
use crate::schema::{FieldSchema, FieldType, TableSchema};
use crate::value::{Scalar, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Initial,
    InArray,
    MidRecord,
    EndOfStream,
}

/// Incremental JSON array-of-objects decoder. Works with or without a
/// pre-declared schema: given no schema, the decoder infers a table schema
/// from the first record it observes.
pub struct JsonDecoder {
    schema: Option<TableSchema>,
    batch_size: usize,
    builder: Option<RecordBatchBuilder>,
    buf: Vec<u8>,
    state: ScanState,
    record_start: usize,
    depth: i32,
    in_string: bool,
    escape: bool,
    scanned_to: usize,
}

impl JsonDecoder {
    pub fn new(schema: Option<TableSchema>, batch_size: usize) -> Self {
        let builder = schema
            .clone()
            .map(|s| RecordBatchBuilder::new(s, batch_size));
        Self {
            schema,
            batch_size,
            builder,
            buf: Vec::new(),
            state: ScanState::Initial,
            record_start: 0,
            depth: 0,
            in_string: false,
            escape: false,
            scanned_to: 0,
        }
    }

    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<RecordBatch>> {
        self.buf.extend_from_slice(chunk);
        let mut batches = Vec::new();

        loop {
            match self.state {
                ScanState::Initial => {
                    let Some(i) = self.skip_ws(self.scanned_to) else {
                        break;
                    };
                    if self.buf[i] == b'[' {
                        self.scanned_to = i + 1;
                    } else {
                        self.scanned_to = i;
                    }
                    self.state = ScanState::InArray;
                }
                ScanState::InArray => {
                    let Some(i) = self.skip_ws_and_commas(self.scanned_to) else {
                        break;
                    };
                    if self.buf[i] == b']' {
                        self.scanned_to = i + 1;
                        self.state = ScanState::EndOfStream;
                        continue;
                    }
                    self.record_start = i;
                    self.scanned_to = i;
                    self.depth = 0;
                    self.in_string = false;
                    self.escape = false;
                    self.state = ScanState::MidRecord;
                }
                ScanState::MidRecord => {
                    let Some(end) = self.scan_record() else {
                        break; // ran out of bytes mid-record; resume on next chunk
                    };
                    let record_bytes = self.buf[self.record_start..end].to_vec();
                    self.scanned_to = end;
                    self.state = ScanState::InArray;

                    if let Some(batch) = self.consume_record(&record_bytes)? {
                        batches.push(batch);
                    }
                }
                ScanState::EndOfStream => break,
            }
        }

        self.compact();
        Ok(batches)
    }

    /// Signals true end of stream: a dangling `MidRecord` state at this
    /// point is a truncated, corrupt document. Otherwise flushes any
    /// trailing partial batch.
    pub fn finish(&mut self) -> Result<Vec<RecordBatch>> {
        if self.state == ScanState::MidRecord {
            return Err(TracError::DataCorruption(
                "CORRUPT_DATA: input ended mid-record".to_string(),
            ));
        }
        match &mut self.builder {
            Some(builder) => Ok(builder.flush()?.into_iter().collect()),
            None => Ok(Vec::new()),
        }
    }

    fn skip_ws(&self, mut i: usize) -> Option<usize> {
        while i < self.buf.len() && self.buf[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < self.buf.len() {
            Some(i)
        } else {
            None
        }
    }

    fn skip_ws_and_commas(&self, mut i: usize) -> Option<usize> {
        while i < self.buf.len() && (self.buf[i].is_ascii_whitespace() || self.buf[i] == b',') {
            i += 1;
        }
        if i < self.buf.len() {
            Some(i)
        } else {
            None
        }
    }

    /// Scans forward from `self.scanned_to` tracking string/escape state and
    /// brace/bracket depth; returns the exclusive end index of the record
    /// once depth returns to zero, or `None` if the buffer runs out first.
    fn scan_record(&mut self) -> Option<usize> {
        let mut i = self.scanned_to;
        while i < self.buf.len() {
            let b = self.buf[i];
            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if b == b'\\' {
                    self.escape = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
            } else {
                match b {
                    b'"' => self.in_string = true,
                    b'{' | b'[' => self.depth += 1,
                    b'}' | b']' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            return Some(i + 1);
                        }
                    }
                    _ => {}
                }
            }
            i += 1;
        }
        self.scanned_to = i;
        None
    }

    fn consume_record(&mut self, bytes: &[u8]) -> Result<Option<RecordBatch>> {
        let json: JsonValue = serde_json::from_slice(bytes).map_err(|err| {
            TracError::DataCorruption(format!(
                "CORRUPT_DATA: malformed JSON record at line {}, column {}: {err}",
                err.line(),
                err.column()
            ))
        })?;

        let JsonValue::Object(map) = json else {
            return Err(TracError::DataCorruption(
                "CORRUPT_DATA: expected a JSON object record".to_string(),
            ));
        };

        if self.builder.is_none() {
            let inferred = infer_schema(&map);
            self.schema = Some(inferred.clone());
            self.builder = Some(RecordBatchBuilder::new(inferred, self.batch_size));
        }

        let schema = self.schema.as_ref().unwrap().clone();
        let row = row_from_json_object(&schema, map)?;
        self.builder.as_mut().unwrap().push_row(row)
    }

    fn compact(&mut self) {
        if self.scanned_to > 0 {
            self.buf.drain(..self.scanned_to);
            self.record_start = self.record_start.saturating_sub(self.scanned_to);
            self.scanned_to = 0;
        }
    }
}

fn infer_schema(first_row: &Map<String, JsonValue>) -> TableSchema {
    let fields = first_row
        .iter()
        .map(|(name, value)| FieldSchema::new(name.clone(), infer_field_type(value)))
        .collect();
    TableSchema::new(fields)
}

fn infer_field_type(value: &JsonValue) -> FieldType {
    match value {
        JsonValue::Bool(_) => FieldType::Boolean,
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
        JsonValue::Number(_) => FieldType::Float,
        _ => FieldType::String,
    }
}

fn row_from_json_object(
    schema: &TableSchema,
    mut map: Map<String, JsonValue>,
) -> Result<Vec<Value>> {
    let mut row = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let value = map.remove(&field.name).unwrap_or(JsonValue::Null);
        row.push(json_to_value(field, value)?);
    }
    Ok(row)
}

fn json_to_value(field: &FieldSchema, value: JsonValue) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let scalar = match field.field_type {
        FieldType::Boolean => Scalar::Boolean(match value {
            JsonValue::Bool(b) => b,
            JsonValue::String(s) => parse_bool(&s)?,
            JsonValue::Number(n) => n.as_i64() == Some(1),
            _ => return Err(corrupt(&field.name, "boolean")),
        }),
        FieldType::Integer => Scalar::Integer(
            value
                .as_i64()
                .ok_or_else(|| corrupt(&field.name, "integer"))?,
        ),
        FieldType::Float => Scalar::Float(match &value {
            JsonValue::Number(n) => n.as_f64().ok_or_else(|| corrupt(&field.name, "float"))?,
            JsonValue::String(s) => parse_float(s)?,
            _ => return Err(corrupt(&field.name, "float")),
        }),
        FieldType::Decimal => Scalar::Decimal(match &value {
            JsonValue::String(s) => s.parse::<Decimal>().map_err(|_| corrupt(&field.name, "decimal"))?,
            JsonValue::Number(n) => n
                .to_string()
                .parse::<Decimal>()
                .map_err(|_| corrupt(&field.name, "decimal"))?,
            _ => return Err(corrupt(&field.name, "decimal")),
        }),
        FieldType::String => Scalar::String(match value {
            JsonValue::String(s) => s,
            other => other.to_string(),
        }),
        FieldType::Date => Scalar::Date(match value {
            JsonValue::String(s) => {
                NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| corrupt(&field.name, "date"))?
            }
            _ => return Err(corrupt(&field.name, "date")),
        }),
        FieldType::DateTime => Scalar::DateTime(match value {
            JsonValue::String(s) => parse_datetime(&s)?,
            _ => return Err(corrupt(&field.name, "datetime")),
        }),
    };

    Ok(Value::Scalar(scalar))
}

fn corrupt(field: &str, kind: &str) -> TracError {
    TracError::DataCorruption(format!("CORRUPT_DATA: field '{field}' is not a valid {kind}"))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(TracError::DataCorruption(format!(
            "CORRUPT_DATA: '{raw}' is not a valid boolean"
        ))),
    }
}

fn parse_float(raw: &str) -> Result<f64> {
    match raw.to_ascii_lowercase().as_str() {
        "nan" | "na" => Ok(f64::NAN),
        "inf" | "infinity" => Ok(f64::INFINITY),
        "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
        _ => raw
            .parse()
            .map_err(|_| TracError::DataCorruption(format!("CORRUPT_DATA: '{raw}' is not a valid float"))),
    }
}

fn parse_datetime(raw: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|_| TracError::DataCorruption(format!("CORRUPT_DATA: '{raw}' is not a valid datetime")))
}

/// Encodes an outer JSON array of objects, one per row, in schema field
/// order; null encodes as literal `null`.
pub struct JsonEncoder {
    started: bool,
    any_row: bool,
}

impl JsonEncoder {
    pub fn new() -> Self {
        Self {
            started: false,
            any_row: false,
        }
    }

    pub fn encode_batch(&mut self, batch: &RecordBatch, out: &mut Vec<u8>) -> Result<()> {
        if !self.started {
            out.push(b'[');
            self.started = true;
        }

        for row in 0..batch.row_count {
            if self.any_row {
                out.push(b',');
            }
            self.any_row = true;
            encode_row(&batch.schema, &batch.columns, row, out)?;
        }

        Ok(())
    }

    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if !self.started {
            out.push(b'[');
        }
        out.push(b']');
        Ok(())
    }
}

impl Default for JsonEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_row(
    schema: &TableSchema,
    columns: &[Column],
    row: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    out.push(b'{');
    for (i, field) in schema.fields.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        write!(out, "{:?}:", field.name).map_err(TracError::from)?;
        encode_cell(&columns[i].get(row), out)?;
    }
    out.push(b'}');
    Ok(())
}

fn encode_cell(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => write!(out, "null").map_err(TracError::from)?,
        Value::Scalar(Scalar::Boolean(b)) => write!(out, "{b}").map_err(TracError::from)?,
        Value::Scalar(Scalar::Integer(i)) => write!(out, "{i}").map_err(TracError::from)?,
        Value::Scalar(Scalar::Float(f)) => {
            if f.is_finite() {
                write!(out, "{f}").map_err(TracError::from)?
            } else {
                write!(out, "{:?}", encode_non_finite(*f)).map_err(TracError::from)?
            }
        }
        Value::Scalar(Scalar::Decimal(d)) => write!(out, "{:?}", d.to_string()).map_err(TracError::from)?,
        Value::Scalar(Scalar::String(s)) => write!(out, "{s:?}").map_err(TracError::from)?,
        Value::Scalar(Scalar::Date(d)) => {
            write!(out, "{:?}", d.format("%Y-%m-%d").to_string()).map_err(TracError::from)?
        }
        Value::Scalar(Scalar::DateTime(d)) => write!(
            out,
            "{:?}",
            d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
        )
        .map_err(TracError::from)?,
        Value::Array(..) => unreachable!("table columns never hold array values"),
    }
    Ok(())
}

fn encode_non_finite(f: f64) -> &'static str {
    if f.is_nan() {
        "nan"
    } else if f > 0.0 {
        "inf"
    } else {
        "-inf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_record_chunk_boundary_resumes_correctly() {
        let mut decoder = JsonDecoder::new(None, 1024);
        let first = br#"[{"a":1,"b":"xy"#;
        let second = br#""},{"a":2,"b":"z"}]"#;

        let batches1 = decoder.decode_chunk(first).unwrap();
        assert!(batches1.is_empty());

        let mut batches2 = decoder.decode_chunk(second).unwrap();
        batches2.extend(decoder.finish().unwrap());

        assert_eq!(batches2.len(), 1);
        let batch = &batches2[0];
        assert_eq!(batch.row_count, 2);
        assert_eq!(batch.row(0), vec![
            Value::Scalar(Scalar::Integer(1)),
            Value::Scalar(Scalar::String("xy".to_string())),
        ]);
        assert_eq!(batch.row(1), vec![
            Value::Scalar(Scalar::Integer(2)),
            Value::Scalar(Scalar::String("z".to_string())),
        ]);
    }

    #[test]
    fn unexpected_token_is_a_corrupt_data_error() {
        let mut decoder = JsonDecoder::new(None, 1024);
        let err = decoder.decode_chunk(br#"[{"a":1,}]"#).unwrap_err();
        assert!(matches!(err, TracError::DataCorruption(_)));
    }

    #[test]
    fn truncated_stream_mid_record_is_fatal_on_finish() {
        let mut decoder = JsonDecoder::new(None, 1024);
        decoder.decode_chunk(br#"[{"a":1"#).unwrap();
        let err = decoder.finish().unwrap_err();
        assert!(matches!(err, TracError::DataCorruption(_)));
    }

    #[test]
    fn encode_emits_array_of_objects_with_null_literal() {
        let schema = TableSchema::new(vec![
            FieldSchema::new("a", FieldType::Integer),
            FieldSchema::new("b", FieldType::String),
        ]);
        let mut builder = RecordBatchBuilder::new(schema, 10);
        builder
            .push_row(vec![Value::Scalar(Scalar::Integer(1)), Value::Null])
            .unwrap();
        let batch = builder.flush().unwrap().unwrap();

        let mut out = Vec::new();
        let mut encoder = JsonEncoder::new();
        encoder.encode_batch(&batch, &mut out).unwrap();
        encoder.finish(&mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), r#"[{"a":1,"b":null}]"#);
    }
}
