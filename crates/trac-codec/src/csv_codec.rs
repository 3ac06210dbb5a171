//! CSV encode/decode. Decoding always requires a pre-declared schema (no
//! schema inference); encoding derives its header from the batch's schema.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use trac_error::{Result, TracError};

use crate::batch::{Column, RecordBatch, RecordBatchBuilder};
use crate::reconcile::reconcile_row;
use crate::schema::{FieldType, TableSchema};
use crate::value::{Scalar, Value};

/// Encodes CSV following spec: header row from schema field names, quoted
/// empty strings (to distinguish from null), ISO-8601 dates/timestamps, and
/// `nan`/`inf`/`-inf` for non-finite floats.
pub struct CsvEncoder {
    header_written: bool,
}

impl CsvEncoder {
    pub fn new() -> Self {
        Self {
            header_written: false,
        }
    }

    pub fn encode_batch(&mut self, batch: &RecordBatch, out: &mut Vec<u8>) -> Result<()> {
        // Fields are pre-quoted by `quote_field` (the only way to force a
        // quote around an empty string, which the `csv` crate's own
        // quoting heuristics would never do), so the writer itself is told
        // never to add or escape quotes of its own.
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Never)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut *out);

        if !self.header_written {
            let header: Vec<String> = batch
                .schema
                .fields
                .iter()
                .map(|f| quote_field(&f.name, false))
                .collect();
            writer.write_record(&header).map_err(csv_write_err)?;
            self.header_written = true;
        }

        for row in 0..batch.row_count {
            let fields: Vec<String> = batch
                .columns
                .iter()
                .map(|c| encode_cell(c, row))
                .collect();
            writer.write_record(&fields).map_err(csv_write_err)?;
        }

        writer.flush().map_err(|e| TracError::from(std::io::Error::from(e)))?;
        Ok(())
    }
}

impl Default for CsvEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_cell(column: &Column, row: usize) -> String {
    match column.get(row) {
        Value::Null => String::new(),
        Value::Scalar(Scalar::Boolean(b)) => quote_field(if b { "true" } else { "false" }, false),
        Value::Scalar(Scalar::Integer(i)) => quote_field(&i.to_string(), false),
        Value::Scalar(Scalar::Float(f)) => quote_field(&encode_float(f), false),
        Value::Scalar(Scalar::Decimal(d)) => quote_field(&d.to_string(), false),
        Value::Scalar(Scalar::String(s)) => {
            let is_empty = s.is_empty();
            quote_field(&s, is_empty)
        }
        Value::Scalar(Scalar::Date(d)) => quote_field(&d.format("%Y-%m-%d").to_string(), false),
        Value::Scalar(Scalar::DateTime(d)) => {
            quote_field(&d.format("%Y-%m-%dT%H:%M:%S%.f").to_string(), false)
        }
        Value::Array(..) => unreachable!("table columns never hold array values"),
    }
}

fn csv_write_err(err: csv::Error) -> TracError {
    TracError::from(std::io::Error::new(std::io::ErrorKind::Other, err))
}

fn encode_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        }
    } else {
        f.to_string()
    }
}

/// Quotes `field` if it contains a delimiter, quote, or newline, or if
/// `force_empty_quote` is set (used to mark an empty string distinct from
/// null, per `ALWAYS_QUOTE_EMPTY_STRINGS`).
fn quote_field(field: &str, force_empty_quote: bool) -> String {
    let needs_quote = force_empty_quote
        || field.is_empty() && force_empty_quote
        || field.contains(',')
        || field.contains('"')
        || field.contains('\n')
        || field.contains('\r');

    if !needs_quote {
        return field.to_string();
    }

    let mut out = String::with_capacity(field.len() + 2);
    out.push('"');
    for c in field.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Incremental CSV decoder. Requires a pre-declared, non-dynamic schema.
pub struct CsvDecoder {
    schema: TableSchema,
    builder: RecordBatchBuilder,
    pending: Vec<u8>,
    header_consumed: bool,
}

impl CsvDecoder {
    pub fn new(schema: TableSchema, batch_size: usize) -> Result<Self> {
        if schema.is_dynamic() {
            return Err(TracError::InputValidation(
                "CSV decoding requires a pre-declared schema".to_string(),
            ));
        }
        Ok(Self {
            builder: RecordBatchBuilder::new(schema.clone(), batch_size),
            schema,
            pending: Vec::new(),
            header_consumed: false,
        })
    }

    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<RecordBatch>> {
        self.pending.extend_from_slice(chunk);

        let safe_len = safe_split_point(&self.pending);
        if safe_len == 0 {
            return Ok(Vec::new());
        }
        let complete = self.pending[..safe_len].to_vec();
        self.pending.drain(..safe_len);

        // `safe_split_point` only ever returns 0 or an index right after an
        // unquoted newline, so non-empty `complete` always ends with '\n';
        // `split` yields a trailing empty slice for that terminator, which
        // is a synthetic artifact, not a genuine blank data line, so it's
        // dropped here rather than inside `decode_line`.
        let mut lines: Vec<&[u8]> = complete.split(|&b| b == b'\n').collect();
        lines.pop();

        let mut batches = Vec::new();
        for line in lines {
            let line = strip_cr(line);
            if !self.header_consumed {
                self.header_consumed = true;
                continue; // header is derived from the declared schema, not read back
            }
            if let Some(batch) = self.decode_line(line)? {
                batches.push(batch);
            }
        }

        Ok(batches)
    }

    fn decode_line(&mut self, line: &[u8]) -> Result<Option<RecordBatch>> {
        // A genuinely blank line is a single zero-width, unquoted token: for
        // a one-field schema that's a null per spec's width-0-means-null
        // rule; for any wider schema `split_csv_line` yields one field
        // against N expected, which correctly falls through to the
        // column-count mismatch error below.
        let fields = split_csv_line(line)?;
        if fields.len() != self.schema.fields.len() {
            return Err(TracError::DataCorruption(format!(
                "CORRUPT_DATA: expected {} columns, found {}",
                self.schema.fields.len(),
                fields.len()
            )));
        }

        let mut row = Vec::with_capacity(fields.len());
        for (field, (raw, quoted)) in self.schema.fields.iter().zip(fields.into_iter()) {
            row.push(decode_cell(field.field_type, &raw, quoted)?);
        }

        self.builder.push_row(row)
    }

    /// Finalizes any trailing partial batch at end of stream.
    pub fn finish(&mut self) -> Result<Vec<RecordBatch>> {
        if !self.pending.is_empty() {
            let trailing = std::mem::take(&mut self.pending);
            let mut batches = self.decode_chunk(&trailing)?;
            if let Some(batch) = self.builder.flush()? {
                batches.push(batch);
            }
            return Ok(batches);
        }
        Ok(self.builder.flush()?.into_iter().collect())
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    if line.last() == Some(&b'\r') {
        &line[..line.len() - 1]
    } else {
        line
    }
}

/// Finds the last newline in `buf` that does not occur inside an open quote,
/// by scanning quote parity from the start of the buffer. Bytes after that
/// point may still be mid-record and are kept pending.
fn safe_split_point(buf: &[u8]) -> usize {
    let mut in_quotes = false;
    let mut last_safe_newline = None;

    for (i, &b) in buf.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => last_safe_newline = Some(i + 1),
            _ => {}
        }
    }

    last_safe_newline.unwrap_or(0)
}

/// Splits one CSV line into raw field text (with surrounding quotes removed
/// and escaped quotes un-escaped) plus whether the field was quoted (needed
/// to distinguish empty-string from null).
fn split_csv_line(line: &[u8]) -> Result<Vec<(String, bool)>> {
    let mut fields = Vec::new();
    let mut chars = line.iter().copied().peekable();
    let mut current = Vec::new();
    let mut quoted = false;
    let mut in_quotes = false;

    while let Some(b) = chars.next() {
        match b {
            b'"' if in_quotes => {
                if chars.peek() == Some(&b'"') {
                    current.push(b'"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            b'"' => {
                in_quotes = true;
                quoted = true;
            }
            b',' if !in_quotes => {
                fields.push((string_from(&current)?, quoted));
                current.clear();
                quoted = false;
            }
            other => current.push(other),
        }
    }
    fields.push((string_from(&current)?, quoted));

    Ok(fields)
}

fn string_from(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| TracError::DataCorruption("CORRUPT_DATA: invalid UTF-8 in CSV field".into()))
}

fn decode_cell(field_type: FieldType, raw: &str, quoted: bool) -> Result<Value> {
    // Null vs empty string: a zero-width, unquoted token is null; a quoted
    // empty token is an explicit empty string.
    if raw.is_empty() && !quoted {
        return Ok(Value::Null);
    }

    let scalar = match field_type {
        FieldType::Boolean => Scalar::Boolean(parse_bool(raw)?),
        FieldType::Integer => Scalar::Integer(raw.parse().map_err(|_| corrupt(raw, "integer"))?),
        FieldType::Float => Scalar::Float(parse_float(raw)?),
        FieldType::Decimal => {
            Scalar::Decimal(raw.parse::<Decimal>().map_err(|_| corrupt(raw, "decimal"))?)
        }
        FieldType::String => Scalar::String(raw.to_string()),
        FieldType::Date => Scalar::Date(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| corrupt(raw, "date"))?,
        ),
        FieldType::DateTime => Scalar::DateTime(parse_datetime(raw)?),
    };

    Ok(Value::Scalar(scalar))
}

fn corrupt(raw: &str, kind: &str) -> TracError {
    TracError::DataCorruption(format!("CORRUPT_DATA: '{raw}' is not a valid {kind}"))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(corrupt(raw, "boolean")),
    }
}

fn parse_float(raw: &str) -> Result<f64> {
    match raw.to_ascii_lowercase().as_str() {
        "nan" | "na" => Ok(f64::NAN),
        "inf" | "infinity" => Ok(f64::INFINITY),
        "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
        _ => raw.parse().map_err(|_| corrupt(raw, "float")),
    }
}

fn parse_datetime(raw: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| corrupt(raw, "datetime"))
}

/// Reconciles a CSV-sourced row whose columns may not match schema order is
/// a no-op for CSV (the decoder reads columns positionally against the
/// declared schema already); this helper is kept for callers that build a
/// `RecordBatch` from loosely-ordered name/value pairs (e.g. the service
/// layer assembling rows from an upstream source with its own column order).
pub fn reconcile(schema: &TableSchema, raw: Vec<(String, Value)>) -> Result<Vec<Value>> {
    reconcile_row(schema, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            FieldSchema::new("id", FieldType::Integer),
            FieldSchema::new("amount", FieldType::Decimal),
        ])
    }

    #[test]
    fn small_csv_round_trip() {
        let mut decoder = CsvDecoder::new(schema(), 1024).unwrap();
        let mut batches = decoder
            .decode_chunk(b"id,amount\n1,10.50\n2,20.00\n")
            .unwrap();
        batches.extend(decoder.finish().unwrap());

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].row_count, 2);
        assert_eq!(
            batches[0].row(0)[1],
            Value::Scalar(Scalar::Decimal("10.50".parse().unwrap()))
        );
        assert_eq!(
            batches[0].row(1)[1],
            Value::Scalar(Scalar::Decimal("20.00".parse().unwrap()))
        );
    }

    #[test]
    fn mid_record_chunk_boundary_inside_quotes_is_buffered() {
        let schema = TableSchema::new(vec![
            FieldSchema::new("id", FieldType::Integer),
            FieldSchema::new("note", FieldType::String),
        ]);
        let mut decoder = CsvDecoder::new(schema, 1024).unwrap();

        let mut batches = decoder.decode_chunk(b"id,note\n1,\"quoted, val").unwrap();
        assert!(batches.is_empty());
        batches.extend(decoder.decode_chunk(b"ue\"\n").unwrap());
        batches.extend(decoder.finish().unwrap());

        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0].row(0)[1],
            Value::Scalar(Scalar::String("quoted, value".to_string()))
        );
    }

    #[test]
    fn missing_not_null_column_is_a_data_constraint_error() {
        let schema = TableSchema::new(vec![
            FieldSchema::new("id", FieldType::Integer),
            FieldSchema::new("amount", FieldType::Decimal).not_null(),
        ]);
        let mut decoder = CsvDecoder::new(schema, 1024).unwrap();
        let err = decoder.decode_chunk(b"id,amount\n1,\n").unwrap_err();
        assert!(matches!(err, TracError::DataConstraint(_)));
    }

    #[test]
    fn empty_string_is_distinguished_from_null() {
        let schema = TableSchema::new(vec![FieldSchema::new("note", FieldType::String)]);
        let mut decoder = CsvDecoder::new(schema, 1024).unwrap();
        let batches = decoder.decode_chunk(b"note\n\"\"\n\n").unwrap();
        assert_eq!(batches.len(), 0); // not flushed until `finish`
        let batches = decoder.finish().unwrap();
        assert_eq!(batches[0].row(0)[0], Value::Scalar(Scalar::String(String::new())));
        assert_eq!(batches[0].row(1)[0], Value::Null);
    }

    #[test]
    fn encode_quotes_empty_strings_and_formats_non_finite_floats() {
        let schema = TableSchema::new(vec![
            FieldSchema::new("a", FieldType::String),
            FieldSchema::new("b", FieldType::Float),
        ]);
        let mut builder = RecordBatchBuilder::new(schema, 10);
        builder
            .push_row(vec![
                Value::Scalar(Scalar::String(String::new())),
                Value::Scalar(Scalar::Float(f64::NAN)),
            ])
            .unwrap();
        let batch = builder.flush().unwrap().unwrap();

        let mut out = Vec::new();
        CsvEncoder::new().encode_batch(&batch, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "a,b\n\"\",nan\n");
    }
}
