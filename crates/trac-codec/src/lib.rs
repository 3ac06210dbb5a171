//! Streaming encoders/decoders for CSV, JSON, and Arrow IPC, with schema
//! mapping, dictionary staging, and per-batch validation.

mod arrow_codec;
mod batch;
mod csv_codec;
mod dictionary;
mod json_codec;
mod reconcile;
mod schema;
mod value;

pub use arrow_codec::{to_arrow_schema, ArrowDecoder, ArrowEncoder};
pub use batch::{Column, RecordBatch, RecordBatchBuilder};
pub use csv_codec::{CsvDecoder, CsvEncoder};
pub use dictionary::DictionaryStage;
pub use json_codec::{JsonDecoder, JsonEncoder};
pub use reconcile::reconcile_row;
pub use schema::{is_widening_or_equal, FieldSchema, FieldType, TableSchema};
pub use value::{Scalar, Value};

use trac_error::{Result, TracError};

/// The wire codec a dataset is read or written in. Internal storage is
/// always Arrow IPC (see spec §4.5); CSV and JSON are client-facing only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFormat {
    Csv,
    Json,
    ArrowIpc,
}

impl CodecFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CodecFormat::Csv => "csv",
            CodecFormat::Json => "json",
            CodecFormat::ArrowIpc => "arrows",
        }
    }

    /// Parses a wire-format codec name (spec §6 `DataWriteRequest.format`).
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "CSV" => CodecFormat::Csv,
            "JSON" => CodecFormat::Json,
            "ARROW_IPC" => CodecFormat::ArrowIpc,
            other => return Err(TracError::InputValidation(format!("unknown codec format '{other}'"))),
        })
    }
}

/// Default batch size, per spec §4.2.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// A decoder for one of the three supported wire codecs, dispatching to the
/// codec-specific incremental decoder underneath.
pub enum Decoder {
    Csv(CsvDecoder),
    Json(JsonDecoder),
    Arrow(ArrowDecoder),
}

impl Decoder {
    pub fn new(format: CodecFormat, schema: Option<TableSchema>, batch_size: usize) -> Result<Self> {
        Ok(match format {
            CodecFormat::Csv => {
                let schema = schema.ok_or_else(|| {
                    TracError::InputValidation("CSV decoding requires a pre-declared schema".into())
                })?;
                Decoder::Csv(CsvDecoder::new(schema, batch_size)?)
            }
            CodecFormat::Json => Decoder::Json(JsonDecoder::new(schema, batch_size)),
            CodecFormat::ArrowIpc => Decoder::Arrow(ArrowDecoder::new()),
        })
    }

    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<RecordBatch>> {
        match self {
            Decoder::Csv(d) => d.decode_chunk(chunk),
            Decoder::Json(d) => d.decode_chunk(chunk),
            Decoder::Arrow(d) => d.decode_chunk(chunk),
        }
    }

    pub fn finish(&mut self) -> Result<Vec<RecordBatch>> {
        match self {
            Decoder::Csv(d) => d.finish(),
            Decoder::Json(d) => d.finish(),
            Decoder::Arrow(d) => d.finish(),
        }
    }
}

/// An encoder for one of the three supported wire codecs.
pub enum Encoder {
    Csv(CsvEncoder),
    Json(JsonEncoder),
    Arrow(ArrowEncoder),
}

impl Encoder {
    pub fn new(format: CodecFormat) -> Self {
        match format {
            CodecFormat::Csv => Encoder::Csv(CsvEncoder::new()),
            CodecFormat::Json => Encoder::Json(JsonEncoder::new()),
            CodecFormat::ArrowIpc => Encoder::Arrow(ArrowEncoder::new()),
        }
    }

    pub fn encode_batch(&mut self, batch: &RecordBatch, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Encoder::Csv(e) => e.encode_batch(batch, out),
            Encoder::Json(e) => e.encode_batch(batch, out),
            Encoder::Arrow(e) => e.encode_batch(batch, out),
        }
    }

    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Encoder::Csv(_) => Ok(()),
            Encoder::Json(e) => e.finish(out),
            Encoder::Arrow(e) => e.finish(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_decoder_rejects_a_dynamic_schema() {
        let err = Decoder::new(CodecFormat::Csv, None, DEFAULT_BATCH_SIZE).unwrap_err();
        assert!(matches!(err, TracError::InputValidation(_)));
    }

    #[test]
    fn codec_format_parses_the_three_wire_names() {
        assert_eq!(CodecFormat::parse("CSV").unwrap(), CodecFormat::Csv);
        assert_eq!(CodecFormat::parse("JSON").unwrap(), CodecFormat::Json);
        assert_eq!(CodecFormat::parse("ARROW_IPC").unwrap(), CodecFormat::ArrowIpc);
        assert!(CodecFormat::parse("YAML").is_err());
    }
}
