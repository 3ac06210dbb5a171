//! Business logic for the TRAC data/file RPCs, independent of the gRPC
//! transport (spec §4.5). [`crate::grpc`] adapts these to `tonic`.

mod dataset;
mod file;
mod tag_rules;
mod transcode;

pub use dataset::{DatasetDefinition, DatasetService};
pub use file::{FileDefinition, FileService};
pub use transcode::transcode;
