//! The TRAC data-plane service: wires the metadata store, codec engine,
//! and storage backend up to the `TracDataApi` gRPC surface.

pub mod config;
pub mod convert;
pub mod grpc;
pub mod service;
pub mod stream;

pub use config::ServiceConfig;
pub use grpc::TracDataService;
