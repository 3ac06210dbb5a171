//! Generated gRPC/protobuf types for the `TracDataApi` service, compiled
//! at build time from `proto/trac_data.proto` by `tonic-build`.

tonic::include_proto!("trac.data");
