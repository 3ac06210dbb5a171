//! Adapts [`crate::service`]'s transport-independent business logic onto
//! the generated `TracDataApi` trait (spec §6). This is the single
//! boundary where a [`trac_error::TracError`] becomes a [`tonic::Status`].

use std::pin::Pin;
use std::sync::Arc;

use futures::{stream, Stream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

use trac_buffer::{BufferAllocator, ChunkStream};
use trac_meta::MetaStore;
use trac_proto::trac_data_api_server::TracDataApi;
use trac_proto::{
    DataReadRequest, DataReadResponse, DataWriteRequest, FileReadRequest, FileReadResponse,
    FileWriteRequest, PreallocateIdRequest, PreallocateIdResponse, TagHeader,
};
use trac_storage::StorageBackend;

use crate::config::ServiceConfig;
use crate::convert;
use crate::service::{DatasetService, FileService};
use crate::stream::{build_response_stream, SinkMode, UploadSource};

type RpcResult<T> = Result<Response<T>, Status>;
type ReadStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// The `TracDataApi` implementation bound to a tonic `Server`. Holds no
/// state of its own beyond the two business services and a tenant/object
/// preallocation handle onto `trac-meta`.
pub struct TracDataService {
    dataset: DatasetService,
    file: FileService,
    meta: MetaStore,
}

impl TracDataService {
    pub fn new(meta: MetaStore, storage: Arc<dyn StorageBackend>, config: Arc<ServiceConfig>) -> Self {
        Self {
            dataset: DatasetService::new(meta.clone(), storage.clone(), config.clone()),
            file: FileService::new(meta.clone(), storage, config),
            meta,
        }
    }

    fn allocator(&self, request_id: &str) -> Arc<BufferAllocator> {
        BufferAllocator::new(format!("REQ-{request_id}"))
    }
}

/// Wraps a single unary write request's `content` as a one-chunk stream, so
/// the `*Small*` unary RPCs can be served by invoking the same business
/// logic as the streaming form (spec §6: "unary; server emulates by
/// invoking the streaming form once").
fn single_chunk_stream(allocator: Arc<BufferAllocator>, bytes: &[u8]) -> ChunkStream {
    if bytes.is_empty() {
        return Box::pin(stream::empty());
    }
    let mut buf = allocator.allocate(bytes.len());
    buf.push_slice(bytes);
    Box::pin(stream::once(async move { Ok(buf) }))
}

#[tonic::async_trait]
impl TracDataApi for TracDataService {
    type ReadDatasetStream = ReadStream<DataReadResponse>;
    type ReadFileStream = ReadStream<FileReadResponse>;

    async fn create_dataset(&self, request: Request<Streaming<DataWriteRequest>>) -> RpcResult<TagHeader> {
        // tonic surfaces a dropped client connection as an error out of
        // `rest.message()` itself, so this token only needs to carry a
        // server-initiated cancel (none yet); `into_parts` still checks it.
        let cancel = CancellationToken::new();
        let stream = request.into_inner();
        let source = UploadSource::new(stream).await.map_err(Status::from)?;
        let metadata = source.first_message().clone();
        let allocator = self.allocator(&metadata.tenant);
        let (metadata, content) = source.into_parts(allocator, cancel);

        let header = self.dataset.create_dataset(metadata, content).await.map_err(Status::from)?;
        Ok(Response::new(convert::tag_header_to_proto(&header).map_err(Status::from)?))
    }

    async fn create_small_dataset(&self, request: Request<DataWriteRequest>) -> RpcResult<TagHeader> {
        let message = request.into_inner();
        let allocator = self.allocator(&message.tenant);
        let content = single_chunk_stream(allocator, &message.content);

        let header = self.dataset.create_dataset(message, content).await.map_err(Status::from)?;
        Ok(Response::new(convert::tag_header_to_proto(&header).map_err(Status::from)?))
    }

    async fn update_dataset(&self, request: Request<Streaming<DataWriteRequest>>) -> RpcResult<TagHeader> {
        let cancel = CancellationToken::new();
        let stream = request.into_inner();
        let source = UploadSource::new(stream).await.map_err(Status::from)?;
        let metadata = source.first_message().clone();
        let allocator = self.allocator(&metadata.tenant);
        let (metadata, content) = source.into_parts(allocator, cancel);

        let header = self.dataset.update_dataset(metadata, content).await.map_err(Status::from)?;
        Ok(Response::new(convert::tag_header_to_proto(&header).map_err(Status::from)?))
    }

    async fn update_small_dataset(&self, request: Request<DataWriteRequest>) -> RpcResult<TagHeader> {
        let message = request.into_inner();
        let allocator = self.allocator(&message.tenant);
        let content = single_chunk_stream(allocator, &message.content);

        let header = self.dataset.update_dataset(message, content).await.map_err(Status::from)?;
        Ok(Response::new(convert::tag_header_to_proto(&header).map_err(Status::from)?))
    }

    async fn read_dataset(&self, request: Request<DataReadRequest>) -> RpcResult<Self::ReadDatasetStream> {
        let req = request.into_inner();
        let (schema, content) = self.dataset.read_dataset(req).await.map_err(Status::from)?;
        let schema_proto = convert::table_schema_to_proto(&schema);

        let response_stream = build_response_stream(
            SinkMode::Streaming,
            schema_proto,
            content,
            |schema| DataReadResponse { payload: Some(trac_proto::data_read_response::Payload::Schema(schema)) },
            |bytes| DataReadResponse { payload: Some(trac_proto::data_read_response::Payload::Content(bytes)) },
        );
        Ok(Response::new(response_stream))
    }

    async fn create_file(&self, request: Request<Streaming<FileWriteRequest>>) -> RpcResult<TagHeader> {
        let cancel = CancellationToken::new();
        let stream = request.into_inner();
        let source = UploadSource::new(stream).await.map_err(Status::from)?;
        let metadata = source.first_message().clone();
        let allocator = self.allocator(&metadata.tenant);
        let (metadata, content) = source.into_parts(allocator, cancel);

        let header = self.file.create_file(metadata, content).await.map_err(Status::from)?;
        Ok(Response::new(convert::tag_header_to_proto(&header).map_err(Status::from)?))
    }

    async fn create_small_file(&self, request: Request<FileWriteRequest>) -> RpcResult<TagHeader> {
        let message = request.into_inner();
        let allocator = self.allocator(&message.tenant);
        let content = single_chunk_stream(allocator, &message.content);

        let header = self.file.create_file(message, content).await.map_err(Status::from)?;
        Ok(Response::new(convert::tag_header_to_proto(&header).map_err(Status::from)?))
    }

    async fn update_file(&self, request: Request<Streaming<FileWriteRequest>>) -> RpcResult<TagHeader> {
        let cancel = CancellationToken::new();
        let stream = request.into_inner();
        let source = UploadSource::new(stream).await.map_err(Status::from)?;
        let metadata = source.first_message().clone();
        let allocator = self.allocator(&metadata.tenant);
        let (metadata, content) = source.into_parts(allocator, cancel);

        let header = self.file.update_file(metadata, content).await.map_err(Status::from)?;
        Ok(Response::new(convert::tag_header_to_proto(&header).map_err(Status::from)?))
    }

    async fn update_small_file(&self, request: Request<FileWriteRequest>) -> RpcResult<TagHeader> {
        let message = request.into_inner();
        let allocator = self.allocator(&message.tenant);
        let content = single_chunk_stream(allocator, &message.content);

        let header = self.file.update_file(message, content).await.map_err(Status::from)?;
        Ok(Response::new(convert::tag_header_to_proto(&header).map_err(Status::from)?))
    }

    async fn read_file(&self, request: Request<FileReadRequest>) -> RpcResult<Self::ReadFileStream> {
        let req = request.into_inner();
        let (header, content) = self.file.read_file(req).await.map_err(Status::from)?;

        let response_stream = build_response_stream(
            SinkMode::Streaming,
            header,
            content,
            |header| FileReadResponse { payload: Some(trac_proto::file_read_response::Payload::Header(header)) },
            |bytes| FileReadResponse { payload: Some(trac_proto::file_read_response::Payload::Content(bytes)) },
        );
        Ok(Response::new(response_stream))
    }

    async fn preallocate_id(&self, request: Request<PreallocateIdRequest>) -> RpcResult<PreallocateIdResponse> {
        let req = request.into_inner();
        let tenant_id = self.meta.tenant_id(&req.tenant).await.map_err(Status::from)?;
        let object_type = convert::object_type_from_proto(req.object_type).map_err(Status::from)?;

        let object_id = trac_meta::preallocate_object_id(&self.meta, tenant_id, object_type)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(PreallocateIdResponse { object_id: object_id.to_string() }))
    }
}
