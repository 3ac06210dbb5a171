//! End-to-end scenarios against `DatasetService`/`FileService` directly
//! (bypassing the gRPC transport), matching spec.md §8's concrete scenarios
//! 1, 3, 4 and 6.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use sqlx::PgPool;

use trac_buffer::BufferAllocator;
use trac_error::TracError;
use trac_meta::MetaStore;
use trac_proto::tag_selector::VersionCriterion;
use trac_storage::LocalStorageBackend;
use trac_svc::config::{BucketConfig, BucketProtocol, ServiceConfig};
use trac_svc::service::{DatasetService, FileService};

async fn seed_tenant(pool: &PgPool, code: &str) -> i32 {
    sqlx::query_scalar("insert into tenant (tenant_code) values ($1) returning tenant_id")
        .bind(code)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn test_config(bucket_dir: &std::path::Path) -> Arc<ServiceConfig> {
    let mut buckets = HashMap::new();
    buckets.insert(
        "primary".to_string(),
        BucketConfig { protocol: BucketProtocol::Local, root_path: bucket_dir.to_path_buf() },
    );
    Arc::new(ServiceConfig {
        listen_address: "127.0.0.1:0".to_string(),
        buckets,
        default_bucket: "primary".to_string(),
        batch_size: trac_codec::DEFAULT_BATCH_SIZE,
        stream_idle_timeout_secs: 60,
        aggregated_read_limit_bytes: 64 * 1024 * 1024,
    })
}

fn one_chunk(bytes: &[u8]) -> trac_buffer::ChunkStream {
    let allocator = BufferAllocator::new("REQ-test");
    let mut buf = allocator.allocate(bytes.len());
    buf.push_slice(bytes);
    Box::pin(futures::stream::iter(vec![Ok(buf)]))
}

fn csv_schema() -> trac_proto::SchemaDefinition {
    trac_proto::SchemaDefinition {
        fields: vec![
            trac_proto::SchemaField {
                name: "id".to_string(),
                field_type: "INTEGER".to_string(),
                not_null: true,
                ..Default::default()
            },
            trac_proto::SchemaField {
                name: "amount".to_string(),
                field_type: "DECIMAL".to_string(),
                not_null: true,
                ..Default::default()
            },
        ],
    }
}

async fn collect(mut stream: trac_buffer::ChunkStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(chunk.unwrap().readable());
    }
    out
}

/// Scenario 1: small CSV create & read.
#[sqlx::test(migrations = "../trac-meta/migrations")]
async fn small_csv_create_and_read(pool: PgPool) {
    seed_tenant(&pool, "acme").await;
    let meta = MetaStore::new(pool);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let storage: Arc<dyn trac_storage::StorageBackend> =
        Arc::new(LocalStorageBackend::new(config.storage_buckets()));

    let dataset = DatasetService::new(meta, storage, config);

    let content = one_chunk(b"id,amount\n1,10.50\n2,20.00\n");
    let request = trac_proto::DataWriteRequest {
        tenant: "acme".to_string(),
        prior_version: None,
        schema: Some(csv_schema()),
        schema_id: String::new(),
        format: "CSV".to_string(),
        tag_updates: vec![],
        content: vec![],
    };

    let header = dataset.create_dataset(request, content).await.unwrap();
    assert_eq!(header.object_version, 1);
    assert_eq!(header.tag_version, 1);

    let read_request = trac_proto::DataReadRequest {
        tenant: "acme".to_string(),
        selector: Some(trac_proto::TagSelector {
            object_type: trac_proto::ObjectType::Data as i32,
            object_id: header.object_id.to_string(),
            version_criterion: Some(VersionCriterion::LatestObject(true)),
            tag_criterion: Some(trac_proto::tag_selector::TagCriterion::LatestTag(true)),
        }),
        format: "CSV".to_string(),
    };

    let (schema, content_stream) = dataset.read_dataset(read_request).await.unwrap();
    assert_eq!(schema.fields.len(), 2);

    let out = collect(content_stream).await;
    let csv_text = String::from_utf8(out).unwrap();
    assert!(csv_text.contains("10.50"));
    assert!(csv_text.contains("20.00"));
}

/// Scenario 3: wrong-type update.
#[sqlx::test(migrations = "../trac-meta/migrations")]
async fn wrong_type_update_fails(pool: PgPool) {
    seed_tenant(&pool, "acme").await;
    let meta = MetaStore::new(pool);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let storage: Arc<dyn trac_storage::StorageBackend> =
        Arc::new(LocalStorageBackend::new(config.storage_buckets()));

    let dataset = DatasetService::new(meta.clone(), storage.clone(), config.clone());
    let file = FileService::new(meta, storage, config);

    let content = one_chunk(b"id,amount\n1,10.50\n");
    let request = trac_proto::DataWriteRequest {
        tenant: "acme".to_string(),
        prior_version: None,
        schema: Some(csv_schema()),
        schema_id: String::new(),
        format: "CSV".to_string(),
        tag_updates: vec![],
        content: vec![],
    };
    let header = dataset.create_dataset(request, content).await.unwrap();

    let update_content = one_chunk(b"hello");
    let update_request = trac_proto::FileWriteRequest {
        tenant: "acme".to_string(),
        prior_version: Some(trac_proto::TagSelector {
            object_type: trac_proto::ObjectType::File as i32,
            object_id: header.object_id.to_string(),
            version_criterion: Some(VersionCriterion::LatestObject(true)),
            tag_criterion: Some(trac_proto::tag_selector::TagCriterion::LatestTag(true)),
        }),
        name: "notes.txt".to_string(),
        mime_type: "text/plain".to_string(),
        size: 0,
        tag_updates: vec![],
        content: vec![],
    };

    let err = file.update_file(update_request, update_content).await.unwrap_err();
    assert!(matches!(err, TracError::WrongItemType(_)));
}

/// Scenario 4: missing required column on read.
#[sqlx::test(migrations = "../trac-meta/migrations")]
async fn missing_required_column_raises_data_constraint(pool: PgPool) {
    seed_tenant(&pool, "acme").await;
    let meta = MetaStore::new(pool);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let storage: Arc<dyn trac_storage::StorageBackend> =
        Arc::new(LocalStorageBackend::new(config.storage_buckets()));

    let dataset = DatasetService::new(meta, storage, config);

    // `amount` is declared not_null but omitted from the CSV body entirely.
    let content = one_chunk(b"id\n1\n");
    let request = trac_proto::DataWriteRequest {
        tenant: "acme".to_string(),
        prior_version: None,
        schema: Some(csv_schema()),
        schema_id: String::new(),
        format: "CSV".to_string(),
        tag_updates: vec![],
        content: vec![],
    };

    let err = dataset.create_dataset(request, content).await.unwrap_err();
    assert!(matches!(err, TracError::InputValidation(_) | TracError::DataConstraint(_)));
}

/// Scenario 6: upload cancellation leaves no partial file on disk.
#[sqlx::test(migrations = "../trac-meta/migrations")]
async fn cancelled_upload_leaves_no_partial_file(pool: PgPool) {
    seed_tenant(&pool, "acme").await;
    let meta = MetaStore::new(pool);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let storage: Arc<dyn trac_storage::StorageBackend> =
        Arc::new(LocalStorageBackend::new(config.storage_buckets()));

    let dataset = DatasetService::new(meta, storage, config);

    let allocator = BufferAllocator::new("REQ-cancel-test");
    let mut good = allocator.allocate(4);
    good.push_slice(b"id,a");
    let failing: trac_buffer::ChunkStream = Box::pin(futures::stream::iter(vec![
        Ok(good),
        Err(TracError::Cancelled),
    ]));

    let request = trac_proto::DataWriteRequest {
        tenant: "acme".to_string(),
        prior_version: None,
        schema: Some(csv_schema()),
        schema_id: String::new(),
        format: "CSV".to_string(),
        tag_updates: vec![],
        content: vec![],
    };

    let err = dataset.create_dataset(request, failing).await.unwrap_err();
    assert!(matches!(err, TracError::Cancelled));

    let data_dir = dir.path().join("data");
    assert!(!any_file_under(&data_dir), "no data file should remain after a cancelled upload");
}

fn any_file_under(dir: &std::path::Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            return true;
        }
        if path.is_dir() && any_file_under(&path) {
            return true;
        }
    }
    false
}
