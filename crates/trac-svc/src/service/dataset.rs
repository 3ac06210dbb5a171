use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trac_buffer::{BufferAllocator, ChunkStream};
use trac_codec::{CodecFormat, TableSchema};
use trac_error::{Result, TracError};
use trac_meta::{self as meta, MetaStore, ObjectType, TagHeader};
use trac_storage::StorageBackend;

use crate::config::ServiceConfig;
use crate::convert;
use crate::service::tag_rules;
use crate::service::transcode::transcode;

/// The `object_definition.definition_json` shape for a `DATA` object (spec
/// §3: "for DATA it contains a schema reference and storage locator").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDefinition {
    pub schema: TableSchema,
    pub bucket: String,
    pub relative_path: String,
}

fn dataset_path(object_id: Uuid, version: i32) -> String {
    format!("data/{object_id}/{version}/data.arrows")
}

pub struct DatasetService {
    meta: MetaStore,
    storage: Arc<dyn StorageBackend>,
    config: Arc<ServiceConfig>,
}

impl DatasetService {
    pub fn new(meta: MetaStore, storage: Arc<dyn StorageBackend>, config: Arc<ServiceConfig>) -> Self {
        Self { meta, storage, config }
    }

    async fn resolve_schema(&self, tenant_id: i32, request: &trac_proto::DataWriteRequest) -> Result<TableSchema> {
        if let Some(schema) = &request.schema {
            if !schema.fields.is_empty() {
                return convert::table_schema_from_proto(schema);
            }
        }
        if !request.schema_id.is_empty() {
            let schema_id = Uuid::parse_str(&request.schema_id)
                .map_err(|err| TracError::InputValidation(format!("invalid schema_id: {err}")))?;
            let resolved = meta::load_latest_version(&self.meta, tenant_id, ObjectType::Schema, schema_id)
                .await?
                .ok_or_else(|| TracError::MissingItem(format!("no such schema object: {schema_id}")))?;
            let schema: TableSchema = serde_json::from_value(resolved.definition_json)
                .map_err(|err| TracError::DataCorruption(format!("stored schema is malformed: {err}")))?;
            return Ok(schema);
        }
        Ok(TableSchema::default())
    }

    /// `createDataset` (spec §4.5): extracts the schema, allocates an object
    /// id, pipes `content` through decode/re-encode to Arrow IPC, writes it
    /// to storage, then commits the tag.
    #[tracing::instrument(skip(self, request, content))]
    pub async fn create_dataset(
        &self,
        request: trac_proto::DataWriteRequest,
        content: ChunkStream,
    ) -> Result<TagHeader> {
        let tenant_id = self.meta.tenant_id(&request.tenant).await?;
        let schema = self.resolve_schema(tenant_id, &request).await?;
        let format = CodecFormat::parse(&request.format)?;

        let object_id = meta::preallocate_object_id(&self.meta, tenant_id, ObjectType::Data).await?;
        let path = dataset_path(object_id, 1);

        let allocator = BufferAllocator::new(format!("REQ-{object_id}"));
        let arrow_stream = transcode(
            allocator,
            content,
            format,
            CodecFormat::ArrowIpc,
            Some(schema.clone()),
            self.config.batch_size,
            |_| Ok(()),
        )?;

        self.storage.write(&self.config.default_bucket, &path, arrow_stream).await?;

        let definition = DatasetDefinition {
            schema,
            bucket: self.config.default_bucket.clone(),
            relative_path: path,
        };
        let definition_json = serde_json::to_value(&definition)
            .map_err(|err| TracError::Unexpected(format!("failed to serialize dataset definition: {err}")))?;

        let mut attrs = tag_rules::apply_tag_updates(
            &[],
            &request
                .tag_updates
                .iter()
                .map(convert::tag_update_from_proto)
                .collect::<Result<Vec<_>>>()?,
        )?;
        attrs.extend(tag_rules::reserved_attrs(true));

        meta::save_preallocated_object(&self.meta, tenant_id, object_id, ObjectType::Data, definition_json, &attrs)
            .await
    }

    /// `updateDataset` (spec §4.5): resolves `prior_version`, enforces
    /// schema compatibility (non-narrowing superset), and saves version
    /// `N+1`.
    #[tracing::instrument(skip(self, request, content))]
    pub async fn update_dataset(
        &self,
        request: trac_proto::DataWriteRequest,
        content: ChunkStream,
    ) -> Result<TagHeader> {
        let tenant_id = self.meta.tenant_id(&request.tenant).await?;

        let prior_selector = request
            .prior_version
            .as_ref()
            .ok_or_else(|| TracError::InputValidation("updateDataset requires prior_version".into()))?;
        let prior_selector = convert::selector_from_proto(prior_selector)?;
        let object_id = prior_selector.object_id;

        let prior = meta::resolve_selectors(&self.meta, tenant_id, std::slice::from_ref(&prior_selector))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TracError::MissingItem(format!("no such dataset: {object_id}")))?;

        let prior_def: DatasetDefinition = serde_json::from_value(prior.definition_json)
            .map_err(|err| TracError::DataCorruption(format!("stored dataset definition is malformed: {err}")))?;

        let new_schema = self.resolve_schema(tenant_id, &request).await?;
        if !prior_def.schema.is_non_narrowing_superset(&new_schema) {
            return Err(TracError::SchemaIncompatible(
                "new schema must be a non-narrowing superset of the prior schema".into(),
            ));
        }

        let format = CodecFormat::parse(&request.format)?;
        let new_version = prior.header.object_version + 1;
        let path = dataset_path(object_id, new_version);

        let allocator = BufferAllocator::new(format!("REQ-{object_id}-v{new_version}"));
        let arrow_stream = transcode(
            allocator,
            content,
            format,
            CodecFormat::ArrowIpc,
            Some(new_schema.clone()),
            self.config.batch_size,
            |_| Ok(()),
        )?;

        self.storage.write(&self.config.default_bucket, &path, arrow_stream).await?;

        let definition = DatasetDefinition {
            schema: new_schema,
            bucket: self.config.default_bucket.clone(),
            relative_path: path,
        };
        let definition_json = serde_json::to_value(&definition)
            .map_err(|err| TracError::Unexpected(format!("failed to serialize dataset definition: {err}")))?;

        let updates = request
            .tag_updates
            .iter()
            .map(convert::tag_update_from_proto)
            .collect::<Result<Vec<_>>>()?;
        let mut attrs = tag_rules::apply_tag_updates(&prior.attributes, &updates)?;
        attrs.retain(|(name, _)| name != "trac_update_time");
        attrs.extend(tag_rules::reserved_attrs(false));

        meta::save_new_version(
            &self.meta,
            tenant_id,
            object_id,
            ObjectType::Data,
            prior.header.object_version,
            definition_json,
            &attrs,
        )
        .await
    }

    /// `readDataset` (spec §4.5): resolves the selector, decodes the stored
    /// Arrow IPC content, re-encodes to the requested output codec. Returns
    /// the schema (for the first gRPC response message) and the re-encoded
    /// content stream.
    #[tracing::instrument(skip(self, request))]
    pub async fn read_dataset(&self, request: trac_proto::DataReadRequest) -> Result<(TableSchema, ChunkStream)> {
        let tenant_id = self.meta.tenant_id(&request.tenant).await?;
        let selector = request
            .selector
            .as_ref()
            .ok_or_else(|| TracError::InputValidation("readDataset requires a selector".into()))?;
        let selector = convert::selector_from_proto(selector)?;
        let object_id = selector.object_id;

        let resolved = meta::resolve_selectors(&self.meta, tenant_id, std::slice::from_ref(&selector))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TracError::MissingItem(format!("no such dataset: {object_id}")))?;

        let def: DatasetDefinition = serde_json::from_value(resolved.definition_json)
            .map_err(|err| TracError::DataCorruption(format!("stored dataset definition is malformed: {err}")))?;

        let out_format = CodecFormat::parse(&request.format)?;
        let raw_stream = self.storage.read(&def.bucket, &def.relative_path).await?;

        let allocator = BufferAllocator::new(format!("REQ-{object_id}-read"));
        let content_stream = transcode(
            allocator,
            raw_stream,
            CodecFormat::ArrowIpc,
            out_format,
            Some(def.schema.clone()),
            self.config.batch_size,
            |_| Ok(()),
        )?;

        Ok((def.schema, content_stream))
    }
}
