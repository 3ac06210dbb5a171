use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trac_buffer::ChunkStream;
use trac_error::{Result, TracError};
use trac_meta::{self as meta, MetaStore, ObjectType, TagHeader};
use trac_storage::StorageBackend;

use crate::config::ServiceConfig;
use crate::convert;
use crate::service::tag_rules;

/// The `object_definition.definition_json` shape for a `FILE` object (spec
/// §3: "for FILE it contains mime type, size, storage locator").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDefinition {
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub bucket: String,
    pub relative_path: String,
}

fn file_path(object_id: Uuid, version: i32, name: &str) -> String {
    format!("file/{object_id}/{version}/{name}")
}

pub struct FileService {
    meta: MetaStore,
    storage: Arc<dyn StorageBackend>,
    config: Arc<ServiceConfig>,
}

impl FileService {
    pub fn new(meta: MetaStore, storage: Arc<dyn StorageBackend>, config: Arc<ServiceConfig>) -> Self {
        Self { meta, storage, config }
    }

    #[tracing::instrument(skip(self, request, content))]
    pub async fn create_file(&self, request: trac_proto::FileWriteRequest, content: ChunkStream) -> Result<TagHeader> {
        let tenant_id = self.meta.tenant_id(&request.tenant).await?;
        if request.name.is_empty() {
            return Err(TracError::InputValidation("file name is required".into()));
        }

        let object_id = meta::preallocate_object_id(&self.meta, tenant_id, ObjectType::File).await?;
        let path = file_path(object_id, 1, &request.name);

        let outcome = self.storage.write(&self.config.default_bucket, &path, content).await?;
        if let Err(err) = check_declared_size(request.size, outcome.bytes_written) {
            self.storage.delete(&self.config.default_bucket, &path).await?;
            return Err(err);
        }

        let definition = FileDefinition {
            name: request.name.clone(),
            mime_type: request.mime_type.clone(),
            size: outcome.bytes_written as i64,
            bucket: self.config.default_bucket.clone(),
            relative_path: path,
        };
        let definition_json = serde_json::to_value(&definition)
            .map_err(|err| TracError::Unexpected(format!("failed to serialize file definition: {err}")))?;

        let mut attrs = tag_rules::apply_tag_updates(
            &[],
            &request
                .tag_updates
                .iter()
                .map(convert::tag_update_from_proto)
                .collect::<Result<Vec<_>>>()?,
        )?;
        attrs.extend(tag_rules::reserved_attrs(true));

        meta::save_preallocated_object(&self.meta, tenant_id, object_id, ObjectType::File, definition_json, &attrs)
            .await
    }

    #[tracing::instrument(skip(self, request, content))]
    pub async fn update_file(&self, request: trac_proto::FileWriteRequest, content: ChunkStream) -> Result<TagHeader> {
        let tenant_id = self.meta.tenant_id(&request.tenant).await?;

        let prior_selector = request
            .prior_version
            .as_ref()
            .ok_or_else(|| TracError::InputValidation("updateFile requires prior_version".into()))?;
        let prior_selector = convert::selector_from_proto(prior_selector)?;
        let object_id = prior_selector.object_id;

        let prior = meta::resolve_selectors(&self.meta, tenant_id, std::slice::from_ref(&prior_selector))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TracError::MissingItem(format!("no such file: {object_id}")))?;

        let prior_def: FileDefinition = serde_json::from_value(prior.definition_json)
            .map_err(|err| TracError::DataCorruption(format!("stored file definition is malformed: {err}")))?;

        let name = if request.name.is_empty() { prior_def.name.clone() } else { request.name.clone() };
        let new_version = prior.header.object_version + 1;
        let path = file_path(object_id, new_version, &name);

        let outcome = self.storage.write(&self.config.default_bucket, &path, content).await?;
        if let Err(err) = check_declared_size(request.size, outcome.bytes_written) {
            self.storage.delete(&self.config.default_bucket, &path).await?;
            return Err(err);
        }

        let definition = FileDefinition {
            name,
            mime_type: if request.mime_type.is_empty() { prior_def.mime_type } else { request.mime_type.clone() },
            size: outcome.bytes_written as i64,
            bucket: self.config.default_bucket.clone(),
            relative_path: path,
        };
        let definition_json = serde_json::to_value(&definition)
            .map_err(|err| TracError::Unexpected(format!("failed to serialize file definition: {err}")))?;

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
            ObjectType::File,
            prior.header.object_version,
            definition_json,
            &attrs,
        )
        .await
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn read_file(
        &self,
        request: trac_proto::FileReadRequest,
    ) -> Result<(trac_proto::FileHeader, ChunkStream)> {
        let tenant_id = self.meta.tenant_id(&request.tenant).await?;
        let selector = request
            .selector
            .as_ref()
            .ok_or_else(|| TracError::InputValidation("readFile requires a selector".into()))?;
        let selector = convert::selector_from_proto(selector)?;
        let object_id = selector.object_id;

        let resolved = meta::resolve_selectors(&self.meta, tenant_id, std::slice::from_ref(&selector))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TracError::MissingItem(format!("no such file: {object_id}")))?;

        let def: FileDefinition = serde_json::from_value(resolved.definition_json)
            .map_err(|err| TracError::DataCorruption(format!("stored file definition is malformed: {err}")))?;

        let content_stream = self.storage.read(&def.bucket, &def.relative_path).await?;
        let header = trac_proto::FileHeader {
            name: def.name,
            mime_type: def.mime_type,
            size: def.size,
        };

        Ok((header, content_stream))
    }
}

fn check_declared_size(declared: i64, written: u64) -> Result<()> {
    if declared as u64 != written {
        return Err(TracError::DataConstraint(format!(
            "declared file size {declared} does not match bytes written {written}"
        )));
    }
    Ok(())
}
