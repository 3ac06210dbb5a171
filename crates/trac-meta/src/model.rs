use chrono::{DateTime, Utc};
use uuid::Uuid;

use trac_codec::Value;
use trac_error::TracError;

/// Tagged variant of an object id (spec §3). Only `Data` and `File` carry
/// bulk payloads handled by the rest of this workspace; the others are
/// modelled here only so the store's type-mismatch invariant can be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Data,
    File,
    Schema,
    Model,
    Job,
    Flow,
    Custom,
    Resource,
    Config,
    Storage,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Data => "DATA",
            ObjectType::File => "FILE",
            ObjectType::Schema => "SCHEMA",
            ObjectType::Model => "MODEL",
            ObjectType::Job => "JOB",
            ObjectType::Flow => "FLOW",
            ObjectType::Custom => "CUSTOM",
            ObjectType::Resource => "RESOURCE",
            ObjectType::Config => "CONFIG",
            ObjectType::Storage => "STORAGE",
        }
    }

    pub fn parse(s: &str) -> trac_error::Result<Self> {
        Ok(match s {
            "DATA" => ObjectType::Data,
            "FILE" => ObjectType::File,
            "SCHEMA" => ObjectType::Schema,
            "MODEL" => ObjectType::Model,
            "JOB" => ObjectType::Job,
            "FLOW" => ObjectType::Flow,
            "CUSTOM" => ObjectType::Custom,
            "RESOURCE" => ObjectType::Resource,
            "CONFIG" => ObjectType::Config,
            "STORAGE" => ObjectType::Storage,
            other => return Err(TracError::TracInternal(format!("unknown object type in store: {other}"))),
        })
    }
}

/// Identifies which tag on which object/definition a request names (spec §3).
#[derive(Debug, Clone)]
pub struct TagSelector {
    pub object_type: ObjectType,
    pub object_id: Uuid,
    pub version: VersionCriterion,
    pub tag: TagCriterion,
}

#[derive(Debug, Clone)]
pub enum VersionCriterion {
    Explicit(i32),
    AsOf(DateTime<Utc>),
    Latest,
}

#[derive(Debug, Clone)]
pub enum TagCriterion {
    Explicit(i32),
    AsOf(DateTime<Utc>),
    Latest,
}

/// The coordinates of one resolved (object_id, object_version, tag_version)
/// triple, returned by every create/update/read operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagHeader {
    pub object_id: Uuid,
    pub object_type_name: String,
    pub object_version: i32,
    pub tag_version: i32,
}

/// A tag plus the definition it is attached to, as returned by selector
/// resolution and by the write primitives after a save.
#[derive(Debug, Clone)]
pub struct ResolvedTag {
    pub header: TagHeader,
    pub definition_json: serde_json::Value,
    pub attributes: Vec<(String, Value)>,
}

/// One requested mutation to a tag's attribute mapping (spec §4.5).
#[derive(Debug, Clone)]
pub struct TagUpdate {
    pub op: TagUpdateOp,
    pub attr_name: String,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagUpdateOp {
    Create,
    Replace,
    Append,
    Delete,
    CreateOrReplace,
    CreateOrAppend,
}

/// Prefix reserved for attributes written only by the service itself
/// (spec §4.5): `trac_create_time`, `trac_update_user_id`, and so on.
pub const RESERVED_ATTR_PREFIX: &str = "trac_";
