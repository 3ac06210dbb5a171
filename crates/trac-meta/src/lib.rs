//! Batch-oriented metadata store over Postgres: tenant resolution, tag
//! selector resolution, and the append-only object/definition/tag write
//! primitives of the data model.

mod config;
mod model;
mod pool;
mod selector;
mod write;

pub use config::delete_config_entry;
pub use model::{
    ObjectType, ResolvedTag, TagCriterion, TagHeader, TagSelector, TagUpdate, TagUpdateOp,
    VersionCriterion, RESERVED_ATTR_PREFIX,
};
pub use pool::MetaStore;
pub use selector::{load_latest_version, resolve_selectors};
pub use write::{
    preallocate_object_id, save_new_object, save_new_tag, save_new_version, save_preallocated_object,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_type_round_trips_through_its_wire_name() {
        for ty in [
            ObjectType::Data,
            ObjectType::File,
            ObjectType::Schema,
            ObjectType::Model,
            ObjectType::Job,
            ObjectType::Flow,
            ObjectType::Custom,
            ObjectType::Resource,
            ObjectType::Config,
            ObjectType::Storage,
        ] {
            assert_eq!(ObjectType::parse(ty.as_str()).unwrap(), ty);
        }
    }

    #[test]
    fn unknown_object_type_name_is_rejected() {
        assert!(ObjectType::parse("NOT_A_TYPE").is_err());
    }
}
