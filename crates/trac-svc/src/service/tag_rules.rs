//! Applies a batch of `TagUpdate`s to an attribute mapping (spec §4.5).

use chrono::Utc;

use trac_codec::{Scalar, Value};
use trac_error::{Result, TracError};
use trac_meta::{TagUpdate, TagUpdateOp, RESERVED_ATTR_PREFIX};

fn find_index(attrs: &[(String, Value)], name: &str) -> Option<usize> {
    attrs.iter().position(|(n, _)| n == name)
}

fn append_value(existing: &Value, addition: Value) -> Result<Value> {
    let (element_type, mut scalars) = match existing {
        Value::Array(ty, scalars) => (*ty, scalars.clone()),
        _ => {
            return Err(TracError::DataConstraint(
                "APPEND target attribute is not array-typed".into(),
            ))
        }
    };

    match addition {
        Value::Scalar(s) => scalars.push(s),
        Value::Array(_, mut more) => scalars.append(&mut more),
        Value::Null => {
            return Err(TracError::DataConstraint("cannot append a null value to an array attribute".into()))
        }
    }

    Value::array(element_type, scalars).map_err(TracError::DataConstraint)
}

fn wrap_as_array(value: Value) -> Result<Value> {
    match value {
        Value::Array(..) => Ok(value),
        Value::Scalar(s) => {
            let ty = s.field_type();
            Ok(Value::Array(ty, vec![s]))
        }
        Value::Null => Err(TracError::DataConstraint(
            "CREATE_OR_APPEND requires a non-null value to start a new array attribute".into(),
        )),
    }
}

/// Applies `updates` on top of `existing`, following the CREATE / REPLACE /
/// APPEND / DELETE / CREATE_OR_REPLACE / CREATE_OR_APPEND rules of spec
/// §4.5. Rejects any update naming a reserved (`trac_`-prefixed) attribute —
/// those are written only by [`reserved_attrs`], never by caller input.
pub fn apply_tag_updates(existing: &[(String, Value)], updates: &[TagUpdate]) -> Result<Vec<(String, Value)>> {
    let mut attrs = existing.to_vec();

    for update in updates {
        if update.attr_name.starts_with(RESERVED_ATTR_PREFIX) {
            return Err(TracError::InputValidation(format!(
                "attribute name '{}' uses the reserved '{RESERVED_ATTR_PREFIX}' prefix",
                update.attr_name
            )));
        }

        let existing_index = find_index(&attrs, &update.attr_name);

        match update.op {
            TagUpdateOp::Create => {
                if existing_index.is_some() {
                    return Err(TracError::DataConstraint(format!(
                        "attribute '{}' already exists",
                        update.attr_name
                    )));
                }
                let value = update.value.clone().unwrap_or(Value::Null);
                attrs.push((update.attr_name.clone(), value));
            }
            TagUpdateOp::Replace => {
                let index = existing_index.ok_or_else(|| {
                    TracError::DataConstraint(format!("attribute '{}' does not exist", update.attr_name))
                })?;
                attrs[index].1 = update.value.clone().unwrap_or(Value::Null);
            }
            TagUpdateOp::Append => {
                let index = existing_index.ok_or_else(|| {
                    TracError::DataConstraint(format!("attribute '{}' does not exist", update.attr_name))
                })?;
                let addition = update.value.clone().unwrap_or(Value::Null);
                attrs[index].1 = append_value(&attrs[index].1, addition)?;
            }
            TagUpdateOp::Delete => {
                let index = existing_index.ok_or_else(|| {
                    TracError::DataConstraint(format!("attribute '{}' does not exist", update.attr_name))
                })?;
                attrs.remove(index);
            }
            TagUpdateOp::CreateOrReplace => {
                let value = update.value.clone().unwrap_or(Value::Null);
                match existing_index {
                    Some(index) => attrs[index].1 = value,
                    None => attrs.push((update.attr_name.clone(), value)),
                }
            }
            TagUpdateOp::CreateOrAppend => {
                let addition = update.value.clone().unwrap_or(Value::Null);
                match existing_index {
                    Some(index) => attrs[index].1 = append_value(&attrs[index].1, addition)?,
                    None => attrs.push((update.attr_name.clone(), wrap_as_array(addition)?)),
                }
            }
        }
    }

    Ok(attrs)
}

/// Service-written `trac_`-prefixed attributes (spec §4.5). Only a create/
/// update timestamp is recorded here: the source's auditing-user omission on
/// tag-only updates is a known, intentionally-kept gap (spec §9 open
/// questions), and no caller in this workspace threads a user identity down
/// to this layer, so `trac_*_user_id`/`trac_*_user_name` are never written.
pub fn reserved_attrs(is_new_object: bool) -> Vec<(String, Value)> {
    let now = Value::Scalar(Scalar::DateTime(Utc::now().naive_utc()));
    if is_new_object {
        vec![("trac_create_time".to_string(), now)]
    } else {
        vec![("trac_update_time".to_string(), now)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trac_codec::FieldType;

    fn update(op: TagUpdateOp, name: &str, value: Option<Value>) -> TagUpdate {
        TagUpdate { op, attr_name: name.to_string(), value }
    }

    #[test]
    fn create_fails_if_the_attribute_already_exists() {
        let existing = vec![("colour".to_string(), Value::Scalar(Scalar::String("red".into())))];
        let updates = vec![update(TagUpdateOp::Create, "colour", Some(Value::Scalar(Scalar::String("blue".into()))))];
        let err = apply_tag_updates(&existing, &updates).unwrap_err();
        assert!(matches!(err, TracError::DataConstraint(_)));
    }

    #[test]
    fn replace_fails_if_the_attribute_is_absent() {
        let updates = vec![update(TagUpdateOp::Replace, "colour", Some(Value::Scalar(Scalar::String("blue".into()))))];
        let err = apply_tag_updates(&[], &updates).unwrap_err();
        assert!(matches!(err, TracError::DataConstraint(_)));
    }

    #[test]
    fn append_extends_an_existing_array_attribute() {
        let existing = vec![(
            "tags".to_string(),
            Value::array(FieldType::String, vec![Scalar::String("a".into())]).unwrap(),
        )];
        let updates = vec![update(TagUpdateOp::Append, "tags", Some(Value::Scalar(Scalar::String("b".into()))))];
        let result = apply_tag_updates(&existing, &updates).unwrap();
        assert_eq!(
            result[0].1,
            Value::array(FieldType::String, vec![Scalar::String("a".into()), Scalar::String("b".into())]).unwrap()
        );
    }

    #[test]
    fn append_rejects_a_scalar_target() {
        let existing = vec![("colour".to_string(), Value::Scalar(Scalar::String("red".into())))];
        let updates = vec![update(TagUpdateOp::Append, "colour", Some(Value::Scalar(Scalar::String("blue".into()))))];
        let err = apply_tag_updates(&existing, &updates).unwrap_err();
        assert!(matches!(err, TracError::DataConstraint(_)));
    }

    #[test]
    fn delete_removes_the_attribute() {
        let existing = vec![("colour".to_string(), Value::Scalar(Scalar::String("red".into())))];
        let updates = vec![update(TagUpdateOp::Delete, "colour", None)];
        let result = apply_tag_updates(&existing, &updates).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn create_or_replace_never_fails_on_existence() {
        let updates = vec![update(
            TagUpdateOp::CreateOrReplace,
            "colour",
            Some(Value::Scalar(Scalar::String("green".into()))),
        )];
        let result = apply_tag_updates(&[], &updates).unwrap();
        assert_eq!(result[0].1, Value::Scalar(Scalar::String("green".into())));
    }

    #[test]
    fn reserved_attribute_names_are_rejected_from_user_updates() {
        let updates = vec![update(TagUpdateOp::Create, "trac_create_time", None)];
        let err = apply_tag_updates(&[], &updates).unwrap_err();
        assert!(matches!(err, TracError::InputValidation(_)));
    }

    #[test]
    fn reserved_attrs_names_the_right_key_for_create_vs_update() {
        let created = reserved_attrs(true);
        assert_eq!(created[0].0, "trac_create_time");
        let updated = reserved_attrs(false);
        assert_eq!(updated[0].0, "trac_update_time");
    }
}
