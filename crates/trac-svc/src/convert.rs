//! Conversions between generated `trac_proto` wire types and the domain
//! types used by `trac-meta`/`trac-codec` (spec §3, §6).

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use trac_codec::{FieldSchema, FieldType, Scalar, TableSchema, Value};
use trac_error::{Result, TracError};
use trac_meta::{ObjectType, TagCriterion, TagHeader, TagSelector, TagUpdate, TagUpdateOp, VersionCriterion};

pub fn object_type_from_proto(raw: i32) -> Result<ObjectType> {
    match trac_proto::ObjectType::try_from(raw).unwrap_or(trac_proto::ObjectType::Unspecified) {
        trac_proto::ObjectType::Unspecified => {
            Err(TracError::InputValidation("object_type is required".into()))
        }
        trac_proto::ObjectType::Data => Ok(ObjectType::Data),
        trac_proto::ObjectType::File => Ok(ObjectType::File),
        trac_proto::ObjectType::Schema => Ok(ObjectType::Schema),
        trac_proto::ObjectType::Model => Ok(ObjectType::Model),
        trac_proto::ObjectType::Job => Ok(ObjectType::Job),
        trac_proto::ObjectType::Flow => Ok(ObjectType::Flow),
        trac_proto::ObjectType::Custom => Ok(ObjectType::Custom),
        trac_proto::ObjectType::Resource => Ok(ObjectType::Resource),
        trac_proto::ObjectType::Config => Ok(ObjectType::Config),
        trac_proto::ObjectType::Storage => Ok(ObjectType::Storage),
    }
}

pub fn object_type_to_proto(ty: ObjectType) -> trac_proto::ObjectType {
    match ty {
        ObjectType::Data => trac_proto::ObjectType::Data,
        ObjectType::File => trac_proto::ObjectType::File,
        ObjectType::Schema => trac_proto::ObjectType::Schema,
        ObjectType::Model => trac_proto::ObjectType::Model,
        ObjectType::Job => trac_proto::ObjectType::Job,
        ObjectType::Flow => trac_proto::ObjectType::Flow,
        ObjectType::Custom => trac_proto::ObjectType::Custom,
        ObjectType::Resource => trac_proto::ObjectType::Resource,
        ObjectType::Config => trac_proto::ObjectType::Config,
        ObjectType::Storage => trac_proto::ObjectType::Storage,
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| TracError::InputValidation(format!("invalid as-of timestamp: {ms}")))
}

pub fn selector_from_proto(proto: &trac_proto::TagSelector) -> Result<TagSelector> {
    let object_type = object_type_from_proto(proto.object_type)?;
    let object_id = Uuid::parse_str(&proto.object_id)
        .map_err(|err| TracError::InputValidation(format!("invalid object id: {err}")))?;

    let version = match &proto.version_criterion {
        Some(trac_proto::tag_selector::VersionCriterion::ObjectVersion(v)) => VersionCriterion::Explicit(*v),
        Some(trac_proto::tag_selector::VersionCriterion::ObjectAsOf(ms)) => {
            VersionCriterion::AsOf(millis_to_datetime(*ms)?)
        }
        Some(trac_proto::tag_selector::VersionCriterion::LatestObject(_)) | None => VersionCriterion::Latest,
    };
    let tag = match &proto.tag_criterion {
        Some(trac_proto::tag_selector::TagCriterion::TagVersion(v)) => TagCriterion::Explicit(*v),
        Some(trac_proto::tag_selector::TagCriterion::TagAsOf(ms)) => TagCriterion::AsOf(millis_to_datetime(*ms)?),
        Some(trac_proto::tag_selector::TagCriterion::LatestTag(_)) | None => TagCriterion::Latest,
    };

    Ok(TagSelector { object_type, object_id, version, tag })
}

pub fn tag_header_to_proto(header: &TagHeader) -> Result<trac_proto::TagHeader> {
    let object_type = ObjectType::parse(&header.object_type_name)?;
    Ok(trac_proto::TagHeader {
        object_id: header.object_id.to_string(),
        object_type: object_type_to_proto(object_type) as i32,
        object_version: header.object_version,
        tag_version: header.tag_version,
    })
}

pub fn value_from_proto(attr: &trac_proto::AttrValue) -> Result<Value> {
    use trac_proto::attr_value::Value as Wire;

    Ok(match &attr.value {
        None => Value::Null,
        Some(Wire::BooleanValue(v)) => Value::Scalar(Scalar::Boolean(*v)),
        Some(Wire::IntegerValue(v)) => Value::Scalar(Scalar::Integer(*v)),
        Some(Wire::FloatValue(v)) => Value::Scalar(Scalar::Float(*v)),
        Some(Wire::DecimalValue(v)) => Value::Scalar(Scalar::Decimal(
            v.parse()
                .map_err(|err| TracError::InputValidation(format!("invalid decimal '{v}': {err}")))?,
        )),
        Some(Wire::StringValue(v)) => Value::Scalar(Scalar::String(v.clone())),
        Some(Wire::DateValue(v)) => Value::Scalar(Scalar::Date(
            v.parse()
                .map_err(|err| TracError::InputValidation(format!("invalid date '{v}': {err}")))?,
        )),
        Some(Wire::DatetimeValue(v)) => Value::Scalar(Scalar::DateTime(
            v.parse()
                .map_err(|err| TracError::InputValidation(format!("invalid datetime '{v}': {err}")))?,
        )),
        Some(Wire::ArrayValue(array)) => {
            let mut scalars = Vec::with_capacity(array.items.len());
            for item in &array.items {
                match value_from_proto(item)? {
                    Value::Scalar(s) => scalars.push(s),
                    Value::Null => {
                        return Err(TracError::InputValidation(
                            "array attribute values cannot contain null".into(),
                        ))
                    }
                    Value::Array(..) => {
                        return Err(TracError::InputValidation(
                            "nested array attribute values are not supported".into(),
                        ))
                    }
                }
            }
            let element_type = scalars
                .first()
                .map(|s| s.field_type())
                .ok_or_else(|| TracError::InputValidation("array attribute value is empty".into()))?;
            Value::array(element_type, scalars).map_err(TracError::InputValidation)?
        }
    })
}

fn scalar_to_proto(scalar: &Scalar) -> trac_proto::AttrValue {
    use trac_proto::attr_value::Value as Wire;

    let value = match scalar {
        Scalar::Boolean(v) => Wire::BooleanValue(*v),
        Scalar::Integer(v) => Wire::IntegerValue(*v),
        Scalar::Float(v) => Wire::FloatValue(*v),
        Scalar::Decimal(v) => Wire::DecimalValue(v.to_string()),
        Scalar::String(v) => Wire::StringValue(v.clone()),
        Scalar::Date(v) => Wire::DateValue(v.to_string()),
        Scalar::DateTime(v) => Wire::DatetimeValue(v.to_string()),
    };
    trac_proto::AttrValue { value: Some(value) }
}

pub fn value_to_proto(value: &Value) -> trac_proto::AttrValue {
    match value {
        Value::Null => trac_proto::AttrValue { value: None },
        Value::Scalar(s) => scalar_to_proto(s),
        Value::Array(_, scalars) => trac_proto::AttrValue {
            value: Some(trac_proto::attr_value::Value::ArrayValue(trac_proto::AttrArray {
                items: scalars.iter().map(scalar_to_proto).collect(),
            })),
        },
    }
}

fn tag_op_from_proto(raw: i32) -> Result<TagUpdateOp> {
    match trac_proto::TagOperation::try_from(raw).unwrap_or(trac_proto::TagOperation::Unspecified) {
        trac_proto::TagOperation::Unspecified => {
            Err(TracError::InputValidation("tag update op is required".into()))
        }
        trac_proto::TagOperation::Create => Ok(TagUpdateOp::Create),
        trac_proto::TagOperation::Replace => Ok(TagUpdateOp::Replace),
        trac_proto::TagOperation::Append => Ok(TagUpdateOp::Append),
        trac_proto::TagOperation::Delete => Ok(TagUpdateOp::Delete),
        trac_proto::TagOperation::CreateOrReplace => Ok(TagUpdateOp::CreateOrReplace),
        trac_proto::TagOperation::CreateOrAppend => Ok(TagUpdateOp::CreateOrAppend),
    }
}

pub fn tag_update_from_proto(update: &trac_proto::TagUpdate) -> Result<TagUpdate> {
    Ok(TagUpdate {
        op: tag_op_from_proto(update.op)?,
        attr_name: update.attr_name.clone(),
        value: update.value.as_ref().map(value_from_proto).transpose()?,
    })
}

pub fn table_schema_from_proto(schema: &trac_proto::SchemaDefinition) -> Result<TableSchema> {
    let mut fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let field_type = FieldType::parse(&field.field_type)?;
        fields.push(FieldSchema {
            name: field.name.clone(),
            field_type,
            label: (!field.label.is_empty()).then(|| field.label.clone()),
            business_key: field.business_key,
            categorical: field.categorical,
            not_null: field.not_null,
            format_code: (!field.format_code.is_empty()).then(|| field.format_code.clone()),
        });
    }
    Ok(TableSchema::new(fields))
}

pub fn table_schema_to_proto(schema: &TableSchema) -> trac_proto::SchemaDefinition {
    trac_proto::SchemaDefinition {
        fields: schema
            .fields
            .iter()
            .map(|field| trac_proto::SchemaField {
                name: field.name.clone(),
                field_type: field.field_type.name().to_string(),
                label: field.label.clone().unwrap_or_default(),
                business_key: field.business_key,
                categorical: field.categorical,
                not_null: field.not_null,
                format_code: field.format_code.clone().unwrap_or_default(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_type_round_trips_through_proto() {
        for ty in [ObjectType::Data, ObjectType::File, ObjectType::Config] {
            let proto = object_type_to_proto(ty) as i32;
            assert_eq!(object_type_from_proto(proto).unwrap(), ty);
        }
    }

    #[test]
    fn unspecified_object_type_is_rejected() {
        assert!(object_type_from_proto(trac_proto::ObjectType::Unspecified as i32).is_err());
    }

    #[test]
    fn scalar_attr_value_round_trips_through_proto() {
        let value = Value::Scalar(Scalar::String("hello".into()));
        let proto = value_to_proto(&value);
        assert_eq!(value_from_proto(&proto).unwrap(), value);
    }

    #[test]
    fn array_attr_value_round_trips_through_proto() {
        let value = Value::array(FieldType::Integer, vec![Scalar::Integer(1), Scalar::Integer(2)]).unwrap();
        let proto = value_to_proto(&value);
        assert_eq!(value_from_proto(&proto).unwrap(), value);
    }

    #[test]
    fn empty_array_attr_value_is_rejected() {
        let proto = trac_proto::AttrValue {
            value: Some(trac_proto::attr_value::Value::ArrayValue(trac_proto::AttrArray {
                items: vec![],
            })),
        };
        assert!(value_from_proto(&proto).is_err());
    }
}
