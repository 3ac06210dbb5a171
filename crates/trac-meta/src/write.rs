use uuid::Uuid;

use trac_codec::{Scalar, Value};
use trac_error::{Result, TracError};

use crate::model::{ObjectType, TagHeader};
use crate::pool::{sql_err, MetaStore};

/// Saves a brand-new object: issues an id, definition version 1, tag
/// version 1 (spec §4.4 `saveNewObject`). One transaction.
pub async fn save_new_object(
    store: &MetaStore,
    tenant_id: i32,
    object_type: ObjectType,
    definition_json: serde_json::Value,
    attributes: &[(String, Value)],
) -> Result<TagHeader> {
    let object_id = Uuid::new_v4();
    let mut txn = store.pool().begin().await.map_err(sql_err)?;

    let object_pk: i64 = sqlx::query_scalar(
        "insert into object_id (tenant_id, object_id, object_type) values ($1, $2, $3) returning object_pk",
    )
    .bind(tenant_id)
    .bind(object_id)
    .bind(object_type.as_str())
    .fetch_one(&mut *txn)
    .await
    .map_err(sql_err)?;

    let definition_pk = insert_definition(&mut txn, object_pk, 1, definition_json).await?;
    let tag_pk = insert_tag(&mut txn, definition_pk, 1).await?;
    insert_attributes(&mut txn, tag_pk, attributes).await?;

    txn.commit().await.map_err(sql_err)?;

    Ok(TagHeader {
        object_id,
        object_type_name: object_type.as_str().to_string(),
        object_version: 1,
        tag_version: 1,
    })
}

/// Saves a new version of an existing object: asserts the stored type
/// matches, flips the prior `object_is_latest`, inserts version `N+1` with
/// tag version 1 (spec §4.4 `saveNewVersion`). One transaction.
pub async fn save_new_version(
    store: &MetaStore,
    tenant_id: i32,
    object_id: Uuid,
    expected_type: ObjectType,
    prior_version: i32,
    definition_json: serde_json::Value,
    attributes: &[(String, Value)],
) -> Result<TagHeader> {
    let mut txn = store.pool().begin().await.map_err(sql_err)?;

    let (object_pk, stored_type): (i64, String) = sqlx::query_as(
        "select object_pk, object_type from object_id where tenant_id = $1 and object_id = $2",
    )
    .bind(tenant_id)
    .bind(object_id)
    .fetch_optional(&mut *txn)
    .await
    .map_err(sql_err)?
    .ok_or_else(|| TracError::MissingItem(format!("no such object: {object_id}")))?;

    if stored_type != expected_type.as_str() {
        return Err(TracError::WrongItemType(format!(
            "object {object_id} is of type {stored_type}, not {}",
            expected_type.as_str()
        )));
    }

    sqlx::query(
        "update object_definition set object_is_latest = false, object_superseded = now()
         where object_fk = $1 and object_version = $2 and object_is_latest",
    )
    .bind(object_pk)
    .bind(prior_version)
    .execute(&mut *txn)
    .await
    .map_err(sql_err)?;

    let new_version = prior_version + 1;
    let definition_pk = insert_definition(&mut txn, object_pk, new_version, definition_json).await?;
    let tag_pk = insert_tag(&mut txn, definition_pk, 1).await?;
    insert_attributes(&mut txn, tag_pk, attributes).await?;

    txn.commit().await.map_err(sql_err)?;

    Ok(TagHeader {
        object_id,
        object_type_name: stored_type,
        object_version: new_version,
        tag_version: 1,
    })
}

/// Saves a new tag on an existing `(object_id, object_version)`: flips the
/// prior `tag_is_latest`, inserts tag version `T+1` (spec §4.4
/// `saveNewTag`). One transaction.
pub async fn save_new_tag(
    store: &MetaStore,
    tenant_id: i32,
    object_id: Uuid,
    object_version: i32,
    attributes: &[(String, Value)],
) -> Result<TagHeader> {
    let mut txn = store.pool().begin().await.map_err(sql_err)?;

    let (object_pk, object_type): (i64, String) = sqlx::query_as(
        "select object_pk, object_type from object_id where tenant_id = $1 and object_id = $2",
    )
    .bind(tenant_id)
    .bind(object_id)
    .fetch_optional(&mut *txn)
    .await
    .map_err(sql_err)?
    .ok_or_else(|| TracError::MissingItem(format!("no such object: {object_id}")))?;

    let (definition_pk, prior_tag_version): (i64, i32) = sqlx::query_as(
        "select def.definition_pk, coalesce(max(t.tag_version), 0)
         from object_definition def
         left join tag t on t.definition_fk = def.definition_pk
         where def.object_fk = $1 and def.object_version = $2
         group by def.definition_pk",
    )
    .bind(object_pk)
    .bind(object_version)
    .fetch_optional(&mut *txn)
    .await
    .map_err(sql_err)?
    .ok_or_else(|| TracError::MissingItem(format!("no such object version: {object_id} v{object_version}")))?;

    sqlx::query("update tag set tag_is_latest = false where definition_fk = $1 and tag_is_latest")
        .bind(definition_pk)
        .execute(&mut *txn)
        .await
        .map_err(sql_err)?;

    let new_tag_version = prior_tag_version + 1;
    let tag_pk = insert_tag(&mut txn, definition_pk, new_tag_version).await?;
    insert_attributes(&mut txn, tag_pk, attributes).await?;

    txn.commit().await.map_err(sql_err)?;

    Ok(TagHeader {
        object_id,
        object_type_name: object_type,
        object_version,
        tag_version: new_tag_version,
    })
}

/// Reserves an object id ahead of any definition existing for it (spec
/// §4.4, two-phase create). The id is immediately visible to
/// `save_preallocated_object` but resolves to `MissingItem` for every
/// selector until a definition is saved against it.
pub async fn preallocate_object_id(store: &MetaStore, tenant_id: i32, object_type: ObjectType) -> Result<Uuid> {
    let object_id = Uuid::new_v4();
    sqlx::query("insert into object_id (tenant_id, object_id, object_type) values ($1, $2, $3)")
        .bind(tenant_id)
        .bind(object_id)
        .bind(object_type.as_str())
        .execute(store.pool())
        .await
        .map_err(sql_err)?;
    Ok(object_id)
}

/// Completes a two-phase create for an id reserved by
/// `preallocate_object_id`: saves definition version 1, tag version 1.
pub async fn save_preallocated_object(
    store: &MetaStore,
    tenant_id: i32,
    object_id: Uuid,
    expected_type: ObjectType,
    definition_json: serde_json::Value,
    attributes: &[(String, Value)],
) -> Result<TagHeader> {
    let mut txn = store.pool().begin().await.map_err(sql_err)?;

    let (object_pk, stored_type): (i64, String) = sqlx::query_as(
        "select object_pk, object_type from object_id where tenant_id = $1 and object_id = $2",
    )
    .bind(tenant_id)
    .bind(object_id)
    .fetch_optional(&mut *txn)
    .await
    .map_err(sql_err)?
    .ok_or_else(|| TracError::MissingItem(format!("no preallocated id: {object_id}")))?;

    if stored_type != expected_type.as_str() {
        return Err(TracError::WrongItemType(format!(
            "preallocated object {object_id} is of type {stored_type}, not {}",
            expected_type.as_str()
        )));
    }

    let existing: Option<i64> = sqlx::query_scalar("select 1 from object_definition where object_fk = $1 limit 1")
        .bind(object_pk)
        .fetch_optional(&mut *txn)
        .await
        .map_err(sql_err)?;
    if existing.is_some() {
        return Err(TracError::DuplicateItem(format!(
            "object {object_id} already has a saved definition"
        )));
    }

    let definition_pk = insert_definition(&mut txn, object_pk, 1, definition_json).await?;
    let tag_pk = insert_tag(&mut txn, definition_pk, 1).await?;
    insert_attributes(&mut txn, tag_pk, attributes).await?;

    txn.commit().await.map_err(sql_err)?;

    Ok(TagHeader {
        object_id,
        object_type_name: stored_type,
        object_version: 1,
        tag_version: 1,
    })
}

async fn insert_definition(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    object_pk: i64,
    object_version: i32,
    definition_json: serde_json::Value,
) -> Result<i64> {
    sqlx::query_scalar(
        "insert into object_definition (object_fk, object_version, definition_json)
         values ($1, $2, $3) returning definition_pk",
    )
    .bind(object_pk)
    .bind(object_version)
    .bind(definition_json)
    .fetch_one(&mut **txn)
    .await
    .map_err(sql_err)
}

async fn insert_tag(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    definition_pk: i64,
    tag_version: i32,
) -> Result<i64> {
    sqlx::query_scalar(
        "insert into tag (definition_fk, tag_version) values ($1, $2) returning tag_pk",
    )
    .bind(definition_pk)
    .bind(tag_version)
    .fetch_one(&mut **txn)
    .await
    .map_err(sql_err)
}

async fn insert_attributes(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tag_pk: i64,
    attributes: &[(String, Value)],
) -> Result<()> {
    for (name, value) in attributes {
        match value {
            Value::Null => continue,
            Value::Scalar(scalar) => insert_one_attr(txn, tag_pk, name, -1, scalar).await?,
            Value::Array(_, scalars) => {
                for (index, scalar) in scalars.iter().enumerate() {
                    insert_one_attr(txn, tag_pk, name, index as i32, scalar).await?;
                }
            }
        }
    }
    Ok(())
}

async fn insert_one_attr(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tag_pk: i64,
    name: &str,
    attr_index: i32,
    scalar: &Scalar,
) -> Result<()> {
    let type_name = scalar.field_type().name();
    let query = sqlx::query(
        r#"
        insert into tag_attr (
            tag_fk, attr_name, attr_index, attr_type,
            attr_value_boolean, attr_value_integer, attr_value_float,
            attr_value_decimal, attr_value_string, attr_value_date, attr_value_datetime
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    );

    let query = query.bind(tag_pk).bind(name).bind(attr_index).bind(type_name);
    let query = match scalar {
        Scalar::Boolean(v) => query.bind(Some(*v)).bind(None::<i64>).bind(None::<f64>).bind(None::<rust_decimal::Decimal>).bind(None::<String>).bind(None::<chrono::NaiveDate>).bind(None::<chrono::NaiveDateTime>),
        Scalar::Integer(v) => query.bind(None::<bool>).bind(Some(*v)).bind(None::<f64>).bind(None::<rust_decimal::Decimal>).bind(None::<String>).bind(None::<chrono::NaiveDate>).bind(None::<chrono::NaiveDateTime>),
        Scalar::Float(v) => query.bind(None::<bool>).bind(None::<i64>).bind(Some(*v)).bind(None::<rust_decimal::Decimal>).bind(None::<String>).bind(None::<chrono::NaiveDate>).bind(None::<chrono::NaiveDateTime>),
        Scalar::Decimal(v) => query.bind(None::<bool>).bind(None::<i64>).bind(None::<f64>).bind(Some(*v)).bind(None::<String>).bind(None::<chrono::NaiveDate>).bind(None::<chrono::NaiveDateTime>),
        Scalar::String(v) => query.bind(None::<bool>).bind(None::<i64>).bind(None::<f64>).bind(None::<rust_decimal::Decimal>).bind(Some(v.clone())).bind(None::<chrono::NaiveDate>).bind(None::<chrono::NaiveDateTime>),
        Scalar::Date(v) => query.bind(None::<bool>).bind(None::<i64>).bind(None::<f64>).bind(None::<rust_decimal::Decimal>).bind(None::<String>).bind(Some(*v)).bind(None::<chrono::NaiveDateTime>),
        Scalar::DateTime(v) => query.bind(None::<bool>).bind(None::<i64>).bind(None::<f64>).bind(None::<rust_decimal::Decimal>).bind(None::<String>).bind(None::<chrono::NaiveDate>).bind(Some(*v)),
    };

    query.execute(&mut **txn).await.map_err(sql_err)?;
    Ok(())
}
