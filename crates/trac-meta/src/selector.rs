use sqlx::Row;
use uuid::Uuid;

use trac_codec::{Scalar, Value};
use trac_error::{Result, TracError};

use crate::model::{ObjectType, ResolvedTag, TagCriterion, TagHeader, TagSelector, VersionCriterion};
use crate::pool::{sql_err, MetaStore};

/// Resolves a batch of `N` selectors in one round trip, following the
/// `key_mapping` staging protocol of spec §4.4: one `INSERT`, two `UPDATE`
/// joins, then three ordered `SELECT`s. Result rows are returned in the
/// same order as `selectors`.
///
/// Grounded on `agent-sql::live_specs::fetch_live_specs`, which resolves a
/// batch of names against `live_specs` via `unnest($1::text[])` joined back
/// in input order; this staging-table variant is the same "batch resolve,
/// preserve order" shape applied across three joined relations instead of
/// one.
pub async fn resolve_selectors(
    store: &MetaStore,
    tenant_id: i32,
    selectors: &[TagSelector],
) -> Result<Vec<ResolvedTag>> {
    if selectors.is_empty() {
        return Ok(Vec::new());
    }

    let stage = store.mapping_stage.next();
    let mut txn = store.pool().begin().await.map_err(sql_err)?;

    for (ordering, selector) in selectors.iter().enumerate() {
        let (object_version, object_as_of, latest_object) = match &selector.version {
            VersionCriterion::Explicit(v) => (Some(*v), None, false),
            VersionCriterion::AsOf(t) => (None, Some(*t), false),
            VersionCriterion::Latest => (None, None, true),
        };
        let (tag_version, tag_as_of, latest_tag) = match &selector.tag {
            TagCriterion::Explicit(v) => (Some(*v), None, false),
            TagCriterion::AsOf(t) => (None, Some(*t), false),
            TagCriterion::Latest => (None, None, true),
        };

        sqlx::query(
            r#"
            insert into key_mapping (
                mapping_stage, ordering, tenant_id, requested_object_id,
                requested_object_version, requested_object_as_of, requested_latest_object,
                requested_tag_version, requested_tag_as_of, requested_latest_tag
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(stage)
        .bind(ordering as i32)
        .bind(tenant_id)
        .bind(selector.object_id)
        .bind(object_version)
        .bind(object_as_of)
        .bind(latest_object)
        .bind(tag_version)
        .bind(tag_as_of)
        .bind(latest_tag)
        .execute(&mut *txn)
        .await
        .map_err(sql_err)?;
    }

    // Step 2: join key_mapping -> object_id to fill in the object PK.
    sqlx::query(
        r#"
        update key_mapping km
        set object_pk = oid.object_pk
        from object_id oid
        where km.mapping_stage = $1
          and oid.tenant_id = km.tenant_id
          and oid.object_id = km.requested_object_id
        "#,
    )
    .bind(stage)
    .execute(&mut *txn)
    .await
    .map_err(sql_err)?;

    // Step 3: join to object_definition with the disjunctive criterion
    // predicate (explicit version, as-of, or latest).
    sqlx::query(
        r#"
        update key_mapping km
        set definition_pk = def.definition_pk
        from object_definition def
        where km.mapping_stage = $1
          and def.object_fk = km.object_pk
          and (
              (km.requested_object_version is not null and def.object_version = km.requested_object_version)
              or (km.requested_object_as_of is not null
                  and def.object_timestamp <= km.requested_object_as_of
                  and (def.object_superseded is null or def.object_superseded > km.requested_object_as_of))
              or (km.requested_latest_object and def.object_is_latest)
          )
        "#,
    )
    .bind(stage)
    .execute(&mut *txn)
    .await
    .map_err(sql_err)?;

    // Step 4: symmetric join to tag.
    sqlx::query(
        r#"
        update key_mapping km
        set tag_pk = t.tag_pk
        from tag t
        where km.mapping_stage = $1
          and t.definition_fk = km.definition_pk
          and (
              (km.requested_tag_version is not null and t.tag_version = km.requested_tag_version)
              or (km.requested_tag_as_of is not null and t.tag_timestamp <= km.requested_tag_as_of)
              or (km.requested_latest_tag and t.tag_is_latest)
          )
        "#,
    )
    .bind(stage)
    .execute(&mut *txn)
    .await
    .map_err(sql_err)?;

    // Step 5a: read back definitions, ordered to match the input.
    let def_rows = sqlx::query(
        r#"
        select km.ordering, oid.object_id, oid.object_type, def.object_version,
               t.tag_version, def.definition_json
        from key_mapping km
        join object_id oid on oid.object_pk = km.object_pk
        left join object_definition def on def.definition_pk = km.definition_pk
        left join tag t on t.tag_pk = km.tag_pk
        where km.mapping_stage = $1
        order by km.ordering
        "#,
    )
    .bind(stage)
    .fetch_all(&mut *txn)
    .await
    .map_err(sql_err)?;

    if def_rows.len() != selectors.len() {
        cleanup(&mut txn, stage).await;
        return Err(TracError::TracInternal(
            "selector resolution returned an unexpected row count".to_string(),
        ));
    }

    let mut results = Vec::with_capacity(selectors.len());
    for (selector, row) in selectors.iter().zip(def_rows.iter()) {
        let object_version: Option<i32> = row.try_get("object_version").map_err(sql_err)?;
        let tag_version: Option<i32> = row.try_get("tag_version").map_err(sql_err)?;

        if object_version.is_none() {
            cleanup(&mut txn, stage).await;
            return Err(TracError::MissingItem("no matching object definition".to_string()));
        }
        if tag_version.is_none() {
            cleanup(&mut txn, stage).await;
            return Err(TracError::MissingItem("no matching tag".to_string()));
        }

        let object_id: Uuid = row.try_get("object_id").map_err(sql_err)?;
        let object_type: String = row.try_get("object_type").map_err(sql_err)?;
        let definition_json: serde_json::Value = row.try_get("definition_json").map_err(sql_err)?;

        if object_type != selector.object_type.as_str() {
            cleanup(&mut txn, stage).await;
            return Err(TracError::WrongItemType(format!(
                "object {} is of type {}, not {}",
                object_id,
                object_type,
                selector.object_type.as_str()
            )));
        }

        results.push(ResolvedTag {
            header: TagHeader {
                object_id,
                object_type_name: object_type,
                object_version: object_version.unwrap(),
                tag_version: tag_version.unwrap(),
            },
            definition_json,
            attributes: Vec::new(),
        });
    }

    // Step 5b: tag attributes, one scan, reconstructed into scalars/arrays
    // by grouping consecutive `(tag_index, attr_name)` rows (spec §4.4).
    let attr_rows = sqlx::query(
        r#"
        select km.ordering, ta.attr_name, ta.attr_index, ta.attr_type,
               ta.attr_value_boolean, ta.attr_value_integer, ta.attr_value_float,
               ta.attr_value_decimal, ta.attr_value_string, ta.attr_value_date,
               ta.attr_value_datetime
        from key_mapping km
        join tag_attr ta on ta.tag_fk = km.tag_pk
        where km.mapping_stage = $1
        order by km.ordering, ta.attr_name, ta.attr_index
        "#,
    )
    .bind(stage)
    .fetch_all(&mut *txn)
    .await
    .map_err(sql_err)?;

    let mut grouped: Vec<Vec<(String, Vec<(i32, Scalar, String)>)>> =
        vec![Vec::new(); selectors.len()];

    for row in &attr_rows {
        let ordering: i32 = row.try_get("ordering").map_err(sql_err)?;
        let attr_name: String = row.try_get("attr_name").map_err(sql_err)?;
        let attr_index: i32 = row.try_get("attr_index").map_err(sql_err)?;
        let attr_type: String = row.try_get("attr_type").map_err(sql_err)?;
        let scalar = decode_scalar(row, &attr_type)?;

        let bucket = &mut grouped[ordering as usize];
        match bucket.iter_mut().find(|(name, _)| *name == attr_name) {
            Some((_, values)) => values.push((attr_index, scalar, attr_type)),
            None => bucket.push((attr_name, vec![(attr_index, scalar, attr_type)])),
        }
    }

    for (result, bucket) in results.iter_mut().zip(grouped.into_iter()) {
        for (name, mut values) in bucket {
            values.sort_by_key(|(idx, _, _)| *idx);
            let value = if values.len() == 1 && values[0].0 < 0 {
                Value::Scalar(values.into_iter().next().unwrap().1)
            } else {
                let element_type = values[0].1.field_type();
                let scalars = values.into_iter().map(|(_, s, _)| s).collect();
                Value::array(element_type, scalars)
                    .map_err(|e| TracError::DataCorruption(format!("stored attribute array is not homogeneous: {e}")))?
            };
            result.attributes.push((name, value));
        }
    }

    cleanup(&mut txn, stage).await;
    txn.commit().await.map_err(sql_err)?;

    Ok(results)
}

fn decode_scalar(row: &sqlx::postgres::PgRow, attr_type: &str) -> Result<Scalar> {
    use rust_decimal::Decimal;

    Ok(match attr_type {
        "BOOLEAN" => Scalar::Boolean(row.try_get("attr_value_boolean").map_err(sql_err)?),
        "INTEGER" => Scalar::Integer(row.try_get("attr_value_integer").map_err(sql_err)?),
        "FLOAT" => Scalar::Float(row.try_get("attr_value_float").map_err(sql_err)?),
        "DECIMAL" => Scalar::Decimal(row.try_get::<Decimal, _>("attr_value_decimal").map_err(sql_err)?),
        "STRING" => Scalar::String(row.try_get("attr_value_string").map_err(sql_err)?),
        "DATE" => Scalar::Date(row.try_get("attr_value_date").map_err(sql_err)?),
        "DATETIME" => Scalar::DateTime(row.try_get("attr_value_datetime").map_err(sql_err)?),
        other => return Err(TracError::DataCorruption(format!("unknown stored attribute type {other}"))),
    })
}

/// Convenience wrapper over [`resolve_selectors`] for the common
/// "give me whatever's latest" case, used by `readDataset`/`readFile` when
/// no explicit version/tag is named. Grounded on
/// `agent-sql::live_specs::fetch_live_specs`'s "always return a row, even
/// if none exists" shape: a missing object resolves to `None` rather than
/// propagating `MissingItem`, since "nothing latest yet" is an expected
/// outcome here, not a caller error.
pub async fn load_latest_version(
    store: &MetaStore,
    tenant_id: i32,
    object_type: ObjectType,
    object_id: Uuid,
) -> Result<Option<ResolvedTag>> {
    let selector = TagSelector {
        object_type,
        object_id,
        version: VersionCriterion::Latest,
        tag: TagCriterion::Latest,
    };

    match resolve_selectors(store, tenant_id, std::slice::from_ref(&selector)).await {
        Ok(mut rows) => Ok(rows.pop()),
        Err(TracError::MissingItem(_)) => Ok(None),
        Err(other) => Err(other),
    }
}

async fn cleanup(txn: &mut sqlx::Transaction<'_, sqlx::Postgres>, stage: i64) {
    let _ = sqlx::query("delete from key_mapping where mapping_stage = $1")
        .bind(stage)
        .execute(&mut **txn)
        .await;
}
