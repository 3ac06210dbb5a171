use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use trac_codec::Value;
use trac_meta::*;

async fn seed_tenant(pool: &PgPool, code: &str) -> i32 {
    sqlx::query_scalar("insert into tenant (tenant_code) values ($1) returning tenant_id")
        .bind(code)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
async fn save_new_object_then_resolve_latest(pool: PgPool) {
    let tenant_id = seed_tenant(&pool, "acme").await;
    let store = MetaStore::new(pool);

    let header = save_new_object(
        &store,
        tenant_id,
        ObjectType::Data,
        json!({"schema": "s1"}),
        &[("owner".to_string(), Value::Scalar(trac_codec::Scalar::String("alice".into())))],
    )
    .await
    .unwrap();

    assert_eq!(header.object_version, 1);
    assert_eq!(header.tag_version, 1);

    let resolved = load_latest_version(&store, tenant_id, ObjectType::Data, header.object_id)
        .await
        .unwrap()
        .expect("object should resolve");

    assert_eq!(resolved.header, header);
    assert_eq!(resolved.attributes.len(), 1);
    assert_eq!(resolved.attributes[0].0, "owner");
}

#[sqlx::test(migrations = "./migrations")]
async fn save_new_version_requires_matching_object_type(pool: PgPool) {
    let tenant_id = seed_tenant(&pool, "acme").await;
    let store = MetaStore::new(pool);

    let header = save_new_object(&store, tenant_id, ObjectType::Data, json!({}), &[])
        .await
        .unwrap();

    let err = save_new_version(
        &store,
        tenant_id,
        header.object_id,
        ObjectType::File,
        1,
        json!({}),
        &[],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, trac_error::TracError::WrongItemType(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn save_new_version_flips_the_prior_latest_flag(pool: PgPool) {
    let tenant_id = seed_tenant(&pool, "acme").await;
    let store = MetaStore::new(pool);

    let header = save_new_object(&store, tenant_id, ObjectType::Data, json!({"v": 1}), &[])
        .await
        .unwrap();

    let header2 = save_new_version(
        &store,
        tenant_id,
        header.object_id,
        ObjectType::Data,
        header.object_version,
        json!({"v": 2}),
        &[],
    )
    .await
    .unwrap();

    assert_eq!(header2.object_version, 2);

    let latest = load_latest_version(&store, tenant_id, ObjectType::Data, header.object_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.header.object_version, 2);
    assert_eq!(latest.definition_json, json!({"v": 2}));
}

#[sqlx::test(migrations = "./migrations")]
async fn resolve_selectors_reports_missing_item_for_unknown_object(pool: PgPool) {
    let tenant_id = seed_tenant(&pool, "acme").await;
    let store = MetaStore::new(pool);

    let selector = TagSelector {
        object_type: ObjectType::Data,
        object_id: Uuid::new_v4(),
        version: VersionCriterion::Latest,
        tag: TagCriterion::Latest,
    };

    let err = resolve_selectors(&store, tenant_id, &[selector]).await.unwrap_err();
    assert!(matches!(err, trac_error::TracError::MissingItem(_)));
}
