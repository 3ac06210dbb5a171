use trac_error::{Result, TracError};

use crate::pool::{sql_err, MetaStore};

/// Soft-deletes the current version of a `CONFIG` object entry (recovered
/// feature: spec §3 describes `CONFIG`'s lifecycle including a `deleted`
/// flag, but §6 never wires a public RPC for it — this is kept as an
/// internal store operation only, not a gRPC method).
pub async fn delete_config_entry(
    store: &MetaStore,
    tenant_id: i32,
    config_class: &str,
    config_key: &str,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        update config_entry
        set deleted = true
        where tenant_id = $1 and config_class = $2 and config_key = $3
          and config_version = (
              select max(config_version) from config_entry
              where tenant_id = $1 and config_class = $2 and config_key = $3
          )
        "#,
    )
    .bind(tenant_id)
    .bind(config_class)
    .bind(config_key)
    .execute(store.pool())
    .await
    .map_err(sql_err)?;

    if result.rows_affected() == 0 {
        return Err(TracError::MissingItem(format!(
            "no such config entry: {config_class}/{config_key}"
        )));
    }
    Ok(())
}
