//! Email list database queries

use anyhow::Result;
use sqlx::PgPool;

/// Recompute the cached member count of a list
pub async fn refresh_contact_count(pool: &PgPool, list_id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE email_lists
        SET contact_count = (
                SELECT COUNT(*) FROM contact_list_memberships WHERE list_id = $1
            ),
            updated_at = NOW()
        WHERE id = $1
        "#
    )
    .bind(list_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("Email list {} not found", list_id);
    }

    Ok(())
}
