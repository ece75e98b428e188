//! Contact database queries

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{ContactInsert, ContactRecord};

/// Lower-cased emails from `emails` that already have a contact
pub async fn find_existing_emails(pool: &PgPool, emails: &[String]) -> Result<Vec<String>> {
    let lowered: Vec<String> = emails.iter().map(|e| e.to_lowercase()).collect();

    let rows: Vec<(String,)> = sqlx::query_as("SELECT email FROM contacts WHERE email = ANY($1)")
        .bind(&lowered)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|(email,)| email).collect())
}

/// Insert a contact and its list memberships.
///
/// A contact with the same email wins over this one; nothing is written
/// and [`ContactInsert::AlreadyExists`] is returned.
pub async fn insert_contact(pool: &PgPool, record: &ContactRecord) -> Result<ContactInsert> {
    let mut tx = pool.begin().await?;

    let inserted: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO contacts (email, first_name, last_name, status, tags, subscribe_date, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (email) DO NOTHING
        RETURNING id
        "#
    )
    .bind(&record.email)
    .bind(&record.first_name)
    .bind(&record.last_name)
    .bind(record.status)
    .bind(&record.tags)
    .bind(record.subscribe_date)
    .bind(&record.notes)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((contact_id,)) = inserted else {
        tx.rollback().await?;
        return Ok(ContactInsert::AlreadyExists);
    };

    if !record.list_ids.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO contact_list_memberships (contact_id, list_id)
            SELECT $1, list_id FROM UNNEST($2::text[]) AS list_id
            ON CONFLICT DO NOTHING
            "#
        )
        .bind(contact_id)
        .bind(&record.list_ids)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(ContactInsert::Created)
}
