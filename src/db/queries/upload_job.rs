//! Upload job database queries

use std::time::Duration;

use anyhow::Result;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::types::{UploadJob, UploadJobStatus, UploadJobUpdate};

const UPLOAD_JOB_COLUMNS: &str = r#"
    id, status, csv_data,
    total_contacts, processed_contacts, successful_contacts, failed_contacts,
    duplicate_contacts, validation_errors, progress_percentage, resume_from_contact,
    selected_lists, errors, duplicates, chunk_processing_history,
    locked_at, completed_at, error_message, created_at, updated_at
"#;

/// Insert a new upload job
pub async fn create_upload_job(pool: &PgPool, job: &UploadJob) -> Result<UploadJob> {
    let query = format!(
        r#"
        INSERT INTO upload_jobs (id, status, csv_data, total_contacts, selected_lists)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        UPLOAD_JOB_COLUMNS
    );

    let created = sqlx::query_as::<_, UploadJob>(&query)
        .bind(&job.id)
        .bind(job.status)
        .bind(&job.csv_data)
        .bind(job.total_contacts)
        .bind(&job.selected_lists)
        .fetch_one(pool)
        .await?;

    Ok(created)
}

/// List jobs in any of `statuses`, oldest first
pub async fn list_upload_jobs(pool: &PgPool, statuses: &[UploadJobStatus], limit: i64) -> Result<Vec<UploadJob>> {
    let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let query = format!(
        r#"
        SELECT {}
        FROM upload_jobs
        WHERE status::text = ANY($1)
        ORDER BY created_at ASC
        LIMIT $2
        "#,
        UPLOAD_JOB_COLUMNS
    );

    let jobs = sqlx::query_as::<_, UploadJob>(&query)
        .bind(&statuses)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(jobs)
}

/// Conditionally move a job to Processing and stamp its lease.
///
/// Only one caller can win: the row is matched and updated in a single
/// statement, so a concurrent claim sees the fresh `locked_at`.
pub async fn claim_upload_job(pool: &PgPool, id: &str, stale_after: Duration) -> Result<bool> {
    let claimed: Option<(String,)> = sqlx::query_as(
        r#"
        UPDATE upload_jobs
        SET status = 'processing', locked_at = NOW(), updated_at = NOW()
        WHERE id = $1
          AND (
            status = 'pending'
            OR (status = 'processing'
                AND (locked_at IS NULL OR locked_at < NOW() - make_interval(secs => $2)))
          )
        RETURNING id
        "#
    )
    .bind(id)
    .bind(stale_after.as_secs_f64())
    .fetch_optional(pool)
    .await?;

    Ok(claimed.is_some())
}

/// Clear the lease on a job
pub async fn release_upload_job(pool: &PgPool, id: &str) -> Result<()> {
    sqlx::query("UPDATE upload_jobs SET locked_at = NULL WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Merge-update a job. `None` fields keep their stored value.
pub async fn update_upload_job(pool: &PgPool, id: &str, update: &UploadJobUpdate) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE upload_jobs SET
            status = COALESCE($2, status),
            processed_contacts = COALESCE($3, processed_contacts),
            successful_contacts = COALESCE($4, successful_contacts),
            failed_contacts = COALESCE($5, failed_contacts),
            duplicate_contacts = COALESCE($6, duplicate_contacts),
            validation_errors = COALESCE($7, validation_errors),
            progress_percentage = COALESCE($8, progress_percentage),
            resume_from_contact = COALESCE($9, resume_from_contact),
            errors = COALESCE($10, errors),
            duplicates = COALESCE($11, duplicates),
            chunk_processing_history = COALESCE($12, chunk_processing_history),
            completed_at = COALESCE($13, completed_at),
            error_message = COALESCE($14, error_message),
            updated_at = NOW()
        WHERE id = $1
        "#
    )
    .bind(id)
    .bind(update.status)
    .bind(update.processed_contacts)
    .bind(update.successful_contacts)
    .bind(update.failed_contacts)
    .bind(update.duplicate_contacts)
    .bind(update.validation_errors)
    .bind(update.progress_percentage)
    .bind(update.resume_from_contact)
    .bind(update.errors.clone().map(Json))
    .bind(update.duplicates.clone().map(Json))
    .bind(update.chunk_processing_history.clone().map(Json))
    .bind(update.completed_at)
    .bind(&update.error_message)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("Upload job {} not found", id);
    }

    Ok(())
}
