//! Database module

pub mod queries;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::services::store::{ContactSink, UploadJobStore};
use crate::types::{ContactInsert, ContactRecord, UploadJob, UploadJobStatus, UploadJobUpdate};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run database migrations.
///
/// Stored checksums that differ from the embedded ones (CRLF/LF checkouts)
/// are rewritten first so `migrator.run` does not refuse to start.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let migrator = sqlx::migrate!("./migrations");
    fix_migration_checksums(pool, &migrator).await?;
    migrator.run(pool).await?;

    info!("Database migrations complete");
    Ok(())
}

async fn fix_migration_checksums(pool: &PgPool, migrator: &sqlx::migrate::Migrator) -> Result<()> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')"
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(());
    }

    for migration in migrator.iter().filter(|m| !m.migration_type.is_down_migration()) {
        let stored: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT checksum FROM _sqlx_migrations WHERE version = $1"
        )
        .bind(migration.version)
        .fetch_optional(pool)
        .await?;

        if let Some((stored_checksum,)) = stored {
            let current_checksum: &[u8] = &migration.checksum;
            if stored_checksum != current_checksum {
                warn!(
                    "Migration {} ({}) checksum mismatch, updating stored checksum",
                    migration.version, migration.description
                );
                sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                    .bind(current_checksum)
                    .bind(migration.version)
                    .execute(pool)
                    .await?;
            }
        }
    }

    Ok(())
}

/// Postgres-backed job store and contact sink
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadJobStore for PgStore {
    async fn list_jobs(&self, statuses: &[UploadJobStatus], limit: i64) -> Result<Vec<UploadJob>> {
        queries::upload_job::list_upload_jobs(&self.pool, statuses, limit).await
    }

    async fn claim_job(&self, job_id: &str, stale_after: Duration) -> Result<bool> {
        queries::upload_job::claim_upload_job(&self.pool, job_id, stale_after).await
    }

    async fn release_job(&self, job_id: &str) -> Result<()> {
        queries::upload_job::release_upload_job(&self.pool, job_id).await
    }

    async fn update_progress(&self, job_id: &str, update: &UploadJobUpdate) -> Result<()> {
        queries::upload_job::update_upload_job(&self.pool, job_id, update).await
    }
}

#[async_trait]
impl ContactSink for PgStore {
    async fn check_emails_exist(&self, emails: &[String]) -> Result<Vec<String>> {
        queries::contact::find_existing_emails(&self.pool, emails).await
    }

    async fn create_contact(&self, record: &ContactRecord) -> Result<ContactInsert> {
        queries::contact::insert_contact(&self.pool, record).await
    }

    async fn update_list_contact_count(&self, list_id: &str) -> Result<()> {
        queries::list::refresh_contact_count(&self.pool, list_id).await
    }
}
