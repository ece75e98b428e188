//! Upload job types
//!
//! An upload job is one CSV import request together with its resumable
//! processing state. The chunk scheduler is its only writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type};

/// Maximum number of error strings kept on a job
pub const MAX_STORED_ERRORS: usize = 100;
/// Maximum number of duplicate strings kept on a job
pub const MAX_STORED_DUPLICATES: usize = 100;
/// Maximum number of chunk history entries kept on a job
pub const MAX_CHUNK_HISTORY: usize = 50;

/// Upload job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "upload_job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UploadJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UploadJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadJobStatus::Pending => "pending",
            UploadJobStatus::Processing => "processing",
            UploadJobStatus::Completed => "completed",
            UploadJobStatus::Failed => "failed",
        }
    }
}

/// One processed chunk, kept for observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHistoryEntry {
    pub chunk_index: u32,
    pub contact_count: u32,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Upload job entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub id: String,
    pub status: UploadJobStatus,
    pub csv_data: Option<String>,

    // Progress counters
    pub total_contacts: i64,
    pub processed_contacts: i64,
    pub successful_contacts: i64,
    pub failed_contacts: i64,
    pub duplicate_contacts: i64,
    pub validation_errors: i64,
    pub progress_percentage: i32,

    /// Index of the next unprocessed data row (0-based, header excluded)
    pub resume_from_contact: i64,

    pub selected_lists: Vec<String>,
    pub errors: Json<Vec<String>>,
    pub duplicates: Json<Vec<String>>,
    pub chunk_processing_history: Json<Vec<ChunkHistoryEntry>>,

    /// Store-level lease, set by a claim and cleared on release
    pub locked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadJob {
    /// Create a pending job for `csv_data`. `total_contacts` is fixed here
    /// and never recomputed afterwards.
    pub fn new_pending(id: String, csv_data: String, selected_lists: Vec<String>) -> Self {
        let total = crate::services::csv_tokenizer::split_lines(&csv_data)
            .len()
            .saturating_sub(1) as i64;
        let now = Utc::now();
        Self {
            id,
            status: UploadJobStatus::Pending,
            csv_data: Some(csv_data),
            total_contacts: total,
            processed_contacts: 0,
            successful_contacts: 0,
            failed_contacts: 0,
            duplicate_contacts: 0,
            validation_errors: 0,
            progress_percentage: 0,
            resume_from_contact: 0,
            selected_lists,
            errors: Json(Vec::new()),
            duplicates: Json(Vec::new()),
            chunk_processing_history: Json(Vec::new()),
            locked_at: None,
            completed_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge a partial update into this job, the same way the store does
    pub fn apply(&mut self, update: &UploadJobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(v) = update.processed_contacts {
            self.processed_contacts = v;
        }
        if let Some(v) = update.successful_contacts {
            self.successful_contacts = v;
        }
        if let Some(v) = update.failed_contacts {
            self.failed_contacts = v;
        }
        if let Some(v) = update.duplicate_contacts {
            self.duplicate_contacts = v;
        }
        if let Some(v) = update.validation_errors {
            self.validation_errors = v;
        }
        if let Some(v) = update.progress_percentage {
            self.progress_percentage = v;
        }
        if let Some(v) = update.resume_from_contact {
            self.resume_from_contact = v;
        }
        if let Some(ref v) = update.errors {
            self.errors = Json(v.clone());
        }
        if let Some(ref v) = update.duplicates {
            self.duplicates = Json(v.clone());
        }
        if let Some(ref v) = update.chunk_processing_history {
            self.chunk_processing_history = Json(v.clone());
        }
        if let Some(v) = update.completed_at {
            self.completed_at = Some(v);
        }
        if let Some(ref v) = update.error_message {
            self.error_message = Some(v.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of an upload job. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJobUpdate {
    pub status: Option<UploadJobStatus>,
    pub processed_contacts: Option<i64>,
    pub successful_contacts: Option<i64>,
    pub failed_contacts: Option<i64>,
    pub duplicate_contacts: Option<i64>,
    pub validation_errors: Option<i64>,
    pub progress_percentage: Option<i32>,
    pub resume_from_contact: Option<i64>,
    pub errors: Option<Vec<String>>,
    pub duplicates: Option<Vec<String>>,
    pub chunk_processing_history: Option<Vec<ChunkHistoryEntry>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl UploadJobUpdate {
    /// Progress-only update used while a chunk is still running
    pub fn progress(percentage: i32) -> Self {
        Self {
            progress_percentage: Some(percentage),
            ..Default::default()
        }
    }

    /// Terminal failure update
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(UploadJobStatus::Failed),
            error_message: Some(message.into()),
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Append `new` to `existing`, keeping only the last `cap` entries
pub fn append_bounded<T: Clone>(existing: &[T], new: impl IntoIterator<Item = T>, cap: usize) -> Vec<T> {
    let mut merged: Vec<T> = existing.to_vec();
    merged.extend(new);
    if merged.len() > cap {
        merged.drain(..merged.len() - cap);
    }
    merged
}
