//! Chunked upload processor
//!
//! Each call to [`ChunkScheduler::run_once`] processes one bounded chunk of
//! one upload job and returns:
//!
//! `AcquireJob → ComputeWindow → Validate → Dedup → CreateBatch* → PersistProgress → Complete|Continue`
//!
//! The job's `resume_from_contact` cursor is the only state carried between
//! invocations. It advances past every row attempted in this chunk, whatever
//! that row's outcome, and never past a row that was not attempted.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ImportSettings;
use crate::services::column_mapper::ColumnMap;
use crate::services::contact_validator::{validate_row, RowError};
use crate::services::csv_tokenizer::{parse_csv_line, split_lines};
use crate::services::duplicate_resolver::{DedupProgress, DuplicateResolver};
use crate::services::job_lock::JobLockTable;
use crate::services::store::{ContactSink, UploadJobStore};
use crate::types::{
    append_bounded, ChunkHistoryEntry, ContactInsert, ContactRecord, InvocationSummary, UploadJob,
    UploadJobStatus, UploadJobUpdate, MAX_CHUNK_HISTORY, MAX_STORED_DUPLICATES, MAX_STORED_ERRORS,
};

/// Fatal, job-level failures. Any of these marks the job Failed.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Invalid job metadata: {0}")]
    InvalidMetadata(String),
    #[error("Upload job has no CSV data")]
    MissingCsvData,
    #[error("CSV needs a header and at least one data row, found {0} non-blank lines")]
    TooFewLines(usize),
    #[error("CSV header line is empty")]
    MissingHeader,
    #[error("Required columns not found in CSV header: {0}")]
    MissingRequiredColumns(String),
    #[error("Failed to persist job progress: {0}")]
    Persist(String),
}

/// Failures before any job-specific handling runs
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Failed to load upload jobs: {0}")]
    JobStore(String),
}

/// What one chunk did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Rows attempted, i.e. how far the cursor moved
    pub processed: u64,
    pub created: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub validation_errors: u64,
    pub completed: bool,
    /// The deadline stopped creation before the window was exhausted
    pub stopped_early: bool,
}

/// One record dispatched to the sink
struct CreateAttempt {
    line: usize,
    email: String,
    result: anyhow::Result<ContactInsert>,
}

pub struct ChunkScheduler {
    jobs: Arc<dyn UploadJobStore>,
    contacts: Arc<dyn ContactSink>,
    locks: JobLockTable,
    dedup: DuplicateResolver,
    settings: ImportSettings,
}

impl ChunkScheduler {
    pub fn new(jobs: Arc<dyn UploadJobStore>, contacts: Arc<dyn ContactSink>, settings: ImportSettings) -> Self {
        let dedup = DuplicateResolver::new(
            contacts.clone(),
            settings.dedup_batch_size,
            settings.dedup_concurrency,
        );
        Self {
            jobs,
            contacts,
            locks: JobLockTable::new(settings.lock_ttl),
            dedup,
            settings,
        }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Process one chunk of the first claimable job.
    ///
    /// Returns `Err` only when no job-specific handling could run at all;
    /// a failing job is marked Failed and reported as `success: false`.
    pub async fn run_once(&self) -> Result<InvocationSummary, SchedulerError> {
        let started = Instant::now();

        let candidates = self
            .jobs
            .list_jobs(
                &[UploadJobStatus::Pending, UploadJobStatus::Processing],
                self.settings.candidate_limit,
            )
            .await
            .map_err(|e| SchedulerError::JobStore(format!("{:#}", e)))?;

        if candidates.is_empty() {
            debug!("No upload jobs waiting");
            return Ok(InvocationSummary::idle("No upload jobs to process", elapsed_ms(started)));
        }

        for job in candidates {
            let Some(guard) = self.locks.try_acquire(&job.id) else {
                debug!("Upload job {} is locked in this process, skipping", job.id);
                continue;
            };

            match self.jobs.claim_job(&job.id, self.settings.lock_ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Upload job {} is held by another worker, skipping", job.id);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to claim upload job {}: {}", job.id, e);
                    continue;
                }
            }

            let summary = self.process_claimed(&job, started).await;

            if let Err(e) = self.jobs.release_job(guard.job_id()).await {
                warn!("Failed to release lease on upload job {}: {}", guard.job_id(), e);
            }
            return Ok(summary);
        }

        Ok(InvocationSummary::idle(
            "All upload jobs are currently being processed",
            elapsed_ms(started),
        ))
    }

    async fn process_claimed(&self, job: &UploadJob, started: Instant) -> InvocationSummary {
        info!(
            "Processing upload job {} from row {} of {}",
            job.id, job.resume_from_contact, job.total_contacts
        );

        match self.process_chunk(job, started).await {
            Ok(outcome) => {
                let mut message = format!(
                    "Processed {} rows of job {}: {} created, {} duplicates, {} invalid, {} failed",
                    outcome.processed,
                    job.id,
                    outcome.created,
                    outcome.duplicates,
                    outcome.validation_errors,
                    outcome.failed
                );
                if outcome.completed {
                    message.push_str("; import completed");
                } else if outcome.stopped_early {
                    message.push_str("; time budget reached, continuing next run");
                }
                info!("{}", message);

                InvocationSummary {
                    success: true,
                    message,
                    processed: outcome.processed,
                    elapsed_time_ms: Some(elapsed_ms(started)),
                    job_id: Some(job.id.clone()),
                    completed: outcome.completed,
                }
            }
            Err(e) => {
                error!("Upload job {} failed: {}", job.id, e);
                if let Err(mark_err) = self
                    .jobs
                    .update_progress(&job.id, &UploadJobUpdate::failed(e.to_string()))
                    .await
                {
                    error!("Failed to mark upload job {} as failed: {}", job.id, mark_err);
                }

                InvocationSummary {
                    success: false,
                    message: format!("Job {} failed: {}", job.id, e),
                    processed: 0,
                    elapsed_time_ms: Some(elapsed_ms(started)),
                    job_id: Some(job.id.clone()),
                    completed: false,
                }
            }
        }
    }

    /// Run the chunk state machine for a claimed job
    pub async fn process_chunk(&self, job: &UploadJob, started: Instant) -> Result<ChunkOutcome, ImportError> {
        if job.resume_from_contact < 0 || job.total_contacts < 0 {
            return Err(ImportError::InvalidMetadata(format!(
                "resume_from_contact={} total_contacts={}",
                job.resume_from_contact, job.total_contacts
            )));
        }

        // A crash between the last chunk and the completion write leaves a
        // finished job in Processing; complete it without touching any rows.
        if job.resume_from_contact >= job.total_contacts {
            info!("Upload job {} has no rows left, marking completed", job.id);
            self.persist(job, &completion_update()).await?;
            return Ok(ChunkOutcome {
                completed: true,
                ..Default::default()
            });
        }

        let csv = job
            .csv_data
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ImportError::MissingCsvData)?;
        let lines = split_lines(csv);
        if lines.len() < 2 {
            return Err(ImportError::TooFewLines(lines.len()));
        }
        let headers = parse_csv_line(lines[0]);
        if headers.iter().all(|h| h.is_empty()) {
            return Err(ImportError::MissingHeader);
        }
        let columns = ColumnMap::from_headers(&headers);
        columns.require_fields()?;
        debug!("Upload job {}: mapped {} of {} header columns", job.id, columns.len(), headers.len());

        // ComputeWindow: line indices, header is line 0
        let resume = job.resume_from_contact as usize;
        let start = (resume + 1).max(1);
        let end = lines.len().min(start.saturating_add(self.settings.chunk_size)).max(start);
        debug!("Upload job {} window: lines {}..{} of {}", job.id, start, end, lines.len());

        // Validate
        let today = Utc::now().date_naive();
        let mut valid: Vec<(usize, ContactRecord)> = Vec::new();
        let mut invalid: Vec<RowError> = Vec::new();
        let mut validated_end = start;
        for (line_idx, line) in lines.iter().enumerate().take(end).skip(start) {
            if invalid.len() >= self.settings.max_validation_errors {
                warn!(
                    "Upload job {} hit {} validation errors, leaving remaining rows for the next run",
                    job.id,
                    invalid.len()
                );
                break;
            }
            let row = parse_csv_line(line);
            match validate_row(&row, &columns, line_idx + 1, &job.selected_lists, today) {
                Ok(record) => valid.push((line_idx, record)),
                Err(e) => invalid.push(e),
            }
            validated_end = line_idx + 1;
        }

        // Dedup: repeats within the window first, then the sink
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(valid.len());
        let mut duplicates: Vec<(usize, String)> = Vec::new();
        for (line, record) in valid {
            if seen.insert(record.email.clone()) {
                candidates.push((line, record));
            } else {
                duplicates.push((line, record.email));
            }
        }

        let total = job.total_contacts.max(1) as f64;
        let progress = DedupProgress {
            jobs: &*self.jobs,
            job_id: &job.id,
            base_percentage: resume as f64 * 100.0 / total,
            chunk_span: (end - start) as f64 * 100.0 / total,
            floor: job.progress_percentage,
        };
        let emails: Vec<String> = candidates.iter().map(|(_, r)| r.email.clone()).collect();
        let existing = self.dedup.find_existing(&emails, Some(&progress)).await;
        let reported_percentage = if emails.is_empty() { job.progress_percentage } else { progress.percentage_after(1, 1) };

        let mut new_records = Vec::with_capacity(candidates.len());
        for (line, record) in candidates {
            if existing.contains(&record.email) {
                duplicates.push((line, record.email));
            } else {
                new_records.push((line, record));
            }
        }

        // CreateBatch
        let deadline = self.settings.deadline();
        let batches: Vec<&[(usize, ContactRecord)]> = new_records.chunks(self.settings.create_batch_size).collect();
        let mut attempts: Vec<CreateAttempt> = Vec::with_capacity(new_records.len());
        let mut cutoff = validated_end;
        let mut stopped_early = false;

        for (group_idx, group) in batches.chunks(self.settings.create_concurrency).enumerate() {
            if group_idx > 0 && !self.settings.batch_group_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_group_delay).await;
            }
            if started.elapsed() >= deadline {
                // Rows from the first undispatched record on are left for the next run
                cutoff = group[0][0].0;
                stopped_early = true;
                warn!(
                    "Upload job {} reached {:?} of its time budget, stopping before row {}",
                    job.id,
                    deadline,
                    cutoff + 1
                );
                break;
            }

            let results = join_all(group.iter().map(|batch| self.create_batch(batch))).await;
            attempts.extend(results.into_iter().flatten());
        }

        // PersistProgress: only rows before the cutoff were attempted
        let attempted = (cutoff - start) as i64;
        let new_resume = job.resume_from_contact + attempted;

        let mut error_messages: Vec<String> = invalid
            .iter()
            .filter(|e| e.row - 1 < cutoff)
            .map(|e| e.to_string())
            .collect();
        let validation_count = error_messages.len() as u64;

        duplicates.retain(|(line, _)| *line < cutoff);
        let mut created = 0u64;
        let mut failed = 0u64;
        for attempt in &attempts {
            match &attempt.result {
                Ok(ContactInsert::Created) => created += 1,
                Ok(ContactInsert::AlreadyExists) => duplicates.push((attempt.line, attempt.email.clone())),
                Err(e) => {
                    failed += 1;
                    error_messages.push(format!(
                        "Row {}: Failed to create contact {}: {}",
                        attempt.line + 1,
                        attempt.email,
                        e
                    ));
                }
            }
        }
        duplicates.sort_by_key(|(line, _)| *line);
        let duplicate_messages: Vec<String> = duplicates
            .iter()
            .map(|(line, email)| format!("Row {}: {} already exists", line + 1, email))
            .collect();

        let completed = new_resume >= job.total_contacts || cutoff >= lines.len();
        let percentage = if completed {
            100
        } else {
            let pct = (new_resume as f64 * 100.0 / total).round() as i32;
            pct.max(job.progress_percentage).max(reported_percentage).min(100)
        };

        let history = &job.chunk_processing_history.0;
        let entry = ChunkHistoryEntry {
            chunk_index: history.last().map_or(0, |h| h.chunk_index + 1),
            contact_count: attempted as u32,
            duration_ms: elapsed_ms(started),
            timestamp: Utc::now(),
        };

        let mut update = UploadJobUpdate {
            status: Some(UploadJobStatus::Processing),
            processed_contacts: Some(job.processed_contacts + attempted),
            successful_contacts: Some(job.successful_contacts + created as i64),
            failed_contacts: Some(job.failed_contacts + failed as i64),
            duplicate_contacts: Some(job.duplicate_contacts + duplicates.len() as i64),
            validation_errors: Some(job.validation_errors + validation_count as i64),
            progress_percentage: Some(percentage),
            resume_from_contact: Some(new_resume),
            errors: Some(append_bounded(&job.errors.0, error_messages, MAX_STORED_ERRORS)),
            duplicates: Some(append_bounded(&job.duplicates.0, duplicate_messages, MAX_STORED_DUPLICATES)),
            chunk_processing_history: Some(append_bounded(history, [entry], MAX_CHUNK_HISTORY)),
            ..Default::default()
        };
        if completed {
            update.status = Some(UploadJobStatus::Completed);
            update.completed_at = Some(Utc::now());
        }

        self.persist(job, &update).await?;

        if created > 0 {
            self.refresh_list_counts(&job.selected_lists).await;
        }

        Ok(ChunkOutcome {
            processed: attempted as u64,
            created,
            failed,
            duplicates: duplicates.len() as u64,
            validation_errors: validation_count,
            completed,
            stopped_early,
        })
    }

    /// Create one batch sequentially, pausing between records
    async fn create_batch(&self, batch: &[(usize, ContactRecord)]) -> Vec<CreateAttempt> {
        let mut attempts = Vec::with_capacity(batch.len());
        for (i, (line, record)) in batch.iter().enumerate() {
            if i > 0 && !self.settings.record_delay.is_zero() {
                tokio::time::sleep(self.settings.record_delay).await;
            }
            let result = self.contacts.create_contact(record).await;
            if let Err(ref e) = result {
                warn!("Failed to create contact {} (row {}): {}", record.email, line + 1, e);
            }
            attempts.push(CreateAttempt {
                line: *line,
                email: record.email.clone(),
                result,
            });
        }
        attempts
    }

    async fn refresh_list_counts(&self, list_ids: &[String]) {
        for list_id in list_ids {
            if let Err(e) = self.contacts.update_list_contact_count(list_id).await {
                warn!("Failed to update contact count of list {}: {}", list_id, e);
            }
        }
    }

    async fn persist(&self, job: &UploadJob, update: &UploadJobUpdate) -> Result<(), ImportError> {
        self.jobs
            .update_progress(&job.id, update)
            .await
            .map_err(|e| ImportError::Persist(format!("{:#}", e)))
    }
}

fn completion_update() -> UploadJobUpdate {
    UploadJobUpdate {
        status: Some(UploadJobStatus::Completed),
        progress_percentage: Some(100),
        completed_at: Some(Utc::now()),
        ..Default::default()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
