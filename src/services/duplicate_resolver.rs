//! Duplicate detection against the contact sink
//!
//! Emails are checked in sub-batches, a few sub-batches at a time. A failed
//! sub-batch is treated as "no duplicates" so a transient sink error cannot
//! stall an import; the failure is only logged.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::services::store::{ContactSink, UploadJobStore};
use crate::types::UploadJobUpdate;

/// Share of a chunk's progress span allotted to the duplicate phase
pub const DEDUP_PROGRESS_SHARE: f64 = 0.15;

/// Where and how to report duplicate-phase progress
pub struct DedupProgress<'a> {
    pub jobs: &'a dyn UploadJobStore,
    pub job_id: &'a str,
    /// Job percentage when the chunk started
    pub base_percentage: f64,
    /// Percentage points this whole chunk represents
    pub chunk_span: f64,
    /// Percentage already stored on the job; reports never go below it
    pub floor: i32,
}

impl DedupProgress<'_> {
    /// Percentage after `done` of `total` groups
    pub fn percentage_after(&self, done: usize, total: usize) -> i32 {
        let fraction = if total == 0 { 1.0 } else { done as f64 / total as f64 };
        let pct = self.base_percentage + self.chunk_span * DEDUP_PROGRESS_SHARE * fraction;
        (pct.round().clamp(0.0, 100.0) as i32).max(self.floor).min(100)
    }

    async fn report(&self, done: usize, total: usize) {
        let pct = self.percentage_after(done, total);
        if let Err(e) = self.jobs.update_progress(self.job_id, &UploadJobUpdate::progress(pct)).await {
            warn!("Failed to report duplicate-check progress for job {}: {}", self.job_id, e);
        }
    }
}

pub struct DuplicateResolver {
    sink: Arc<dyn ContactSink>,
    batch_size: usize,
    concurrency: usize,
}

impl DuplicateResolver {
    pub fn new(sink: Arc<dyn ContactSink>, batch_size: usize, concurrency: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    /// Return the lower-cased emails from `emails` that already exist
    pub async fn find_existing(&self, emails: &[String], progress: Option<&DedupProgress<'_>>) -> HashSet<String> {
        let mut existing = HashSet::new();
        if emails.is_empty() {
            return existing;
        }

        let lowered: Vec<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let sub_batches: Vec<&[String]> = lowered.chunks(self.batch_size).collect();
        let groups: Vec<&[&[String]]> = sub_batches.chunks(self.concurrency).collect();
        let total_groups = groups.len();

        for (group_idx, group) in groups.into_iter().enumerate() {
            let results = join_all(group.iter().map(|batch| self.sink.check_emails_exist(batch))).await;

            for (batch, result) in group.iter().zip(results) {
                match result {
                    Ok(found) => existing.extend(found.into_iter().map(|e| e.to_lowercase())),
                    Err(e) => warn!(
                        "Duplicate check failed for {} emails, assuming none exist: {}",
                        batch.len(),
                        e
                    ),
                }
            }

            if let Some(progress) = progress {
                progress.report(group_idx + 1, total_groups).await;
            }
        }

        debug!("Duplicate check: {} of {} emails already exist", existing.len(), emails.len());
        existing
    }
}
