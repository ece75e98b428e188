//! Collaborator seams for the import pipeline
//!
//! The scheduler only talks to the outside world through these two traits:
//! - [`UploadJobStore`] for reading, claiming and updating upload jobs
//! - [`ContactSink`] for existence checks and contact creation
//!
//! `db::PgStore` implements both for production. Tests use the in-memory
//! double in [`testing`].

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{ContactInsert, ContactRecord, UploadJob, UploadJobStatus, UploadJobUpdate};

/// Access to persisted upload jobs
#[async_trait]
pub trait UploadJobStore: Send + Sync {
    /// Jobs in any of `statuses`, oldest first
    async fn list_jobs(&self, statuses: &[UploadJobStatus], limit: i64) -> Result<Vec<UploadJob>>;

    /// Atomically claim a job for processing. Succeeds when the job is
    /// Pending, or Processing with no lease or a lease older than `stale_after`.
    /// A successful claim sets status to Processing and stamps the lease.
    async fn claim_job(&self, job_id: &str, stale_after: Duration) -> Result<bool>;

    /// Clear the lease taken by [`claim_job`](Self::claim_job)
    async fn release_job(&self, job_id: &str) -> Result<()>;

    /// Single merge-update of job fields
    async fn update_progress(&self, job_id: &str, update: &UploadJobUpdate) -> Result<()>;
}

/// The contact store new contacts are written into
#[async_trait]
pub trait ContactSink: Send + Sync {
    /// Subset of `emails` (lower-cased) that already exist
    async fn check_emails_exist(&self, emails: &[String]) -> Result<Vec<String>>;

    async fn create_contact(&self, record: &ContactRecord) -> Result<ContactInsert>;

    /// Refresh the cached contact count of a list
    async fn update_list_contact_count(&self, list_id: &str) -> Result<()>;
}

#[cfg(test)]
pub mod testing {
    //! In-memory store and sink for scheduler and handler tests

    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use chrono::Utc;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryStore {
        pub jobs: Mutex<Vec<UploadJob>>,
        pub contacts: Mutex<HashMap<String, ContactRecord>>,
        /// Emails whose creation always fails
        pub rejected_emails: Mutex<HashSet<String>>,
        pub list_count_updates: Mutex<Vec<String>>,
        /// Every progress update, in call order
        pub updates: Mutex<Vec<(String, UploadJobUpdate)>>,
        pub create_delay: Mutex<Option<Duration>>,
        pub check_delay: Mutex<Option<Duration>>,
        /// Clock reading at the start of every create call, in call order
        pub create_started: Mutex<Vec<(String, tokio::time::Instant)>>,
        pub fail_list_jobs: AtomicBool,
        pub fail_existence_checks: AtomicBool,
        pub fail_list_counts: AtomicBool,
        pub create_calls: AtomicUsize,
        pub existence_calls: AtomicUsize,
        pub in_flight_checks: AtomicUsize,
        pub peak_checks: AtomicUsize,
        pub in_flight_creates: AtomicUsize,
        pub peak_creates: AtomicUsize,
    }

    fn enter(in_flight: &AtomicUsize, peak: &AtomicUsize) {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(in_flight: &AtomicUsize) {
        in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_job(job: UploadJob) -> Self {
            let store = Self::new();
            store.jobs.lock().push(job);
            store
        }

        pub fn add_existing_contact(&self, email: &str) {
            let record = ContactRecord {
                first_name: "Existing".to_string(),
                last_name: None,
                email: email.to_lowercase(),
                status: Default::default(),
                tags: vec![],
                subscribe_date: Utc::now().date_naive(),
                notes: None,
                list_ids: vec![],
            };
            self.contacts.lock().insert(email.to_lowercase(), record);
        }

        pub fn job(&self, job_id: &str) -> UploadJob {
            self.jobs
                .lock()
                .iter()
                .find(|j| j.id == job_id)
                .cloned()
                .expect("job exists in store")
        }

        pub fn set_create_delay(&self, delay: Duration) {
            *self.create_delay.lock() = Some(delay);
        }

        pub fn set_check_delay(&self, delay: Duration) {
            *self.check_delay.lock() = Some(delay);
        }
    }

    #[async_trait]
    impl UploadJobStore for InMemoryStore {
        async fn list_jobs(&self, statuses: &[UploadJobStatus], limit: i64) -> Result<Vec<UploadJob>> {
            if self.fail_list_jobs.load(Ordering::SeqCst) {
                anyhow::bail!("job store unavailable");
            }
            let mut jobs: Vec<UploadJob> = self
                .jobs
                .lock()
                .iter()
                .filter(|j| statuses.contains(&j.status))
                .cloned()
                .collect();
            jobs.sort_by_key(|j| j.created_at);
            jobs.truncate(limit.max(0) as usize);
            Ok(jobs)
        }

        async fn claim_job(&self, job_id: &str, stale_after: Duration) -> Result<bool> {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) else {
                return Ok(false);
            };
            let now = Utc::now();
            let lease_free = match job.locked_at {
                None => true,
                Some(at) => (now - at).to_std().map_or(false, |age| age >= stale_after),
            };
            let claimable = match job.status {
                UploadJobStatus::Pending => true,
                UploadJobStatus::Processing => lease_free,
                _ => false,
            };
            if claimable {
                job.status = UploadJobStatus::Processing;
                job.locked_at = Some(now);
            }
            Ok(claimable)
        }

        async fn release_job(&self, job_id: &str) -> Result<()> {
            if let Some(job) = self.jobs.lock().iter_mut().find(|j| j.id == job_id) {
                job.locked_at = None;
            }
            Ok(())
        }

        async fn update_progress(&self, job_id: &str, update: &UploadJobUpdate) -> Result<()> {
            self.updates.lock().push((job_id.to_string(), update.clone()));
            let mut jobs = self.jobs.lock();
            let job = jobs
                .iter_mut()
                .find(|j| j.id == job_id)
                .ok_or_else(|| anyhow::anyhow!("job {} not found", job_id))?;
            job.apply(update);
            Ok(())
        }
    }

    #[async_trait]
    impl ContactSink for InMemoryStore {
        async fn check_emails_exist(&self, emails: &[String]) -> Result<Vec<String>> {
            self.existence_calls.fetch_add(1, Ordering::SeqCst);
            enter(&self.in_flight_checks, &self.peak_checks);
            let delay = *self.check_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            leave(&self.in_flight_checks);
            if self.fail_existence_checks.load(Ordering::SeqCst) {
                anyhow::bail!("existence check timed out");
            }
            let contacts = self.contacts.lock();
            Ok(emails
                .iter()
                .map(|e| e.to_lowercase())
                .filter(|e| contacts.contains_key(e))
                .collect())
        }

        async fn create_contact(&self, record: &ContactRecord) -> Result<ContactInsert> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.create_started
                .lock()
                .push((record.email.clone(), tokio::time::Instant::now()));
            enter(&self.in_flight_creates, &self.peak_creates);
            let delay = *self.create_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            leave(&self.in_flight_creates);
            if self.rejected_emails.lock().contains(&record.email) {
                anyhow::bail!("constraint violation for {}", record.email);
            }
            let mut contacts = self.contacts.lock();
            if contacts.contains_key(&record.email) {
                return Ok(ContactInsert::AlreadyExists);
            }
            contacts.insert(record.email.clone(), record.clone());
            Ok(ContactInsert::Created)
        }

        async fn update_list_contact_count(&self, list_id: &str) -> Result<()> {
            if self.fail_list_counts.load(Ordering::SeqCst) {
                anyhow::bail!("list {} not found", list_id);
            }
            self.list_count_updates.lock().push(list_id.to_string());
            Ok(())
        }
    }
}
