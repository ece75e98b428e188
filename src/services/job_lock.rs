//! In-process lock table for upload jobs
//!
//! Keeps at most one processor per job id inside this process, with RAII
//! release via [`JobLockGuard`]. Entries older than the TTL are treated as
//! expired so a hung holder cannot block a job forever.
//!
//! This is only a same-process fast path. Exclusivity across processes comes
//! from the atomic claim in the job store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct LockEntry {
    generation: u64,
    acquired_at: Instant,
}

#[derive(Default)]
struct LockState {
    entries: HashMap<String, LockEntry>,
    next_generation: u64,
}

/// RAII guard that releases the job lock when dropped.
/// Must be kept alive for the duration of chunk processing.
pub struct JobLockGuard {
    job_id: String,
    generation: u64,
    table: JobLockTable,
}

impl JobLockGuard {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for JobLockGuard {
    fn drop(&mut self) {
        self.table.release(&self.job_id, self.generation);
    }
}

/// Thread-safe table of held job ids
#[derive(Clone)]
pub struct JobLockTable {
    state: Arc<Mutex<LockState>>,
    ttl: Duration,
}

impl JobLockTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LockState::default())),
            ttl,
        }
    }

    /// Take the lock for `job_id` unless a live holder exists.
    /// An expired entry is replaced.
    pub fn try_acquire(&self, job_id: &str) -> Option<JobLockGuard> {
        let mut state = self.state.lock();
        let now = Instant::now();

        if let Some(entry) = state.entries.get(job_id) {
            if now.duration_since(entry.acquired_at) < self.ttl {
                return None;
            }
            tracing::warn!("Job lock for {} expired after {:?}, taking over", job_id, self.ttl);
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        state.entries.insert(job_id.to_string(), LockEntry { generation, acquired_at: now });

        Some(JobLockGuard {
            job_id: job_id.to_string(),
            generation,
            table: self.clone(),
        })
    }

    /// Whether a live (non-expired) lock is held for `job_id`
    #[cfg(test)]
    fn is_held(&self, job_id: &str) -> bool {
        let state = self.state.lock();
        state
            .entries
            .get(job_id)
            .map_or(false, |e| e.acquired_at.elapsed() < self.ttl)
    }

    /// Remove the entry only if it still belongs to `generation`; a guard
    /// outliving its TTL must not evict the holder that replaced it.
    fn release(&self, job_id: &str, generation: u64) {
        let mut state = self.state.lock();
        if state.entries.get(job_id).map(|e| e.generation) == Some(generation) {
            state.entries.remove(job_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> JobLockTable {
        JobLockTable::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_acquire_then_second_acquire_fails() {
        let locks = table();
        let _guard = locks.try_acquire("job-1").expect("first acquire");
        assert!(locks.try_acquire("job-1").is_none());
        assert!(locks.is_held("job-1"));
    }

    #[tokio::test]
    async fn test_different_jobs_are_independent() {
        let locks = table();
        let _a = locks.try_acquire("job-a").unwrap();
        assert!(locks.try_acquire("job-b").is_some());
    }

    #[tokio::test]
    async fn test_guard_drop_releases() {
        let locks = table();
        {
            let guard = locks.try_acquire("job-1").unwrap();
            assert_eq!(guard.job_id(), "job-1");
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
        assert!(locks.try_acquire("job-1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_can_be_taken_over() {
        let locks = JobLockTable::new(Duration::from_secs(5));
        let _stale = locks.try_acquire("job-1").unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(!locks.is_held("job-1"));
        assert!(locks.try_acquire("job-1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_guard_does_not_evict_new_holder() {
        let locks = JobLockTable::new(Duration::from_secs(5));
        let stale = locks.try_acquire("job-1").unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        let _fresh = locks.try_acquire("job-1").unwrap();

        drop(stale);
        assert!(locks.is_held("job-1"));
        assert!(locks.try_acquire("job-1").is_none());
    }
}
