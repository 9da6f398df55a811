// =============================================================================
// In-process scheduler backend (C6)
// =============================================================================
//
// Default backend: a fixed-size tokio semaphore gates total concurrent
// handler executions, and a per-job `AtomicBool` pause flag lets callers
// suspend a single job without removing it from the fire loop.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;

/// Gates total concurrent handler executions across every job on this
/// backend. `max_instances` on an individual job is enforced by the caller
/// (the scheduler core) via its own per-job permit bookkeeping; this
/// semaphore is the coarser, worker-pool-wide cap.
pub struct InProcessBackend {
    pool: Arc<Semaphore>,
    paused: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl InProcessBackend {
    pub fn new(worker_pool_size: usize) -> Self {
        Self {
            pool: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            paused: RwLock::new(HashMap::new()),
        }
    }

    pub fn worker_pool(&self) -> Arc<Semaphore> {
        self.pool.clone()
    }

    pub fn available_permits(&self) -> usize {
        self.pool.available_permits()
    }

    fn flag_for(&self, job_id: &str) -> Arc<AtomicBool> {
        if let Some(flag) = self.paused.read().get(job_id) {
            return flag.clone();
        }
        self.paused.write().entry(job_id.to_string()).or_insert_with(|| Arc::new(AtomicBool::new(false))).clone()
    }

    pub fn pause(&self, job_id: &str) {
        self.flag_for(job_id).store(true, Ordering::SeqCst);
    }

    pub fn resume(&self, job_id: &str) {
        self.flag_for(job_id).store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self, job_id: &str) -> bool {
        self.paused.read().get(job_id).map(|f| f.load(Ordering::SeqCst)).unwrap_or(false)
    }

    pub fn forget(&self, job_id: &str) {
        self.paused.write().remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_job_is_not_paused() {
        let backend = InProcessBackend::new(4);
        assert!(!backend.is_paused("job-1"));
    }

    #[test]
    fn pause_then_resume_toggles_flag() {
        let backend = InProcessBackend::new(4);
        backend.pause("job-1");
        assert!(backend.is_paused("job-1"));
        backend.resume("job-1");
        assert!(!backend.is_paused("job-1"));
    }

    #[tokio::test]
    async fn worker_pool_caps_concurrent_permits() {
        let backend = InProcessBackend::new(2);
        let pool = backend.worker_pool();
        let p1 = pool.clone().acquire_owned().await.unwrap();
        let p2 = pool.clone().acquire_owned().await.unwrap();
        assert_eq!(backend.available_permits(), 0);
        drop(p1);
        assert_eq!(backend.available_permits(), 1);
        drop(p2);
    }
}
