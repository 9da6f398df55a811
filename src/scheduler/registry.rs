// =============================================================================
// Job registry (C6) — durable job table
// =============================================================================
//
// Uses the same atomic tmp+rename persistence idiom as the rest of the
// runtime (`config::atomic_write_json`) for the job table, so jobs survive a
// process restart. Reusing an id replaces the existing job atomically.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::{atomic_write_json, read_json_or_default};

use super::job::{JobState, ScheduledJob};

#[derive(Default, Serialize, Deserialize)]
struct RegistryDocument {
    jobs: HashMap<String, ScheduledJob>,
}

pub struct JobRegistry {
    path: Option<PathBuf>,
    jobs: RwLock<HashMap<String, ScheduledJob>>,
}

impl JobRegistry {
    pub fn new(path: Option<PathBuf>) -> Self {
        let jobs = path
            .as_ref()
            .map(|p| read_json_or_default::<RegistryDocument>(p).jobs)
            .unwrap_or_default();
        Self {
            path,
            jobs: RwLock::new(jobs),
        }
    }

    fn persist(&self, jobs: &HashMap<String, ScheduledJob>) {
        if let Some(path) = &self.path {
            let _ = atomic_write_json(path, &RegistryDocument { jobs: jobs.clone() });
        }
    }

    /// Insert or atomically replace a job with the same id.
    pub fn upsert(&self, job: ScheduledJob) {
        let mut jobs = self.jobs.write();
        jobs.insert(job.id.clone(), job);
        self.persist(&jobs);
    }

    pub fn remove(&self, id: &str) -> Option<ScheduledJob> {
        let mut jobs = self.jobs.write();
        let removed = jobs.remove(id);
        if removed.is_some() {
            self.persist(&jobs);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<ScheduledJob> {
        self.jobs.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<ScheduledJob> {
        self.jobs.read().values().cloned().collect()
    }

    /// Mutate a job in place via `f`, persisting the result. No-op if the
    /// job does not exist.
    pub fn update<F: FnOnce(&mut ScheduledJob)>(&self, id: &str, f: F) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(id) {
            f(job);
            self.persist(&jobs);
        }
    }

    pub fn set_state(&self, id: &str, state: JobState) {
        self.update(id, |job| job.state = state);
    }

    /// Every job due to fire at or before `now`, in no particular order.
    pub fn due_jobs(&self, now: i64) -> Vec<ScheduledJob> {
        self.jobs
            .read()
            .values()
            .filter(|j| j.state == JobState::Scheduled && j.next_fire_at <= now)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::trigger::{IntervalSpec, Trigger};

    fn job(id: &str, next_fire_at: i64) -> ScheduledJob {
        let mut j = ScheduledJob::new(id, "collect_data", Trigger::Interval(IntervalSpec { minutes: 1, ..Default::default() }), serde_json::json!({}), 0);
        j.next_fire_at = next_fire_at;
        j
    }

    #[test]
    fn reusing_an_id_replaces_atomically() {
        let reg = JobRegistry::new(None);
        reg.upsert(job("j1", 1000));
        reg.upsert(job("j1", 5000));
        assert_eq!(reg.list().len(), 1);
        assert_eq!(reg.get("j1").unwrap().next_fire_at, 5000);
    }

    #[test]
    fn due_jobs_respects_next_fire_at_and_state() {
        let reg = JobRegistry::new(None);
        reg.upsert(job("past", 100));
        reg.upsert(job("future", 999_999));
        reg.set_state("future", JobState::Paused);
        let mut paused_due = job("paused-due", 50);
        paused_due.state = JobState::Paused;
        reg.upsert(paused_due);

        let due = reg.due_jobs(500);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "past");
    }

    #[test]
    fn remove_then_get_returns_none() {
        let reg = JobRegistry::new(None);
        reg.upsert(job("j1", 1000));
        assert!(reg.remove("j1").is_some());
        assert!(reg.get("j1").is_none());
    }

    #[test]
    fn update_mutates_in_place() {
        let reg = JobRegistry::new(None);
        reg.upsert(job("j1", 1000));
        reg.update("j1", |j| j.consecutive_failures = 3);
        assert_eq!(reg.get("j1").unwrap().consecutive_failures, 3);
    }

    #[test]
    fn persists_and_reloads_across_registry_instances() {
        let path = std::env::temp_dir().join(format!("aurora-core-sched-test-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let reg = JobRegistry::new(Some(path.clone()));
            reg.upsert(job("durable-job", 42));
        }
        let reg2 = JobRegistry::new(Some(path.clone()));
        assert_eq!(reg2.get("durable-job").unwrap().next_fire_at, 42);
        let _ = std::fs::remove_file(&path);
    }
}
