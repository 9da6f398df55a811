// =============================================================================
// Execution log (C11)
// =============================================================================
//
// Append-only record of every job run, indexed by (job_name, started_at).
// Persisted the same way the scheduler's job registry is — one atomically
// written JSON document — and pruned by the same retention job that prunes
// candles and indicators.
// =============================================================================

use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{atomic_write_json, read_json_or_default};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub job_type: String,
    pub symbol: Option<String>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub duration_s: Option<f64>,
    pub status: JobStatus,
    pub records_collected: Option<u64>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl JobExecutionLog {
    pub fn start(job_name: impl Into<String>, job_type: impl Into<String>, symbol: Option<String>, started_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            job_type: job_type.into(),
            symbol,
            started_at,
            finished_at: None,
            duration_s: None,
            status: JobStatus::Running,
            records_collected: None,
            error: None,
            metadata: None,
        }
    }

    pub fn complete(&mut self, finished_at: i64, records_collected: u64, metadata: Option<serde_json::Value>) {
        self.finished_at = Some(finished_at);
        self.duration_s = Some((finished_at - self.started_at) as f64 / 1000.0);
        self.status = JobStatus::Success;
        self.records_collected = Some(records_collected);
        self.metadata = metadata;
    }

    pub fn fail(&mut self, finished_at: i64, error: impl Into<String>) {
        self.finished_at = Some(finished_at);
        self.duration_s = Some((finished_at - self.started_at) as f64 / 1000.0);
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub running: u64,
    pub success_rate: f64,
    pub avg_duration_s: f64,
    pub total_records: u64,
}

#[derive(Default, Serialize, Deserialize)]
struct LogDocument {
    rows: Vec<JobExecutionLog>,
}

pub struct ExecutionLogStore {
    path: Option<PathBuf>,
    rows: RwLock<Vec<JobExecutionLog>>,
}

impl ExecutionLogStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        let rows = path
            .as_ref()
            .map(|p| read_json_or_default::<LogDocument>(p).rows)
            .unwrap_or_default();
        Self {
            path,
            rows: RwLock::new(rows),
        }
    }

    pub fn append(&self, log: JobExecutionLog) {
        let mut rows = self.rows.write();
        rows.push(log);
        self.persist(&rows);
    }

    fn persist(&self, rows: &[JobExecutionLog]) {
        if let Some(path) = &self.path {
            let _ = atomic_write_json(path, &LogDocument { rows: rows.to_vec() });
        }
    }

    pub fn recent(&self, job_name: Option<&str>, limit: usize) -> Vec<JobExecutionLog> {
        let rows = self.rows.read();
        let mut filtered: Vec<JobExecutionLog> = rows
            .iter()
            .filter(|r| job_name.map_or(true, |n| r.job_name == n))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        filtered.truncate(limit);
        filtered
    }

    /// Aggregate stats over the most recent `window` rows for `job_name`
    /// (or all jobs when `None`).
    pub fn stats(&self, job_name: Option<&str>, window: usize) -> ExecutionStats {
        let rows = self.recent(job_name, window);
        let total = rows.len() as u64;
        let success = rows.iter().filter(|r| r.status == JobStatus::Success).count() as u64;
        let failed = rows.iter().filter(|r| r.status == JobStatus::Failed).count() as u64;
        let running = rows.iter().filter(|r| r.status == JobStatus::Running).count() as u64;
        let durations: Vec<f64> = rows.iter().filter_map(|r| r.duration_s).collect();
        let avg_duration_s = if durations.is_empty() { 0.0 } else { durations.iter().sum::<f64>() / durations.len() as f64 };
        let total_records: u64 = rows.iter().filter_map(|r| r.records_collected).sum();
        let success_rate = if total == 0 { 0.0 } else { success as f64 / total as f64 };
        ExecutionStats {
            total,
            success,
            failed,
            running,
            success_rate,
            avg_duration_s,
            total_records,
        }
    }

    /// Drop rows started before `before` (ms since epoch). Returns the count
    /// removed.
    pub fn delete_before(&self, before: i64) -> usize {
        let mut rows = self.rows.write();
        let before_len = rows.len();
        rows.retain(|r| r.started_at >= before);
        let removed = before_len - rows.len();
        if removed > 0 {
            self.persist(&rows);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_complete_produces_success_row() {
        let mut log = JobExecutionLog::start("collect_data", "collector", Some("BTCUSDT".into()), 1_000);
        assert_eq!(log.status, JobStatus::Running);
        log.complete(3_000, 42, None);
        assert_eq!(log.status, JobStatus::Success);
        assert_eq!(log.records_collected, Some(42));
        assert_eq!(log.duration_s, Some(2.0));
    }

    #[test]
    fn start_then_fail_records_error() {
        let mut log = JobExecutionLog::start("collect_data", "collector", None, 1_000);
        log.fail(1_500, "exchange timeout");
        assert_eq!(log.status, JobStatus::Failed);
        assert_eq!(log.error.as_deref(), Some("exchange timeout"));
    }

    #[test]
    fn every_invocation_produces_exactly_one_row() {
        let store = ExecutionLogStore::new(None);
        for i in 0..5 {
            let mut log = JobExecutionLog::start("collect_data", "collector", None, i);
            log.complete(i + 1, 1, None);
            store.append(log);
        }
        assert_eq!(store.recent(Some("collect_data"), 100).len(), 5);
    }

    #[test]
    fn stats_compute_success_rate_and_totals() {
        let store = ExecutionLogStore::new(None);
        let mut ok = JobExecutionLog::start("j", "t", None, 0);
        ok.complete(1000, 10, None);
        store.append(ok);
        let mut bad = JobExecutionLog::start("j", "t", None, 0);
        bad.fail(500, "boom");
        store.append(bad);

        let stats = store.stats(Some("j"), 100);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.total_records, 10);
    }

    #[test]
    fn recent_filters_by_job_name_and_limit() {
        let store = ExecutionLogStore::new(None);
        for name in ["a", "b", "a"] {
            let mut log = JobExecutionLog::start(name, "t", None, 0);
            log.complete(1, 1, None);
            store.append(log);
        }
        assert_eq!(store.recent(Some("a"), 10).len(), 2);
        assert_eq!(store.recent(None, 1).len(), 1);
    }

    #[test]
    fn delete_before_prunes_old_rows() {
        let store = ExecutionLogStore::new(None);
        let mut old = JobExecutionLog::start("j", "t", None, 1_000);
        old.complete(1_100, 1, None);
        store.append(old);
        let mut recent = JobExecutionLog::start("j", "t", None, 5_000);
        recent.complete(5_100, 1, None);
        store.append(recent);

        let removed = store.delete_before(3_000);
        assert_eq!(removed, 1);
        assert_eq!(store.recent(None, 10).len(), 1);
    }
}
