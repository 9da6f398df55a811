// =============================================================================
// Scheduler core (C6)
// =============================================================================
//
// Owns the job registry, the handler registry, and a pluggable dispatch
// backend. The fire loop is a single periodic scan: every tick, pull every
// due job from the registry, check its error budget and misfire grace, then
// hand it to the backend (in-process semaphore pool, or out-of-process
// broker channel) for execution. Execution results feed back into the job's
// `consecutive_failures`/`failures_in_window` bookkeeping and, on tripping
// the error budget, flip its state to `Error`.
//
// No cron-scheduler crate is pulled in; this follows the general shape used
// elsewhere for long-lived services (an `Arc`-shared core, a background
// tokio task loop, state mutated behind `parking_lot` locks, `tracing` at
// every state transition).
// =============================================================================

pub mod in_process;
pub mod job;
pub mod out_of_process;
pub mod registry;
pub mod trigger;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SchedulerBackendKind;
use crate::error::{CoreError, CoreResult};
use crate::execution_log::ExecutionLogStore;
use crate::executor::JobExecutor;

pub use in_process::InProcessBackend;
pub use job::{HandlerOutcome, JobHandler, JobState, ScheduledJob};
pub use out_of_process::{BrokerMessage, OutOfProcessBackend, OutOfProcessConsumer};
pub use registry::JobRegistry;
pub use trigger::{CronSpec, IntervalSpec, Trigger};

const FIRE_SCAN_INTERVAL: Duration = Duration::from_millis(1000);

enum Backend {
    InProcess(InProcessBackend),
    OutOfProcess(OutOfProcessBackend),
}

pub struct Scheduler {
    registry: Arc<JobRegistry>,
    executor: Arc<JobExecutor>,
    backend: Backend,
    error_budget_failures: u32,
    error_budget_window_s: i64,
    loop_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        kind: SchedulerBackendKind,
        worker_pool_size: usize,
        registry: Arc<JobRegistry>,
        logs: Arc<ExecutionLogStore>,
        error_budget_failures: u32,
        error_budget_window_s: i64,
    ) -> (Arc<Self>, Option<OutOfProcessConsumer>) {
        let _ = worker_pool_size; // reserved for a future worker-pool-wide cap; per-job caps live in JobExecutor
        let (backend, consumer) = match kind {
            SchedulerBackendKind::InProcess => (Backend::InProcess(InProcessBackend::new(worker_pool_size)), None),
            SchedulerBackendKind::OutOfProcess => {
                let (b, c) = OutOfProcessBackend::new();
                (Backend::OutOfProcess(b), Some(c))
            }
        };
        let scheduler = Arc::new(Self {
            registry,
            executor: Arc::new(JobExecutor::new(logs, None)),
            backend,
            error_budget_failures,
            error_budget_window_s,
            loop_handle: parking_lot::Mutex::new(None),
        });
        (scheduler, consumer)
    }

    pub fn executor(&self) -> Arc<JobExecutor> {
        self.executor.clone()
    }

    pub async fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let name = name.into();
        self.executor.register_handler(name.clone(), handler).await;
        // Recover any job previously orphaned for lack of this handler.
        for job in self.registry.list() {
            if job.handler_name == name && job.state == JobState::Orphaned {
                self.registry.set_state(&job.id, JobState::Scheduled);
                info!(job_id = %job.id, handler = %name, "orphaned job recovered by late handler registration");
            }
        }
    }

    pub fn add_job(&self, job: ScheduledJob) {
        info!(job_id = %job.id, handler = %job.handler_name, next_fire_at = job.next_fire_at, "job added");
        self.registry.upsert(job);
    }

    pub fn remove_job(&self, job_id: &str) -> Option<ScheduledJob> {
        self.backend_pause_cleanup(job_id);
        self.executor.forget_job(job_id);
        self.registry.remove(job_id)
    }

    pub fn pause_job(&self, job_id: &str) {
        self.registry.set_state(job_id, JobState::Paused);
        match &self.backend {
            Backend::InProcess(b) => b.pause(job_id),
            Backend::OutOfProcess(b) => b.pause(job_id),
        }
    }

    pub fn resume_job(&self, job_id: &str) {
        self.registry.set_state(job_id, JobState::Scheduled);
        match &self.backend {
            Backend::InProcess(b) => b.resume(job_id),
            Backend::OutOfProcess(b) => {
                // The broker forgot the job entirely on pause; hand it the
                // full row again so it relearns the schedule from scratch.
                if let Some(job) = self.registry.get(job_id) {
                    b.resume(&job);
                }
            }
        }
    }

    fn backend_pause_cleanup(&self, job_id: &str) {
        if let Backend::InProcess(b) = &self.backend {
            b.forget(job_id);
        }
    }

    pub fn get_job(&self, job_id: &str) -> Option<ScheduledJob> {
        self.registry.get(job_id)
    }

    pub fn list_jobs(&self) -> Vec<ScheduledJob> {
        self.registry.list()
    }

    /// Force one immediate execution of `job_id`, ignoring its trigger and
    /// misfire grace entirely. Does not disturb `next_fire_at` — the job's
    /// regular schedule fires again at its usual time regardless of this call.
    pub async fn trigger_now(&self, job_id: &str) -> CoreResult<HandlerOutcome> {
        let job = self.registry.get(job_id).ok_or_else(|| CoreError::NotFound(format!("job {job_id} not found")))?;
        if !self.executor.has_handler(&job.handler_name).await {
            return Err(CoreError::NotFound(format!("no handler registered for {}", job.handler_name)));
        }
        let now = Utc::now().timestamp_millis();
        let result = self.executor.dispatch(&job.id, &job.handler_name, job.max_instances, job.handler_args.clone()).await;
        match &result {
            Ok(_) => self.registry.update(&job.id, |j| j.consecutive_failures = 0),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "manually triggered job failed");
                self.record_failure(&job.id, now);
            }
        }
        result
    }

    /// Run one due-job scan at time `now` (ms since epoch). Public so callers
    /// can drive the loop deterministically in tests instead of waiting on
    /// the background tick.
    pub async fn run_once(&self, now: i64) {
        for job in self.registry.due_jobs(now) {
            self.fire(job, now).await;
        }
    }

    async fn fire(&self, job: ScheduledJob, now: i64) {
        let misfire_deadline = job.next_fire_at + job.misfire_grace_s as i64 * 1000;
        if now > misfire_deadline {
            warn!(job_id = %job.id, next_fire_at = job.next_fire_at, now, "job missed its misfire grace window, rescheduling without running");
            self.reschedule(&job, now);
            return;
        }

        if !self.executor.has_handler(&job.handler_name).await {
            warn!(job_id = %job.id, handler = %job.handler_name, "no handler registered, orphaning job");
            self.registry.set_state(&job.id, JobState::Orphaned);
            return;
        }

        if let Backend::OutOfProcess(b) = &self.backend {
            // Dispatch-only: the broker-side consumer is responsible for
            // actually invoking the handler and reporting completion. We
            // still advance `next_fire_at` here so the fire loop does not
            // redispatch the same occurrence every tick.
            b.dispatch(&job, job.next_fire_at);
            self.reschedule(&job, now);
            return;
        }

        let finished_at_on_failure = Utc::now().timestamp_millis();
        let result = self.executor.dispatch(&job.id, &job.handler_name, job.max_instances, job.handler_args.clone()).await;

        match result {
            Ok(_outcome) => {
                self.registry.update(&job.id, |j| {
                    j.consecutive_failures = 0;
                });
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "scheduled job handler failed");
                self.record_failure(&job.id, finished_at_on_failure);
            }
        }

        self.reschedule(&job, now);
    }

    /// Advance `next_fire_at` past this occurrence. When `job.coalesce` is
    /// true (the default) multiple fires missed while the scheduler was down
    /// collapse into a single catch-up run: the next occurrence is computed
    /// from `now`, skipping straight to the next future fire. When false,
    /// the next occurrence is computed strictly from the occurrence that was
    /// just handled, so a job that missed several intervals fires once per
    /// missed interval on successive scans until it catches up to `now`.
    fn reschedule(&self, job: &ScheduledJob, now: i64) {
        let base = if job.coalesce { job.next_fire_at.max(now - 1) } else { job.next_fire_at };
        match job.trigger.next_fire_after(base) {
            Some(next) => self.registry.update(&job.id, |j| j.next_fire_at = next),
            None => {
                info!(job_id = %job.id, "trigger exhausted, removing job");
                self.registry.remove(&job.id);
            }
        }
    }

    fn record_failure(&self, job_id: &str, at: i64) {
        let window_start = at - self.error_budget_window_s * 1000;
        let failures_count = self.error_budget_failures;
        self.registry.update(job_id, |j| {
            j.consecutive_failures += 1;
            j.failures_in_window.push(at);
            j.failures_in_window.retain(|&t| t >= window_start);
            if j.failures_in_window.len() as u32 >= failures_count {
                j.state = JobState::Error;
            }
        });
    }

    /// Start the background fire loop. Idempotent: calling twice replaces
    /// the previous loop handle, aborting it.
    pub fn start(self: &Arc<Self>) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FIRE_SCAN_INTERVAL);
            loop {
                ticker.tick().await;
                let now = Utc::now().timestamp_millis();
                scheduler.run_once(now).await;
            }
        });
        if let Some(old) = self.loop_handle.lock().replace(handle) {
            old.abort();
        }
    }

    /// Stop accepting new fires and wait (if `wait` is true) for the current
    /// tick to finish before returning. `next_fire_at` is already durable on
    /// every job via the registry's atomic writes, so no extra persistence
    /// step is needed here.
    pub async fn shutdown(&self, wait: bool) {
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            if wait {
                let _ = handle.await;
            }
        }
    }
}

/// Register the five default housekeeping jobs, if they are
/// not already present in the registry (e.g. from a prior run).
pub fn ensure_default_jobs(scheduler: &Scheduler, now: i64) {
    let defaults: &[(&str, Trigger, serde_json::Value)] = &[
        ("health_check", Trigger::Interval(IntervalSpec { minutes: 1, ..Default::default() }), serde_json::json!({})),
        ("refresh_symbols", Trigger::Interval(IntervalSpec { hours: 1, ..Default::default() }), serde_json::json!({})),
        ("cleanup_old_data", Trigger::Cron(CronSpec { minute: Some(vec![0]), hour: Some(vec![3]), dow: None, dom: None, month: None }), serde_json::json!({})),
    ];
    for (id, trigger, args) in defaults {
        if scheduler.get_job(id).is_none() {
            let job = ScheduledJob::new(*id, *id, trigger.clone(), args.clone(), now);
            scheduler.add_job(job);
        }
    }
}

pub fn map_save_error(e: anyhow::Error) -> CoreError {
    CoreError::Internal(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn run(&self, _args: serde_json::Value) -> CoreResult<HandlerOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CoreError::Internal("boom".into()))
            } else {
                Ok(HandlerOutcome::new(1))
            }
        }
    }

    fn in_process_scheduler() -> Arc<Scheduler> {
        let registry = Arc::new(JobRegistry::new(None));
        let logs = Arc::new(ExecutionLogStore::new(None));
        let (scheduler, _consumer) = Scheduler::new(SchedulerBackendKind::InProcess, 4, registry, logs, 5, 600);
        scheduler
    }

    #[tokio::test]
    async fn due_job_fires_and_reschedules() {
        let scheduler = in_process_scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register_handler("tick", Arc::new(CountingHandler { calls: calls.clone(), fail: false })).await;
        let job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0);
        scheduler.add_job(job);

        scheduler.run_once(1_000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let job = scheduler.get_job("j1").unwrap();
        assert!(job.next_fire_at > 1_000);
        assert_eq!(job.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn missing_handler_orphans_job_without_running() {
        let scheduler = in_process_scheduler();
        let job = ScheduledJob::new("j1", "unregistered", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0);
        scheduler.add_job(job);
        scheduler.run_once(1_000).await;
        assert_eq!(scheduler.get_job("j1").unwrap().state, JobState::Orphaned);
    }

    #[tokio::test]
    async fn late_handler_registration_recovers_orphaned_job() {
        let scheduler = in_process_scheduler();
        let job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0);
        scheduler.add_job(job);
        scheduler.run_once(1_000).await;
        assert_eq!(scheduler.get_job("j1").unwrap().state, JobState::Orphaned);

        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register_handler("tick", Arc::new(CountingHandler { calls, fail: false })).await;
        assert_eq!(scheduler.get_job("j1").unwrap().state, JobState::Scheduled);
    }

    #[tokio::test]
    async fn five_failures_in_window_trips_error_budget() {
        let scheduler = in_process_scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register_handler("tick", Arc::new(CountingHandler { calls: calls.clone(), fail: true })).await;
        let job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0);
        scheduler.add_job(job);

        let mut now = 1_000i64;
        for _ in 0..5 {
            scheduler.run_once(now).await;
            now = scheduler.get_job("j1").unwrap().next_fire_at;
        }
        assert_eq!(scheduler.get_job("j1").unwrap().state, JobState::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn paused_job_is_not_fired() {
        let scheduler = in_process_scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register_handler("tick", Arc::new(CountingHandler { calls: calls.clone(), fail: false })).await;
        let job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0);
        scheduler.add_job(job);
        scheduler.pause_job("j1");
        scheduler.run_once(1_000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn misfire_past_grace_window_reschedules_without_running() {
        let scheduler = in_process_scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register_handler("tick", Arc::new(CountingHandler { calls: calls.clone(), fail: false })).await;
        let mut job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0).with_misfire_grace_s(5);
        job.next_fire_at = 0;
        scheduler.add_job(job);

        // Far past the misfire grace window (5s).
        scheduler.run_once(60_000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(scheduler.get_job("j1").unwrap().next_fire_at > 0);
    }

    #[tokio::test]
    async fn trigger_now_runs_immediately_without_touching_schedule() {
        let scheduler = in_process_scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register_handler("tick", Arc::new(CountingHandler { calls: calls.clone(), fail: false })).await;
        let job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { hours: 1, ..Default::default() }), serde_json::json!({}), 0);
        scheduler.add_job(job);
        let before = scheduler.get_job("j1").unwrap().next_fire_at;

        let outcome = scheduler.trigger_now("j1").await.unwrap();
        assert_eq!(outcome.records, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.get_job("j1").unwrap().next_fire_at, before);
    }

    #[tokio::test]
    async fn trigger_now_unknown_job_is_not_found() {
        let scheduler = in_process_scheduler();
        let result = scheduler.trigger_now("nope").await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn out_of_process_backend_dispatches_instead_of_running_inline() {
        let registry = Arc::new(JobRegistry::new(None));
        let logs = Arc::new(ExecutionLogStore::new(None));
        let (scheduler, consumer) = Scheduler::new(SchedulerBackendKind::OutOfProcess, 4, registry, logs, 5, 600);
        let mut consumer = consumer.unwrap();
        let job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0);
        scheduler.add_job(job);
        scheduler.run_once(1_000).await;
        match consumer.rx.try_recv().unwrap() {
            BrokerMessage::Dispatch { job_id, .. } => assert_eq!(job_id, "j1"),
            other => panic!("expected Dispatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_process_pause_then_resume_sends_remove_then_add() {
        let registry = Arc::new(JobRegistry::new(None));
        let logs = Arc::new(ExecutionLogStore::new(None));
        let (scheduler, consumer) = Scheduler::new(SchedulerBackendKind::OutOfProcess, 4, registry, logs, 5, 600);
        let mut consumer = consumer.unwrap();
        let job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0);
        scheduler.add_job(job);

        scheduler.pause_job("j1");
        match consumer.rx.try_recv().unwrap() {
            BrokerMessage::Remove { job_id } => assert_eq!(job_id, "j1"),
            other => panic!("expected Remove, got {other:?}"),
        }

        scheduler.resume_job("j1");
        match consumer.rx.try_recv().unwrap() {
            BrokerMessage::Add { job } => assert_eq!(job.id, "j1"),
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn coalesce_true_collapses_missed_fires_into_one_catch_up() {
        let scheduler = in_process_scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register_handler("tick", Arc::new(CountingHandler { calls: calls.clone(), fail: false })).await;
        let mut job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0).with_misfire_grace_s(1_000_000);
        job.next_fire_at = 0;
        scheduler.add_job(job);

        // 10 one-second intervals have elapsed since next_fire_at=0.
        scheduler.run_once(10_000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Rescheduled relative to now, not to the missed occurrences.
        assert_eq!(scheduler.get_job("j1").unwrap().next_fire_at, 10_999);
    }

    #[tokio::test]
    async fn coalesce_false_fires_once_per_missed_interval() {
        let scheduler = in_process_scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register_handler("tick", Arc::new(CountingHandler { calls: calls.clone(), fail: false })).await;
        let mut job = ScheduledJob::new("j1", "tick", Trigger::Interval(IntervalSpec { seconds: 1, ..Default::default() }), serde_json::json!({}), 0).with_misfire_grace_s(1_000_000);
        job.next_fire_at = 0;
        job.coalesce = false;
        scheduler.add_job(job);

        // A single scan only advances one interval at a time when not
        // coalescing, so catching up 10 missed seconds takes 10 scans.
        for _ in 0..10 {
            scheduler.run_once(10_000).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(scheduler.get_job("j1").unwrap().next_fire_at, 10_000);
    }
}
