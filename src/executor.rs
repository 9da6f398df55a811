// =============================================================================
// Job executor (C7)
// =============================================================================
//
// Thin layer over the scheduler core: a struct holding its collaborators,
// one public entry point (`dispatch`), private per-path helpers. Resolves
// `handler_name` to a callable, wraps the call in a `JobExecutionLog` row,
// and enforces `max_instances` via a per-job `tokio::sync::Semaphore`
// instead of the scheduler's coarser worker-pool-wide one.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::execution_log::{ExecutionLogStore, JobExecutionLog};
use crate::scheduler::{HandlerOutcome, JobHandler};

/// Progress reported by a handler invocation; optional, fire-and-forget.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub job_id: String,
    pub handler_name: String,
    pub message: String,
}

struct JobSlots {
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl JobSlots {
    fn new() -> Self {
        Self {
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, job_id: &str, max_instances: u32) -> Arc<Semaphore> {
        let mut slots = self.semaphores.lock();
        slots
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(max_instances.max(1) as usize)))
            .clone()
    }

    fn forget(&self, job_id: &str) {
        self.semaphores.lock().remove(job_id);
    }
}

pub struct JobExecutor {
    handlers: tokio::sync::RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    slots: JobSlots,
    logs: Arc<ExecutionLogStore>,
    progress: Option<mpsc::Sender<ProgressEvent>>,
}

impl JobExecutor {
    pub fn new(logs: Arc<ExecutionLogStore>, progress: Option<mpsc::Sender<ProgressEvent>>) -> Self {
        Self {
            handlers: tokio::sync::RwLock::new(HashMap::new()),
            slots: JobSlots::new(),
            logs,
            progress,
        }
    }

    pub async fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.write().await.insert(name.into(), handler);
    }

    pub async fn has_handler(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }

    pub fn forget_job(&self, job_id: &str) {
        self.slots.forget(job_id);
    }

    /// Resolve `handler_name`, acquire a per-job instance slot, run the
    /// handler, and always write exactly one `JobExecutionLog` row.
    pub async fn dispatch(
        &self,
        job_id: &str,
        handler_name: &str,
        max_instances: u32,
        args: serde_json::Value,
    ) -> CoreResult<HandlerOutcome> {
        let handler = self.handlers.read().await.get(handler_name).cloned();
        let Some(handler) = handler else {
            return Err(CoreError::NotFound(format!("no handler registered for {handler_name}")));
        };

        let semaphore = self.slots.get(job_id, max_instances);
        let _permit = match semaphore.try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(job_id, handler_name, max_instances, "max_instances reached, skipping this fire");
                return Err(CoreError::Conflict(format!("job {job_id} already at max_instances={max_instances}")));
            }
        };

        if let Some(tx) = &self.progress {
            let _ = tx.try_send(ProgressEvent {
                job_id: job_id.to_string(),
                handler_name: handler_name.to_string(),
                message: "started".to_string(),
            });
        }

        let started_at = Utc::now().timestamp_millis();
        let mut log = JobExecutionLog::start(handler_name, "scheduled_job", None, started_at);
        let result = handler.run(args).await;
        let finished_at = Utc::now().timestamp_millis();

        match &result {
            Ok(outcome) => log.complete(finished_at, outcome.records, outcome.metadata.clone()),
            Err(e) => log.fail(finished_at, e.to_string()),
        }
        self.logs.append(log);

        if let Some(tx) = &self.progress {
            let _ = tx.try_send(ProgressEvent {
                job_id: job_id.to_string(),
                handler_name: handler_name.to_string(),
                message: "finished".to_string(),
            });
        }

        result
    }
}
