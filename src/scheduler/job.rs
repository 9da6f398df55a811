// =============================================================================
// Scheduled job record (C6)
// =============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

use super::trigger::Trigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Scheduled,
    Paused,
    Error,
    /// No handler with this name is registered; the job is kept (never
    /// dropped) so a later `register_handler` can recover it.
    Orphaned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub trigger: Trigger,
    pub handler_name: String,
    pub handler_args: serde_json::Value,
    pub next_fire_at: i64,
    pub max_instances: u32,
    pub coalesce: bool,
    pub misfire_grace_s: u64,
    pub state: JobState,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub failures_in_window: Vec<i64>,
}

impl ScheduledJob {
    pub fn new(id: impl Into<String>, handler_name: impl Into<String>, trigger: Trigger, handler_args: serde_json::Value, now: i64) -> Self {
        let next_fire_at = trigger.first_fire(now).unwrap_or(now);
        Self {
            id: id.into(),
            trigger,
            handler_name: handler_name.into(),
            handler_args,
            next_fire_at,
            max_instances: 3,
            coalesce: true,
            misfire_grace_s: 60,
            state: JobState::Scheduled,
            consecutive_failures: 0,
            failures_in_window: Vec::new(),
        }
    }

    pub fn with_max_instances(mut self, n: u32) -> Self {
        self.max_instances = n;
        self
    }

    pub fn with_misfire_grace_s(mut self, s: u64) -> Self {
        self.misfire_grace_s = s;
        self
    }
}

/// A `(status, records, metadata)` outcome returned by every handler
/// invocation, used to populate the execution log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub records: u64,
    pub metadata: Option<serde_json::Value>,
}

impl HandlerOutcome {
    pub fn new(records: u64) -> Self {
        Self { records, metadata: None }
    }

    pub fn with_metadata(records: u64, metadata: serde_json::Value) -> Self {
        Self { records, metadata: Some(metadata) }
    }
}

/// A named handler registered with the scheduler before `start()`. Handler
/// names, not function references, are persisted on the job row.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, args: serde_json::Value) -> CoreResult<HandlerOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::trigger::IntervalSpec;

    #[test]
    fn new_job_computes_first_fire_from_trigger() {
        let trigger = Trigger::Interval(IntervalSpec { days: 0, hours: 0, minutes: 1, seconds: 0 });
        let job = ScheduledJob::new("job-1", "collect_data", trigger, serde_json::json!({}), 1_000);
        assert_eq!(job.next_fire_at, 61_000);
        assert_eq!(job.state, JobState::Scheduled);
        assert_eq!(job.max_instances, 3);
        assert_eq!(job.misfire_grace_s, 60);
    }

    #[test]
    fn builder_overrides_defaults() {
        let trigger = Trigger::OneShot { at: 10_000 };
        let job = ScheduledJob::new("job-2", "h", trigger, serde_json::json!({}), 0)
            .with_max_instances(1)
            .with_misfire_grace_s(5);
        assert_eq!(job.max_instances, 1);
        assert_eq!(job.misfire_grace_s, 5);
    }
}
