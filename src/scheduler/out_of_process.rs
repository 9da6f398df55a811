// =============================================================================
// Out-of-process scheduler backend (C6)
// =============================================================================
//
// Emulates handing jobs to an external broker process over a channel: firing
// a job means sending its id down an mpsc channel a broker-side consumer
// drains, rather than calling the handler in this process directly. There is
// no pause primitive on a channel, so pause/resume is implemented as
// remove-then-re-add: pausing tells the broker to forget the job entirely,
// resuming hands it the full job row again so it relearns the schedule from
// scratch, matching how an external scheduler (e.g. a cron daemon) would be
// told to forget and later re-learn a job.
// =============================================================================

use tokio::sync::mpsc;

use super::job::ScheduledJob;

const BROKER_QUEUE_DEPTH: usize = 1024;

/// One message handed to the external broker over the channel.
#[derive(Debug, Clone)]
pub enum BrokerMessage {
    /// A due occurrence to execute, with the fire time it was due at so the
    /// broker-side consumer can report misfire-grace violations.
    Dispatch { job_id: String, due_at: i64 },
    /// Forget this job entirely. Sent on pause.
    Remove { job_id: String },
    /// (Re-)learn this job's full schedule from scratch. Sent on resume.
    Add { job: ScheduledJob },
}

pub struct OutOfProcessBackend {
    tx: mpsc::Sender<BrokerMessage>,
}

pub struct OutOfProcessConsumer {
    pub rx: mpsc::Receiver<BrokerMessage>,
}

impl OutOfProcessBackend {
    pub fn new() -> (Self, OutOfProcessConsumer) {
        let (tx, rx) = mpsc::channel(BROKER_QUEUE_DEPTH);
        (Self { tx }, OutOfProcessConsumer { rx })
    }

    /// Hand a due job to the broker. Returns `false` if the broker's queue
    /// is full or the consumer has gone away; the caller treats that as a
    /// transient dispatch failure and retries on the next fire scan.
    pub fn dispatch(&self, job: &ScheduledJob, due_at: i64) -> bool {
        self.tx.try_send(BrokerMessage::Dispatch { job_id: job.id.clone(), due_at }).is_ok()
    }

    /// Pause as remove: tell the broker to forget the job so it stops
    /// producing occurrences until a matching `resume`.
    pub fn pause(&self, job_id: &str) {
        let _ = self.tx.try_send(BrokerMessage::Remove { job_id: job_id.to_string() });
    }

    /// Resume as add: hand the broker the full job row again so it relearns
    /// the schedule unconditionally, rather than trying to reconcile
    /// whatever partial state it may have retained from before the pause.
    pub fn resume(&self, job: &ScheduledJob) {
        let _ = self.tx.try_send(BrokerMessage::Add { job: job.clone() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::trigger::{IntervalSpec, Trigger};

    fn job(id: &str) -> ScheduledJob {
        ScheduledJob::new(id, "collect_data", Trigger::Interval(IntervalSpec { minutes: 1, ..Default::default() }), serde_json::json!({}), 0)
    }

    #[tokio::test]
    async fn dispatch_delivers_to_consumer() {
        let (backend, mut consumer) = OutOfProcessBackend::new();
        assert!(backend.dispatch(&job("j1"), 1000));
        match consumer.rx.recv().await.unwrap() {
            BrokerMessage::Dispatch { job_id, due_at } => {
                assert_eq!(job_id, "j1");
                assert_eq!(due_at, 1000);
            }
            other => panic!("expected Dispatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_fails_once_consumer_dropped() {
        let (backend, consumer) = OutOfProcessBackend::new();
        drop(consumer);
        assert!(!backend.dispatch(&job("j1"), 1000));
    }

    #[tokio::test]
    async fn pause_sends_remove() {
        let (backend, mut consumer) = OutOfProcessBackend::new();
        backend.pause("j1");
        match consumer.rx.recv().await.unwrap() {
            BrokerMessage::Remove { job_id } => assert_eq!(job_id, "j1"),
            other => panic!("expected Remove, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_sends_add_with_full_job() {
        let (backend, mut consumer) = OutOfProcessBackend::new();
        backend.resume(&job("j1"));
        match consumer.rx.recv().await.unwrap() {
            BrokerMessage::Add { job } => assert_eq!(job.id, "j1"),
            other => panic!("expected Add, got {other:?}"),
        }
    }
}
