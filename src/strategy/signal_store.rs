// =============================================================================
// Signal store (C8) — durable append-only signal log
// =============================================================================
//
// Mirrors `execution_log.rs::ExecutionLogStore`: an unbounded in-memory
// `Vec`, persisted as one atomically-written JSON document, queried by
// most-recent-first slices instead of a fixed ring.
// =============================================================================

use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::{atomic_write_json, read_json_or_default};
use crate::signal::Signal;

#[derive(Default, Serialize, Deserialize)]
struct SignalDocument {
    rows: Vec<Signal>,
}

pub struct SignalStore {
    path: Option<PathBuf>,
    rows: RwLock<Vec<Signal>>,
}

impl SignalStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        let rows = path.as_ref().map(|p| read_json_or_default::<SignalDocument>(p).rows).unwrap_or_default();
        Self {
            path,
            rows: RwLock::new(rows),
        }
    }

    pub fn append(&self, signal: Signal) {
        let mut rows = self.rows.write();
        rows.push(signal);
        self.persist(&rows);
    }

    fn persist(&self, rows: &[Signal]) {
        if let Some(path) = &self.path {
            let _ = atomic_write_json(path, &SignalDocument { rows: rows.to_vec() });
        }
    }

    pub fn recent(&self, strategy_id: Option<&str>, limit: usize) -> Vec<Signal> {
        let rows = self.rows.read();
        let mut filtered: Vec<Signal> = rows.iter().filter(|r| strategy_id.map_or(true, |id| r.strategy_id == id)).cloned().collect();
        filtered.sort_by(|a, b| b.ts.cmp(&a.ts));
        filtered.truncate(limit);
        filtered
    }

    pub fn delete_before(&self, before: i64) -> usize {
        let mut rows = self.rows.write();
        let before_len = rows.len();
        rows.retain(|r| r.ts >= before);
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
    use crate::signal::SignalAction;
    use rust_decimal_macros::dec;

    fn signal(strategy_id: &str, ts: i64) -> Signal {
        Signal::new(strategy_id, ts, "BTCUSDT", SignalAction::Buy, 0.5, 0.5, dec!(100), None, serde_json::json!({}), "test")
    }

    #[test]
    fn recent_filters_by_strategy_and_orders_newest_first() {
        let store = SignalStore::new(None);
        store.append(signal("s1", 1000));
        store.append(signal("s2", 2000));
        store.append(signal("s1", 3000));

        let s1_rows = store.recent(Some("s1"), 10);
        assert_eq!(s1_rows.len(), 2);
        assert_eq!(s1_rows[0].ts, 3000);
    }

    #[test]
    fn delete_before_prunes_old_rows() {
        let store = SignalStore::new(None);
        store.append(signal("s1", 1000));
        store.append(signal("s1", 5000));
        let removed = store.delete_before(3000);
        assert_eq!(removed, 1);
        assert_eq!(store.recent(None, 10).len(), 1);
    }
}
