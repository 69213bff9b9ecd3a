//! Minimal metrics plumbing: a sink trait the service and janitor emit to,
//! and an in-memory aggregator. Only monotonic counters and simple
//! (count, sum, min, max) summaries are supported; anything fancier belongs
//! to an external emitter.

use std::collections::HashMap;
use std::sync::Mutex;

// Counter names used by the application.
pub const SECRETS_CREATED: &str = "secrets_created_total";
pub const SECRETS_CONSUMED: &str = "secrets_consumed_total";
pub const SECRETS_EXPIRED_DELETED: &str = "secrets_expired_deleted_total";
pub const JANITOR_CYCLES: &str = "janitor_cycles_total";

// Summary names.
pub const JANITOR_DELETED_PER_CYCLE: &str = "janitor_deleted_per_cycle";
pub const JANITOR_CYCLE_DURATION_MS: &str = "janitor_cycle_duration_ms";

/// Sink for metric events. A `None` sink anywhere in the stack is valid
/// and means no emission.
pub trait MetricsSink: Send + Sync {
    fn inc(&self, name: &str, delta: i64);
    fn observe(&self, name: &str, value: i64);
}

/// Aggregated view of an observed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub count: i64,
    pub sum: i64,
    pub min: i64,
    pub max: i64,
}

/// Thread-safe in-memory aggregation of counters and summaries.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, i64>>,
    summaries: Mutex<HashMap<String, Summary>>,
}

impl InMemoryMetrics {
    /// Current value of a counter; zero if never incremented.
    pub fn counter(&self, name: &str) -> i64 {
        self.counters
            .lock()
            .expect("metrics counters poisoned")
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Aggregate of an observed series; `None` if never observed.
    pub fn summary(&self, name: &str) -> Option<Summary> {
        self.summaries
            .lock()
            .expect("metrics summaries poisoned")
            .get(name)
            .copied()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn inc(&self, name: &str, delta: i64) {
        let mut counters = self.counters.lock().expect("metrics counters poisoned");
        *counters.entry(name.to_owned()).or_insert(0) += delta;
    }

    fn observe(&self, name: &str, value: i64) {
        let mut summaries = self.summaries.lock().expect("metrics summaries poisoned");
        summaries
            .entry(name.to_owned())
            .and_modify(|s| {
                s.count += 1;
                s.sum += value;
                s.min = s.min.min(value);
                s.max = s.max.max(value);
            })
            .or_insert(Summary {
                count: 1,
                sum: value,
                min: value,
                max: value,
            });
    }
}
