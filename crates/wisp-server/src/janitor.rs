//! Background cleanup of expired secrets and orphan blobs, kept apart
//! from the request path. One task per process: each tick runs an expiry
//! sweep followed by a reconciliation pass.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::Error;
use crate::metrics::{self, MetricsSink};
use crate::store::SecretStore;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic janitor. `start` is idempotent; `stop` signals the loop and
/// waits for it to exit.
pub struct Janitor {
    store: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<dyn MetricsSink>>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Janitor {
    /// Construct without starting. A zero interval falls back to one
    /// minute.
    pub fn new(
        store: Arc<dyn SecretStore>,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<dyn MetricsSink>>,
        interval: Duration,
    ) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            clock,
            metrics,
            interval,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Launch the background loop. A second call is a no-op.
    pub fn start(&self) {
        let mut guard = self.handle.lock().expect("janitor handle poisoned");
        if guard.is_some() {
            return;
        }

        let store = self.store.clone();
        let clock = self.clock.clone();
        let metrics = self.metrics.clone();
        let interval = self.interval;
        let mut shutdown = self.shutdown.subscribe();

        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_cycle(store.as_ref(), clock.as_ref(), metrics.as_deref());
                    }
                    _ = shutdown.changed() => {
                        info!("janitor stop");
                        break;
                    }
                }
            }
        }));
    }

    /// Signal the loop to exit and wait until it has. Safe to call when
    /// never started.
    pub async fn stop(&self) {
        let handle = self
            .handle
            .lock()
            .expect("janitor handle poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = self.shutdown.send(true);
            let _ = handle.await;
        }
    }
}

/// One expiry + reconciliation cycle. Errors are logged and the loop
/// continues; a broken cycle must never kill the janitor.
fn run_cycle(store: &dyn SecretStore, clock: &dyn Clock, metrics: Option<&dyn MetricsSink>) {
    let started = Instant::now();

    let deleted = match store.delete_expired(clock.now()) {
        Ok(n) => n,
        Err(e) => {
            log_cycle_error("expire", &e);
            0
        }
    };
    if let Err(e) = store.reconcile() {
        log_cycle_error("reconcile", &e);
    }

    let elapsed_ms = started.elapsed().as_millis() as i64;
    if let Some(m) = metrics {
        m.inc(metrics::SECRETS_EXPIRED_DELETED, deleted as i64);
        m.observe(metrics::JANITOR_DELETED_PER_CYCLE, deleted as i64);
        m.inc(metrics::JANITOR_CYCLES, 1);
        m.observe(metrics::JANITOR_CYCLE_DURATION_MS, elapsed_ms);
    }
    info!(deleted, ms = elapsed_ms, "janitor cycle complete");
}

fn log_cycle_error(phase: &'static str, err: &Error) {
    error!(phase, error = %err, "janitor cycle error");
}
