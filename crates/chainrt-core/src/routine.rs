//! Keyed circuit breaker + periodic loop supervisor (§4.A). A `RoutineGroup`
//! runs at most one active loop per key, protects each with its own
//! [`Breaker`](crate::breaker::Breaker), and lets external callers force an
//! off-cycle tick via [`RoutineGroup::force_update`].
//!
//! A `parking_lot::Mutex` guards in-memory hot state; loop workers spawn
//! onto a `tokio::task::JoinSet` so shutdown can abort them cleanly.

use crate::breaker::Breaker;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type BoxedOp = Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

struct ActiveLoop {
    breaker: Arc<Breaker>,
    force: Arc<Notify>,
    cancel: CancellationToken,
}

/// Runs periodic operations keyed by an identifier, each behind its own
/// breaker. Duplicate `start_loop` calls for the same key are no-ops —
/// loop identity is the key (§4.A "Parameter persistence").
#[derive(Default)]
pub struct RoutineGroup {
    active: Mutex<HashMap<String, ActiveLoop>>,
    tasks: Mutex<JoinSet<()>>,
}

impl RoutineGroup {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Returns `true` if a loop for `key` was started, `false` if one was
    /// already active (existing breaker parameters are kept as-is).
    pub fn start_loop<F, Fut>(
        &self,
        key: impl Into<String>,
        threshold: u32,
        reset_timeout: Duration,
        interval: Duration,
        op: F,
    ) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let key = key.into();
        let mut active = self.active.lock();
        if active.contains_key(&key) {
            return false;
        }

        let breaker = Arc::new(Breaker::new(threshold, reset_timeout));
        let force = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let boxed: BoxedOp = Box::new(move || Box::pin(op()));
        self.spawn_worker(key.clone(), breaker.clone(), force.clone(), cancel.clone(), interval, boxed);

        active.insert(
            key,
            ActiveLoop {
                breaker,
                force,
                cancel,
            },
        );
        true
    }

    /// Wakes the loop for `key` immediately instead of waiting for the next
    /// tick. A no-op if no loop is active for that key.
    pub fn force_update(&self, key: &str) {
        if let Some(entry) = self.active.lock().get(key) {
            entry.force.notify_one();
        }
    }

    /// Current breaker state for `key`, if a loop is active.
    pub fn breaker_state(&self, key: &str) -> Option<crate::breaker::BreakerState> {
        self.active.lock().get(key).map(|e| e.breaker.state())
    }

    /// Cancels the loop for `key` and removes it from the active set so a
    /// later `start_loop` with the same key can run again.
    pub fn stop_loop(&self, key: &str) {
        if let Some(entry) = self.active.lock().remove(key) {
            entry.cancel.cancel();
        }
    }

    /// Cancels every active loop and awaits their tasks.
    pub async fn shutdown(&self) {
        let keys: Vec<String> = {
            let mut active = self.active.lock();
            let keys = active.keys().cloned().collect();
            for entry in active.values() {
                entry.cancel.cancel();
            }
            active.clear();
            keys
        };
        tracing::debug!(count = keys.len(), "routine group shutting down");
        let mut tasks = self.tasks.lock();
        tasks.shutdown().await;
    }

    fn spawn_worker(
        &self,
        key: String,
        breaker: Arc<Breaker>,
        force: Arc<Notify>,
        cancel: CancellationToken,
        interval: Duration,
        op: BoxedOp,
    ) {
        let mut tasks = self.tasks.lock();
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(%key, "routine loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {}
                    _ = force.notified() => {}
                }

                if !breaker.allow() {
                    continue;
                }

                let outcome = std::panic::AssertUnwindSafe(op())
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(Ok(())) => breaker.record_success(),
                    Ok(Err(err)) => {
                        tracing::error!(%key, error = %err, "routine op failed");
                        breaker.record_failure();
                    }
                    Err(panic) => {
                        let msg = panic_message(&panic);
                        tracing::error!(%key, panic = %msg, "routine op panicked");
                        breaker.record_failure();
                    }
                }
            }
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Small helper trait so `AssertUnwindSafe<Fut>` gets a `.catch_unwind()`
/// method without pulling in `futures::FutureExt` for this one call site.
trait CatchUnwind: Future + Sized {
    fn catch_unwind(self) -> futures::future::CatchUnwind<Self>
    where
        Self: futures::future::FutureExt + std::panic::UnwindSafe,
    {
        futures::future::FutureExt::catch_unwind(self)
    }
}

impl<F: Future> CatchUnwind for AssertUnwindSafe<F> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn duplicate_start_loop_is_a_noop() {
        let group = RoutineGroup::new();
        let count = Arc::new(AtomicU32::new(0));

        let c1 = count.clone();
        let started_first = group.start_loop("k", 3, Duration::from_millis(50), Duration::from_millis(10), move || {
            let c = c1.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert!(started_first);

        let started_second = group.start_loop("k", 99, Duration::from_secs(1), Duration::from_secs(1), || async { Ok(()) });
        assert!(!started_second, "second start_loop for the same key must be a no-op");

        group.shutdown().await;
    }

    #[tokio::test]
    async fn failing_op_is_absorbed_by_the_breaker() {
        let group = RoutineGroup::new();
        let started = group.start_loop(
            "flaky",
            2,
            Duration::from_secs(10),
            Duration::from_millis(5),
            || async { Err("boom".to_string()) },
        );
        assert!(started);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(group.breaker_state("flaky"), Some(crate::breaker::BreakerState::Open));
        group.shutdown().await;
    }

    #[tokio::test]
    async fn force_update_ticks_immediately() {
        let group = RoutineGroup::new();
        let count = Arc::new(AtomicU32::new(0));
        let c1 = count.clone();
        group.start_loop("forced", 5, Duration::from_secs(10), Duration::from_secs(3600), move || {
            let c = c1.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        group.force_update("forced");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
        group.shutdown().await;
    }
}
