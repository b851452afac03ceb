//! Periodic background tasks
//!
//! Interval-driven tasks with explicit stop signaling. Stopping waits for
//! an in-flight tick to finish, which keeps shutdown ordering deterministic.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace};

/// Handle to a named periodic background task.
///
/// The tick callback returns `true` to keep running; returning `false`
/// stops the task from within, used when the owning component is gone.
pub struct PeriodicTask {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn a task invoking `tick` once per `period`.
    ///
    /// The first tick fires one full period after spawning.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first interval tick completes immediately; skip it
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = interval.tick() => {
                        trace!(task = name, "tick");
                        if !tick().await {
                            debug!(task = name, "Tick requested stop");
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "Periodic task stopped");
        });
        Self { name, stop, handle }
    }

    /// Task name, for logging
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task to stop and wait for it to finish.
    ///
    /// An in-flight tick always runs to completion before this returns.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
