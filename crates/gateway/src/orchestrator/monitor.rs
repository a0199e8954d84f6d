//! Keepalive tracking and stall detection.

use std::{
    sync::{Arc, Mutex, OnceLock},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::events::{EventEmitter, PipelineEvent, TimeoutKind, now};

/// How often the monitor checks for forward progress.
const CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Timestamp of the pipeline's last forward progress.
///
/// Every task touches this when it moves a chunk, emits a frame, or
/// finishes a hook, so a slow but healthy client never looks stalled while
/// a stuck policy does.
#[derive(Clone)]
pub(crate) struct Keepalive {
    last: Arc<Mutex<Instant>>,
}

impl Keepalive {
    pub(crate) fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record forward progress.
    pub(crate) fn touch(&self) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Time since the last forward progress.
    pub(crate) fn idle(&self) -> Duration {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).elapsed()
    }
}

/// Background task enforcing the stall threshold and the overall deadline.
///
/// On expiry it records which timer fired, emits a `policy.timeout` event,
/// and cancels every task of the request through the shared token.
pub(crate) struct TimeoutMonitor {
    pub(crate) keepalive: Keepalive,
    pub(crate) stall_threshold: Duration,
    pub(crate) overall_deadline: Duration,
    pub(crate) cancellation: CancellationToken,
    pub(crate) timeout_kind: Arc<OnceLock<TimeoutKind>>,
    pub(crate) emitter: EventEmitter,
    pub(crate) transaction_id: String,
}

impl TimeoutMonitor {
    pub(crate) async fn run(self) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let kind = if self.keepalive.idle() >= self.stall_threshold {
                Some(TimeoutKind::Stall)
            } else if started.elapsed() >= self.overall_deadline {
                Some(TimeoutKind::Deadline)
            } else {
                None
            };

            if let Some(kind) = kind {
                log::warn!(
                    "transaction {} timed out ({kind:?}); cancelling pipeline",
                    self.transaction_id
                );

                let _ = self.timeout_kind.set(kind);
                self.emitter.emit(PipelineEvent::PolicyTimeout {
                    transaction_id: self.transaction_id.clone(),
                    timestamp: now(),
                    kind,
                });
                self.cancellation.cancel();
                return;
            }
        }
    }
}
