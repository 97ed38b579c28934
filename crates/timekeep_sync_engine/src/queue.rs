//! Trigger queue and runner loop.
//!
//! The runner owns the graph drivers and is the only place a run executes,
//! which makes at-most-one-run-in-flight structural. Triggers arriving while
//! a run is in flight are drained and coalesced into a single follow-up run
//! once the current one finishes; a forced trigger wins over normal ones.

use crate::error::SyncError;
use crate::graph::SyncGraphs;
use crate::orchestrator::SyncPhase;
use std::collections::BTreeMap;
use std::time::Duration;
use timekeep_core::EntityKind;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Capacity of the trigger channel. Overflow is harmless: a full queue
/// already guarantees a follow-up run.
pub(crate) const TRIGGER_QUEUE_DEPTH: usize = 8;

/// A request for a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Incremental run from the current watermarks.
    Normal,
    /// Full run: watermarks are cleared first.
    Force,
}

impl SyncTrigger {
    /// Coalesces two queued triggers into one run request.
    pub fn combine(self, other: SyncTrigger) -> SyncTrigger {
        if self == SyncTrigger::Force || other == SyncTrigger::Force {
            SyncTrigger::Force
        } else {
            SyncTrigger::Normal
        }
    }
}

/// The runner loop for one session.
pub(crate) struct SyncQueue {
    triggers: mpsc::Receiver<SyncTrigger>,
    graphs: SyncGraphs,
    progress: watch::Sender<SyncPhase>,
    busy: watch::Sender<bool>,
    frozen: watch::Receiver<bool>,
    periodic: Option<Duration>,
}

impl SyncQueue {
    pub(crate) fn new(
        triggers: mpsc::Receiver<SyncTrigger>,
        graphs: SyncGraphs,
        progress: watch::Sender<SyncPhase>,
        busy: watch::Sender<bool>,
        frozen: watch::Receiver<bool>,
        periodic: Option<Duration>,
    ) -> Self {
        Self {
            triggers,
            graphs,
            progress,
            busy,
            frozen,
            periodic,
        }
    }

    /// Runs until the trigger channel closes or the session freezes.
    pub(crate) async fn run(mut self) {
        let mut timer = self.periodic.map(|period| {
            // interval() would tick immediately; the first periodic run
            // should wait a full period.
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });

        loop {
            let received = match timer.as_mut() {
                Some(timer) => tokio::select! {
                    received = self.triggers.recv() => received,
                    _ = timer.tick() => Some(SyncTrigger::Normal),
                },
                None => self.triggers.recv().await,
            };
            let Some(mut trigger) = received else { break };

            // Drain the burst that accumulated while we were waiting or
            // running.
            while let Ok(next) = self.triggers.try_recv() {
                trigger = trigger.combine(next);
            }

            if *self.frozen.borrow() {
                debug!("trigger dropped after freeze");
                break;
            }

            self.busy.send_replace(true);
            self.run_once(trigger).await;
            self.busy.send_replace(false);

            if *self.frozen.borrow() {
                break;
            }
        }
        self.busy.send_replace(false);
        debug!("sync runner stopped");
    }

    /// One full run: Pull → Push → CleanUp → Sleep.
    ///
    /// A fatal error halts the run in `Failed`; a retryable one ends the run
    /// early in `Sleep` so the next trigger retries; `Frozen` ends it
    /// quietly.
    async fn run_once(&self, trigger: SyncTrigger) {
        let force = trigger == SyncTrigger::Force;
        let mut errors: BTreeMap<EntityKind, Vec<String>> = BTreeMap::new();
        debug!(?trigger, "sync run starting");

        self.progress.send_replace(SyncPhase::Pull);
        match self.graphs.pull_graph(force).await {
            Ok(summary) => {
                for scope in summary.errors {
                    errors.entry(scope.kind).or_default().push(scope.message);
                }
            }
            Err(err) => return self.halt(err, errors),
        }

        self.progress.send_replace(SyncPhase::Push);
        match self.graphs.push_graph().await {
            Ok(summary) => {
                for (id, message) in &summary.transient {
                    warn!(%id, %message, "push deferred to next run");
                }
            }
            Err(err) => return self.halt(err, errors),
        }

        self.progress.send_replace(SyncPhase::CleanUp);
        if let Err(err) = self.graphs.cleanup_graph().await {
            return self.halt(err, errors);
        }

        self.progress.send_replace(SyncPhase::Sleep);
    }

    fn halt(&self, err: SyncError, errors: BTreeMap<EntityKind, Vec<String>>) {
        match err {
            SyncError::Frozen => {
                self.progress.send_replace(SyncPhase::Sleep);
            }
            err if err.is_fatal() => {
                warn!(error = %err, "sync run halted");
                self.progress.send_replace(SyncPhase::Failed {
                    reason: err.to_string(),
                    errors,
                });
            }
            err => {
                warn!(error = %err, "sync run failed; retrying on next trigger");
                self.progress.send_replace(SyncPhase::Sleep);
            }
        }
    }
}
