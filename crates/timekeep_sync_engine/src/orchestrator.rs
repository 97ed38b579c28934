//! The session-scoped sync orchestrator.
//!
//! One orchestrator exists per authenticated session. It owns the runner
//! task, hands out progress subscriptions, accepts triggers, and implements
//! the freeze handshake for logout: after [`SyncOrchestrator::freeze`]
//! resolves, no state is mid-flight and none will start, so the local store
//! can be cleared without racing the engine.

use crate::api::SyncApi;
use crate::config::SyncConfig;
use crate::graph::SyncGraphs;
use crate::queue::{SyncQueue, SyncTrigger, TRIGGER_QUEUE_DEPTH};
use std::collections::BTreeMap;
use std::sync::Arc;
use timekeep_core::{EntityKind, LocalStore, TimeService};
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Externally observable phase of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    /// No run in flight.
    Sleep,
    /// Pull graph running.
    Pull,
    /// Push graph running.
    Push,
    /// Cleanup graph running.
    CleanUp,
    /// The last run halted on a fatal error. Sleeps until re-triggered
    /// after the underlying condition is fixed (e.g. re-authentication).
    Failed {
        /// The fatal error that halted the run.
        reason: String,
        /// Retryable per-type failures collected before the halt.
        errors: BTreeMap<EntityKind, Vec<String>>,
    },
}

/// Coordinates sync runs for one session.
pub struct SyncOrchestrator {
    trigger_tx: mpsc::Sender<SyncTrigger>,
    progress_rx: watch::Receiver<SyncPhase>,
    freeze_tx: watch::Sender<bool>,
    busy_rx: watch::Receiver<bool>,
}

impl SyncOrchestrator {
    /// Creates the orchestrator and spawns its runner task. Must be called
    /// from within a tokio runtime.
    pub fn new(
        store: Arc<LocalStore>,
        api: SyncApi,
        config: SyncConfig,
        time_service: Arc<dyn TimeService>,
    ) -> Self {
        let (freeze_tx, freeze_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel(SyncPhase::Sleep);
        let (busy_tx, busy_rx) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_DEPTH);

        let periodic = config.periodic_interval;
        let graphs = SyncGraphs::new(store, api, config, time_service, freeze_rx.clone());
        let queue = SyncQueue::new(
            trigger_rx,
            graphs,
            progress_tx,
            busy_tx,
            freeze_rx,
            periodic,
        );
        tokio::spawn(queue.run());

        Self {
            trigger_tx,
            progress_rx,
            freeze_tx,
            busy_rx,
        }
    }

    /// Subscribes to phase changes. The receiver replays the latest phase
    /// immediately.
    pub fn progress(&self) -> watch::Receiver<SyncPhase> {
        self.progress_rx.clone()
    }

    /// Snapshot of the current phase.
    pub fn state(&self) -> SyncPhase {
        self.progress_rx.borrow().clone()
    }

    /// True once [`freeze`](Self::freeze) has been requested.
    pub fn is_frozen(&self) -> bool {
        *self.freeze_tx.borrow()
    }

    /// Requests an incremental sync run. Coalesced with other pending
    /// triggers while a run is in flight; ignored after freeze.
    pub fn start(&self) {
        self.trigger(SyncTrigger::Normal);
    }

    /// Requests a full sync run: watermarks are cleared and the complete
    /// remote history is fetched. Wins over pending incremental triggers.
    pub fn force_full_sync(&self) {
        self.trigger(SyncTrigger::Force);
    }

    /// Connectivity came back; worth an incremental run.
    pub fn connectivity_regained(&self) {
        self.trigger(SyncTrigger::Normal);
    }

    fn trigger(&self, trigger: SyncTrigger) {
        if self.is_frozen() {
            return;
        }
        // A full queue already guarantees a follow-up run.
        let _ = self.trigger_tx.try_send(trigger);
    }

    /// Halts the engine for logout. Resolves only once no state is
    /// mid-flight; an in-progress state completes, no next state starts.
    /// Terminal: subsequent triggers are ignored.
    pub async fn freeze(&self) {
        self.freeze_tx.send_replace(true);
        info!("sync freeze requested");
        let mut busy = self.busy_rx.clone();
        // A closed channel means the runner already stopped.
        let _ = busy.wait_for(|in_flight| !*in_flight).await;
        info!("sync frozen");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ApiResult, EntityEndpoint, MockApi};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use timekeep_core::{
        EntityId, ManualTimeService, Project, SyncMetadata, User, Workspace, WorkspaceId,
    };
    use tokio::sync::Notify;

    fn fixture() -> (Arc<LocalStore>, MockApi, SyncOrchestrator) {
        let time = Arc::new(ManualTimeService::new(Utc::now()));
        let store = Arc::new(LocalStore::new(time.clone()));
        let api = MockApi::new();
        api.workspaces.set_workspaces(vec![Workspace {
            id: EntityId::new(1),
            name: "Personal".into(),
            admin: true,
            meta: SyncMetadata::in_sync(Utc::now()),
        }]);
        api.user.set_user(User {
            id: EntityId::new(666),
            email: "valid@email.com".into(),
            fullname: "Full Name".into(),
            default_workspace_id: Some(WorkspaceId::new(1)),
            meta: SyncMetadata::in_sync(Utc::now()),
        });
        let orchestrator =
            SyncOrchestrator::new(store.clone(), api.sync_api(), SyncConfig::new(), time);
        (store, api, orchestrator)
    }

    async fn wait_until_settled(progress: &mut watch::Receiver<SyncPhase>) -> SyncPhase {
        loop {
            progress.changed().await.unwrap();
            let phase = progress.borrow_and_update().clone();
            match phase {
                SyncPhase::Sleep | SyncPhase::Failed { .. } => return phase,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn start_runs_to_sleep() {
        let (store, api, orchestrator) = fixture();
        let mut progress = orchestrator.progress();
        progress.borrow_and_update();

        orchestrator.start();
        let settled = wait_until_settled(&mut progress).await;

        assert_eq!(settled, SyncPhase::Sleep);
        assert_eq!(store.workspaces.len(), 1);
        assert_eq!(api.projects.fetch_calls().len(), 1);
    }

    #[tokio::test]
    async fn fatal_error_lands_in_failed() {
        let (_store, api, orchestrator) = fixture();
        api.projects
            .fail_fetch(WorkspaceId::new(1), ApiError::Unauthorized);
        let mut progress = orchestrator.progress();
        progress.borrow_and_update();

        orchestrator.start();
        let settled = wait_until_settled(&mut progress).await;

        assert!(matches!(settled, SyncPhase::Failed { .. }));
    }

    #[tokio::test]
    async fn transient_error_returns_to_sleep() {
        let (_store, api, orchestrator) = fixture();
        api.workspaces.fail_fetch(ApiError::Transient("503".into()));
        let mut progress = orchestrator.progress();
        progress.borrow_and_update();

        orchestrator.start();
        let settled = wait_until_settled(&mut progress).await;

        assert_eq!(settled, SyncPhase::Sleep);
    }

    #[tokio::test]
    async fn frozen_orchestrator_ignores_triggers() {
        let (_store, api, orchestrator) = fixture();

        orchestrator.freeze().await;
        assert!(orchestrator.is_frozen());

        orchestrator.start();
        orchestrator.force_full_sync();
        tokio::task::yield_now().await;

        assert!(api.projects.fetch_calls().is_empty());
        assert_eq!(orchestrator.state(), SyncPhase::Sleep);
    }

    #[tokio::test]
    async fn freeze_after_run_resolves_immediately() {
        let (store, _api, orchestrator) = fixture();
        let mut progress = orchestrator.progress();
        progress.borrow_and_update();

        orchestrator.start();
        wait_until_settled(&mut progress).await;

        orchestrator.freeze().await;
        // Logout path: once frozen the store can be cleared safely.
        store.clear();
        assert!(store.workspaces.is_empty());
    }

    /// Endpoint whose fetch parks until released, signalling on entry.
    struct ParkedEndpoint {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl EntityEndpoint<Project> for ParkedEndpoint {
        async fn fetch_changed_since(
            &self,
            _workspace_id: WorkspaceId,
            _since: Option<DateTime<Utc>>,
        ) -> ApiResult<Vec<Project>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![])
        }

        async fn push(&self, entity: &Project) -> ApiResult<Project> {
            Ok(entity.clone())
        }
    }

    #[tokio::test]
    async fn freeze_waits_for_the_inflight_state_to_finish() {
        let time = Arc::new(ManualTimeService::new(Utc::now()));
        let store = Arc::new(LocalStore::new(time.clone()));
        let api = MockApi::new();
        api.workspaces.set_workspaces(vec![Workspace {
            id: EntityId::new(1),
            name: "Personal".into(),
            admin: true,
            meta: SyncMetadata::in_sync(Utc::now()),
        }]);

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut sync_api = api.sync_api();
        sync_api.projects = Arc::new(ParkedEndpoint {
            entered: entered.clone(),
            release: release.clone(),
        });
        let orchestrator =
            SyncOrchestrator::new(store.clone(), sync_api, SyncConfig::new(), time);

        orchestrator.start();
        entered.notified().await;

        // The project pull is parked mid-flight, so the handshake must not
        // resolve yet.
        let freeze = orchestrator.freeze();
        tokio::pin!(freeze);
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(50),
            freeze.as_mut()
        )
        .await
        .is_err());

        release.notify_one();
        freeze.await;

        // The parked state ran to completion, then the run halted at the
        // next checkpoint: the user stage never started.
        assert!(store.user.get().is_err());
        assert_eq!(orchestrator.state(), SyncPhase::Sleep);
    }

    #[tokio::test]
    async fn trigger_burst_coalesces_into_one_run() {
        let (_store, api, orchestrator) = fixture();
        let mut progress = orchestrator.progress();
        progress.borrow_and_update();

        // The runner is not scheduled until we await, so the whole burst is
        // queued up front and drained into a single run.
        for _ in 0..20 {
            orchestrator.start();
        }

        let settled = wait_until_settled(&mut progress).await;
        assert_eq!(settled, SyncPhase::Sleep);
        assert_eq!(api.projects.fetch_calls().len(), 1);

        // Nothing left queued.
        tokio::task::yield_now().await;
        assert_eq!(api.projects.fetch_calls().len(), 1);
    }

    #[tokio::test]
    async fn periodic_interval_triggers_runs() {
        let time = Arc::new(ManualTimeService::new(Utc::now()));
        let store = Arc::new(LocalStore::new(time.clone()));
        let api = MockApi::new();
        api.workspaces.set_workspaces(vec![Workspace {
            id: EntityId::new(1),
            name: "Personal".into(),
            admin: true,
            meta: SyncMetadata::in_sync(Utc::now()),
        }]);
        api.user.set_user(User {
            id: EntityId::new(666),
            email: "valid@email.com".into(),
            fullname: "Full Name".into(),
            default_workspace_id: Some(WorkspaceId::new(1)),
            meta: SyncMetadata::in_sync(Utc::now()),
        });
        let config =
            SyncConfig::new().with_periodic_interval(std::time::Duration::from_millis(10));
        let _orchestrator = SyncOrchestrator::new(store, api.sync_api(), config, time);

        // No explicit trigger; the timer alone drives runs.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!api.projects.fetch_calls().is_empty());
    }
}
