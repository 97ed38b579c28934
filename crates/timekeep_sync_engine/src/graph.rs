//! Graph drivers.
//!
//! Each driver sequences the states of one phase. Independent per-type
//! states fan out on a [`JoinSet`] bounded by a semaphore; dependent stages
//! run strictly in order. The freeze flag is consulted between stages: a
//! state that has started always runs to completion, but no further stage
//! begins once the flag is set.

use crate::api::{EntityEndpoint, SyncApi};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::states::{
    DeleteInaccessibleEntitiesState, DeleteOldTimeEntriesState, MarkWorkspacesInaccessibleState,
    PersistUserState, PullEntityState, PullWorkspacesState, PushEntityState, PushUserState,
    ResetSinceParamsState, RestoreWorkspaceAccessState, TrySetDefaultWorkspaceState,
};
use crate::transition::{CleanupSummary, PullSummary, PushSummary, Transition};
use std::sync::Arc;
use timekeep_core::{DataSource, LocalStore, Syncable, TimeService, WorkspaceId};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::debug;

/// Owns the collaborators of all three sync graphs and drives them.
pub struct SyncGraphs {
    store: Arc<LocalStore>,
    api: SyncApi,
    config: SyncConfig,
    time_service: Arc<dyn TimeService>,
    frozen: watch::Receiver<bool>,
}

impl SyncGraphs {
    /// Creates the drivers for one session.
    pub fn new(
        store: Arc<LocalStore>,
        api: SyncApi,
        config: SyncConfig,
        time_service: Arc<dyn TimeService>,
        frozen: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            api,
            config,
            time_service,
            frozen,
        }
    }

    fn checkpoint(&self) -> SyncResult<()> {
        if *self.frozen.borrow() {
            Err(SyncError::Frozen)
        } else {
            Ok(())
        }
    }

    /// Runs the pull graph.
    ///
    /// `full` additionally clears every watermark first, so the run fetches
    /// the complete remote history.
    pub async fn pull_graph(&self, full: bool) -> SyncResult<PullSummary> {
        if full {
            self.checkpoint()?;
            ResetSinceParamsState::new(self.store.since.clone())
                .start()
                .await?;
        }

        self.checkpoint()?;
        let changes = PullWorkspacesState::new(
            self.api.workspaces.clone(),
            self.store.workspaces.clone(),
        )
        .start()
        .await?
        .into_done()
        .unwrap_or_default();

        self.checkpoint()?;
        MarkWorkspacesInaccessibleState::new(self.store.clone())
            .start(changes.absent)
            .await?;

        self.checkpoint()?;
        RestoreWorkspaceAccessState::new(self.store.clone())
            .start(changes.regained)
            .await?;

        let workspaces: Arc<Vec<WorkspaceId>> = Arc::new(
            self.store
                .workspaces
                .get_all(|_| true, false)
                .iter()
                .map(|ws| ws.workspace_id())
                .collect(),
        );

        self.checkpoint()?;
        let limiter = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks: JoinSet<SyncResult<Transition<PullSummary>>> = JoinSet::new();
        self.spawn_pull(&mut tasks, &limiter, &workspaces, &self.api.time_entries, &self.store.time_entries);
        self.spawn_pull(&mut tasks, &limiter, &workspaces, &self.api.projects, &self.store.projects);
        self.spawn_pull(&mut tasks, &limiter, &workspaces, &self.api.clients, &self.store.clients);
        self.spawn_pull(&mut tasks, &limiter, &workspaces, &self.api.tags, &self.store.tags);
        self.spawn_pull(&mut tasks, &limiter, &workspaces, &self.api.tasks, &self.store.tasks);

        let mut summary = PullSummary::default();
        drain(&mut tasks, |part| summary.absorb(part)).await?;

        self.checkpoint()?;
        if let Some(part) = PersistUserState::new(self.api.user.clone(), self.store.user.clone())
            .start()
            .await?
            .into_done()
        {
            summary.absorb(part);
        }

        self.checkpoint()?;
        TrySetDefaultWorkspaceState::new(self.store.user.clone(), self.store.workspaces.clone())
            .start()
            .await?;

        debug!(
            fetched = summary.fetched,
            applied = summary.applied,
            errors = summary.errors.len(),
            "pull graph finished"
        );
        Ok(summary)
    }

    fn spawn_pull<T: Syncable>(
        &self,
        tasks: &mut JoinSet<SyncResult<Transition<PullSummary>>>,
        limiter: &Arc<Semaphore>,
        workspaces: &Arc<Vec<WorkspaceId>>,
        endpoint: &Arc<dyn EntityEndpoint<T>>,
        source: &Arc<DataSource<T>>,
    ) {
        let limiter = limiter.clone();
        let workspaces = workspaces.clone();
        let state = PullEntityState::new(
            endpoint.clone(),
            source.clone(),
            self.store.since.clone(),
            self.time_service.clone(),
        );
        tasks.spawn(async move {
            let _permit = acquire(&limiter).await?;
            state.start(&workspaces).await
        });
    }

    /// Runs the push graph: every dirty entity plus the user record.
    pub async fn push_graph(&self) -> SyncResult<PushSummary> {
        self.checkpoint()?;
        let limiter = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks: JoinSet<SyncResult<Transition<PushSummary>>> = JoinSet::new();
        self.spawn_push(&mut tasks, &limiter, &self.api.time_entries, &self.store.time_entries);
        self.spawn_push(&mut tasks, &limiter, &self.api.projects, &self.store.projects);
        self.spawn_push(&mut tasks, &limiter, &self.api.clients, &self.store.clients);
        self.spawn_push(&mut tasks, &limiter, &self.api.tags, &self.store.tags);
        self.spawn_push(&mut tasks, &limiter, &self.api.tasks, &self.store.tasks);

        let mut summary = PushSummary::default();
        drain(&mut tasks, |part| summary.absorb(part)).await?;

        self.checkpoint()?;
        if let Some(part) = PushUserState::new(self.api.user.clone(), self.store.user.clone())
            .start()
            .await?
            .into_done()
        {
            summary.absorb(part);
        }

        debug!(
            pushed = summary.pushed,
            rejected = summary.rejected,
            retry = summary.transient.len(),
            "push graph finished"
        );
        Ok(summary)
    }

    fn spawn_push<T: Syncable>(
        &self,
        tasks: &mut JoinSet<SyncResult<Transition<PushSummary>>>,
        limiter: &Arc<Semaphore>,
        endpoint: &Arc<dyn EntityEndpoint<T>>,
        source: &Arc<DataSource<T>>,
    ) {
        let limiter = limiter.clone();
        let state = PushEntityState::new(endpoint.clone(), source.clone());
        tasks.spawn(async move {
            let _permit = acquire(&limiter).await?;
            state.start().await
        });
    }

    /// Runs the cleanup graph: inaccessible-entity removal for every type
    /// plus the time entry retention purge.
    pub async fn cleanup_graph(&self) -> SyncResult<CleanupSummary> {
        self.checkpoint()?;
        let mut summary = CleanupSummary::default();

        let mut absorb = |transition: Transition<CleanupSummary>| {
            if let Some(part) = transition.into_done() {
                summary.deleted += part.deleted;
            }
        };

        absorb(
            DeleteInaccessibleEntitiesState::for_time_entries(self.store.time_entries.clone())
                .start()
                .await?,
        );
        absorb(DeleteInaccessibleEntitiesState::new(self.store.projects.clone()).start().await?);
        absorb(DeleteInaccessibleEntitiesState::new(self.store.clients.clone()).start().await?);
        absorb(DeleteInaccessibleEntitiesState::new(self.store.tags.clone()).start().await?);
        absorb(DeleteInaccessibleEntitiesState::new(self.store.tasks.clone()).start().await?);
        absorb(DeleteInaccessibleEntitiesState::new(self.store.workspaces.clone()).start().await?);

        self.checkpoint()?;
        absorb(
            DeleteOldTimeEntriesState::new(
                self.store.time_entries.clone(),
                self.time_service.clone(),
                self.config.clone(),
            )
            .start()
            .await?,
        );

        debug!(deleted = summary.deleted, "cleanup graph finished");
        Ok(summary)
    }
}

async fn acquire(limiter: &Arc<Semaphore>) -> SyncResult<tokio::sync::OwnedSemaphorePermit> {
    limiter
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| SyncError::Transient("concurrency limiter closed".into()))
}

/// Joins every spawned state, feeding `Done` payloads to `absorb`. The first
/// error wins; remaining tasks still run to completion so no state is left
/// mid-flight.
async fn drain<P: Send + 'static>(
    tasks: &mut JoinSet<SyncResult<Transition<P>>>,
    mut absorb: impl FnMut(P),
) -> SyncResult<()> {
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(transition)) => {
                if let Some(part) = transition.into_done() {
                    absorb(part);
                }
            }
            Ok(Err(err)) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    first_error = Some(SyncError::Transient(format!(
                        "sync state task failed: {join_err}"
                    )));
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
