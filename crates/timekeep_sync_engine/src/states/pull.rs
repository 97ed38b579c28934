//! Pull graph states.
//!
//! Pull order per run: (force only) reset since-params → workspace listing →
//! mark absent workspaces inaccessible → per-type incremental pulls →
//! persist user → try-set-default-workspace. The graph driver owns the
//! sequencing; each state performs one atomic step and emits one transition.

use crate::api::{ApiError, EntityEndpoint, UserEndpoint, WorkspacesEndpoint};
use crate::error::{SyncError, SyncResult};
use crate::transition::{PullSummary, ScopeError, Transition};
use std::collections::HashSet;
use std::sync::Arc;
use timekeep_core::{
    ConflictOutcome, DataSource, EntityKind, LocalStore, SinceParameters, Syncable, TimeService,
    UserDataSource, Workspace, WorkspaceId,
};
use tracing::{debug, info, warn};

/// Clears every pull watermark so the rest of the pull graph fetches the
/// complete remote history. Runs only for a forced full sync, and completes
/// before any dependent pull starts.
pub struct ResetSinceParamsState {
    since: Arc<SinceParameters>,
}

impl ResetSinceParamsState {
    /// Creates the state.
    pub fn new(since: Arc<SinceParameters>) -> Self {
        Self { since }
    }

    /// Resets the watermarks.
    pub async fn start(&self) -> SyncResult<Transition<()>> {
        self.since.reset();
        info!("since parameters reset; next pulls fetch full history");
        Ok(Transition::Done(()))
    }
}

/// Membership changes detected by comparing the workspace listing against
/// the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceChanges {
    /// Locally known workspaces the server no longer returns.
    pub absent: Vec<WorkspaceId>,
    /// Previously inaccessible workspaces the server returns again.
    pub regained: Vec<WorkspaceId>,
}

/// Fetches the full workspace listing, merges it into the local store, and
/// reports which locally known workspaces changed membership: no longer
/// returned, or returned again after a revocation.
pub struct PullWorkspacesState {
    endpoint: Arc<dyn WorkspacesEndpoint>,
    workspaces: Arc<DataSource<Workspace>>,
}

impl PullWorkspacesState {
    /// Creates the state.
    pub fn new(
        endpoint: Arc<dyn WorkspacesEndpoint>,
        workspaces: Arc<DataSource<Workspace>>,
    ) -> Self {
        Self {
            endpoint,
            workspaces,
        }
    }

    /// Pulls the listing. The payload is the membership delta.
    pub async fn start(&self) -> SyncResult<Transition<WorkspaceChanges>> {
        let known: Vec<WorkspaceId> = self
            .workspaces
            .get_all(|_| true, false)
            .iter()
            .map(|ws| ws.workspace_id())
            .collect();
        let flagged: Vec<WorkspaceId> = self
            .workspaces
            .get_all(|ws| ws.is_inaccessible(), true)
            .iter()
            .map(|ws| ws.workspace_id())
            .collect();

        let listing = self.endpoint.fetch_all().await.map_err(SyncError::from)?;
        let returned: HashSet<WorkspaceId> =
            listing.iter().map(|ws| ws.workspace_id()).collect();

        for workspace in listing {
            self.workspaces.update_with_conflict_resolution(workspace);
        }

        let changes = WorkspaceChanges {
            absent: known
                .into_iter()
                .filter(|id| !returned.contains(id))
                .collect(),
            regained: flagged
                .into_iter()
                .filter(|id| returned.contains(id))
                .collect(),
        };
        debug!(
            absent = changes.absent.len(),
            regained = changes.regained.len(),
            "workspace listing merged"
        );
        Ok(Transition::Done(changes))
    }
}

/// Marks absent workspaces, and every entity scoped to them, inaccessible.
///
/// Nothing is deleted here. The state always finishes every workspace before
/// emitting `Done` so that default-workspace selection sees a consistent
/// accessible set.
pub struct MarkWorkspacesInaccessibleState {
    store: Arc<LocalStore>,
}

impl MarkWorkspacesInaccessibleState {
    /// Creates the state.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Flags every row scoped to the given workspaces. The payload is the
    /// number of rows flagged.
    pub async fn start(&self, absent: Vec<WorkspaceId>) -> SyncResult<Transition<usize>> {
        let mut flagged = 0;
        for workspace_id in absent {
            flagged += self.store.workspaces.mark_inaccessible(workspace_id);
            flagged += self.store.time_entries.mark_inaccessible(workspace_id);
            flagged += self.store.projects.mark_inaccessible(workspace_id);
            flagged += self.store.clients.mark_inaccessible(workspace_id);
            flagged += self.store.tags.mark_inaccessible(workspace_id);
            flagged += self.store.tasks.mark_inaccessible(workspace_id);
            warn!(%workspace_id, "workspace no longer accessible");
        }
        Ok(Transition::Done(flagged))
    }
}

/// Lifts the inaccessible flag from regained workspaces, and every entity
/// scoped to them, and drops their watermarks.
///
/// The flags are cleared first so the rows stop being cleanup candidates
/// even if the refetch that follows fails; the cleared watermarks make the
/// next per-type pulls fetch the workspace's complete history, which also
/// reconciles rows deleted server-side while access was revoked.
pub struct RestoreWorkspaceAccessState {
    store: Arc<LocalStore>,
}

impl RestoreWorkspaceAccessState {
    /// Creates the state.
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Unflags every row scoped to the given workspaces. The payload is the
    /// number of rows unflagged.
    pub async fn start(&self, regained: Vec<WorkspaceId>) -> SyncResult<Transition<usize>> {
        let mut unflagged = 0;
        for workspace_id in regained {
            unflagged += self.store.workspaces.mark_accessible(workspace_id);
            unflagged += self.store.time_entries.mark_accessible(workspace_id);
            unflagged += self.store.projects.mark_accessible(workspace_id);
            unflagged += self.store.clients.mark_accessible(workspace_id);
            unflagged += self.store.tags.mark_accessible(workspace_id);
            unflagged += self.store.tasks.mark_accessible(workspace_id);
            self.store.since.reset_workspace(workspace_id);
            info!(%workspace_id, "workspace accessible again");
        }
        Ok(Transition::Done(unflagged))
    }
}

/// Incremental pull for one entity type across the accessible workspaces.
///
/// The watermark advances to the time the request was made, not to the
/// newest fetched row's own timestamp: a lagging server clock could
/// otherwise hide rows behind the watermark forever.
pub struct PullEntityState<T: Syncable> {
    endpoint: Arc<dyn EntityEndpoint<T>>,
    source: Arc<DataSource<T>>,
    since: Arc<SinceParameters>,
    time_service: Arc<dyn TimeService>,
}

impl<T: Syncable> PullEntityState<T> {
    /// Creates the state.
    pub fn new(
        endpoint: Arc<dyn EntityEndpoint<T>>,
        source: Arc<DataSource<T>>,
        since: Arc<SinceParameters>,
        time_service: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            endpoint,
            source,
            since,
            time_service,
        }
    }

    /// Pulls changed rows for every given workspace.
    ///
    /// A transient failure for one workspace is recorded in the summary and
    /// leaves that workspace's watermark untouched; sibling workspaces and
    /// sibling entity types are unaffected. Authorization loss aborts the
    /// run.
    pub async fn start(&self, workspaces: &[WorkspaceId]) -> SyncResult<Transition<PullSummary>> {
        let mut summary = PullSummary::default();

        for &workspace_id in workspaces {
            let request_time = self.time_service.now();
            let watermark = self.since.get(workspace_id, T::KIND);

            match self
                .endpoint
                .fetch_changed_since(workspace_id, watermark)
                .await
            {
                Ok(rows) => {
                    summary.fetched += rows.len();
                    for row in rows {
                        match self.source.update_with_conflict_resolution(row) {
                            ConflictOutcome::KeptLocal => summary.kept_local += 1,
                            ConflictOutcome::Ignored => {}
                            _ => summary.applied += 1,
                        }
                    }
                    self.since.set(workspace_id, T::KIND, request_time);
                }
                Err(ApiError::Unauthorized) => return Err(SyncError::Unauthorized),
                Err(err) => {
                    warn!(%workspace_id, kind = %T::KIND, error = %err, "pull failed");
                    summary.errors.push(ScopeError {
                        workspace_id: Some(workspace_id),
                        kind: T::KIND,
                        message: err.to_string(),
                    });
                }
            }
        }

        debug!(
            kind = %T::KIND,
            fetched = summary.fetched,
            applied = summary.applied,
            "pull finished"
        );
        Ok(Transition::Done(summary))
    }
}

/// Pulls the singleton user record and merges it with the conflict policy of
/// the generic data source, specialized for exactly-one-record semantics.
pub struct PersistUserState {
    endpoint: Arc<dyn UserEndpoint>,
    user: Arc<UserDataSource>,
}

impl PersistUserState {
    /// Creates the state.
    pub fn new(endpoint: Arc<dyn UserEndpoint>, user: Arc<UserDataSource>) -> Self {
        Self { endpoint, user }
    }

    /// Fetches and merges the user record.
    pub async fn start(&self) -> SyncResult<Transition<PullSummary>> {
        let mut summary = PullSummary::default();
        match self.endpoint.fetch().await {
            Ok(server_user) => {
                summary.fetched = 1;
                match self.user.update_with_conflict_resolution(server_user) {
                    ConflictOutcome::KeptLocal => summary.kept_local = 1,
                    ConflictOutcome::Ignored => {}
                    _ => summary.applied = 1,
                }
            }
            Err(ApiError::Unauthorized) => return Err(SyncError::Unauthorized),
            Err(err) => summary.errors.push(ScopeError {
                workspace_id: None,
                kind: EntityKind::User,
                message: err.to_string(),
            }),
        }
        Ok(Transition::Done(summary))
    }
}

/// Assigns a default workspace when none is set and exactly one accessible
/// workspace exists.
///
/// Zero or several accessible workspaces without a default is a fatal
/// precondition failure: retrying cannot change the workspace count, so the
/// error is surfaced rather than retried.
pub struct TrySetDefaultWorkspaceState {
    user: Arc<UserDataSource>,
    workspaces: Arc<DataSource<Workspace>>,
}

impl TrySetDefaultWorkspaceState {
    /// Creates the state.
    pub fn new(user: Arc<UserDataSource>, workspaces: Arc<DataSource<Workspace>>) -> Self {
        Self { user, workspaces }
    }

    /// Tries to determine the default workspace.
    pub async fn start(&self) -> SyncResult<Transition<()>> {
        let user = self.user.get()?;
        if user.default_workspace_id.is_some() {
            return Ok(Transition::Done(()));
        }

        let accessible = self.workspaces.get_all(|_| true, false);
        if accessible.len() != 1 {
            return Err(SyncError::NoDefaultWorkspace {
                workspace_count: accessible.len(),
            });
        }

        let workspace_id = accessible[0].workspace_id();
        self.user.set_default_workspace(workspace_id)?;
        info!(%workspace_id, "default workspace assigned");
        Ok(Transition::Done(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockEndpoint, MockUserEndpoint, MockWorkspacesEndpoint};
    use chrono::{Duration, Utc};
    use timekeep_core::{
        EntityId, ManualTimeService, Project, SyncMetadata, SyncStatus, User,
    };

    fn clock() -> Arc<ManualTimeService> {
        Arc::new(ManualTimeService::new(Utc::now()))
    }

    fn store(time: Arc<ManualTimeService>) -> Arc<LocalStore> {
        Arc::new(LocalStore::new(time))
    }

    fn workspace(id: i64, name: &str) -> Workspace {
        Workspace {
            id: EntityId::new(id),
            name: name.into(),
            admin: false,
            meta: SyncMetadata::in_sync(Utc::now()),
        }
    }

    fn project(id: i64, ws: i64) -> Project {
        Project {
            id: EntityId::new(id),
            workspace_id: WorkspaceId::new(ws),
            client_id: None,
            name: format!("project-{id}"),
            color: "#525266".into(),
            active: true,
            meta: SyncMetadata::in_sync(Utc::now()),
        }
    }

    fn user(default_workspace: Option<i64>) -> User {
        User {
            id: EntityId::new(666),
            email: "valid@email.com".into(),
            fullname: "Full Name".into(),
            default_workspace_id: default_workspace.map(WorkspaceId::new),
            meta: SyncMetadata::in_sync(Utc::now()),
        }
    }

    #[tokio::test]
    async fn reset_clears_watermarks() {
        let since = Arc::new(SinceParameters::new());
        since.set(WorkspaceId::new(1), EntityKind::Project, Utc::now());

        let state = ResetSinceParamsState::new(since.clone());
        state.start().await.unwrap();
        assert!(since.is_empty());
    }

    #[tokio::test]
    async fn workspace_listing_reports_absent_workspaces() {
        let time = clock();
        let store = store(time);
        store
            .workspaces
            .update_with_conflict_resolution(workspace(1, "kept"));
        store
            .workspaces
            .update_with_conflict_resolution(workspace(2, "removed"));

        let endpoint = Arc::new(MockWorkspacesEndpoint::new());
        endpoint.set_workspaces(vec![workspace(1, "kept")]);

        let state = PullWorkspacesState::new(endpoint, store.workspaces.clone());
        let changes = state.start().await.unwrap().into_done().unwrap();
        assert_eq!(changes.absent, vec![WorkspaceId::new(2)]);
        assert!(changes.regained.is_empty());
    }

    #[tokio::test]
    async fn workspace_listing_reports_regained_workspaces() {
        let time = clock();
        let store = store(time);
        store
            .workspaces
            .update_with_conflict_resolution(workspace(1, "kept"));
        store
            .workspaces
            .update_with_conflict_resolution(workspace(2, "revoked"));
        store.workspaces.mark_inaccessible(WorkspaceId::new(2));

        // The server lists the revoked workspace again.
        let endpoint = Arc::new(MockWorkspacesEndpoint::new());
        endpoint.set_workspaces(vec![workspace(1, "kept"), workspace(2, "revoked")]);

        let state = PullWorkspacesState::new(endpoint, store.workspaces.clone());
        let changes = state.start().await.unwrap().into_done().unwrap();
        assert!(changes.absent.is_empty());
        assert_eq!(changes.regained, vec![WorkspaceId::new(2)]);
    }

    #[tokio::test]
    async fn mark_inaccessible_covers_all_scoped_entities() {
        let time = clock();
        let store = store(time);
        store
            .workspaces
            .update_with_conflict_resolution(workspace(2, "gone"));
        store
            .projects
            .update_with_conflict_resolution(project(10, 2));
        store
            .projects
            .update_with_conflict_resolution(project(11, 2));

        let state = MarkWorkspacesInaccessibleState::new(store.clone());
        let flagged = state
            .start(vec![WorkspaceId::new(2)])
            .await
            .unwrap()
            .into_done()
            .unwrap();

        // Workspace row plus the two projects.
        assert_eq!(flagged, 3);
        assert!(store.projects.get_all(|_| true, false).is_empty());
        assert!(store
            .projects
            .get(EntityId::new(10))
            .unwrap()
            .is_inaccessible());
    }

    #[tokio::test]
    async fn restore_unflags_scoped_entities_and_drops_watermarks() {
        let time = clock();
        let store = store(time.clone());
        store
            .workspaces
            .update_with_conflict_resolution(workspace(2, "back"));
        store
            .projects
            .update_with_conflict_resolution(project(10, 2));
        let state = MarkWorkspacesInaccessibleState::new(store.clone());
        state.start(vec![WorkspaceId::new(2)]).await.unwrap();
        store
            .since
            .set(WorkspaceId::new(2), EntityKind::Project, time.now());

        let state = RestoreWorkspaceAccessState::new(store.clone());
        let unflagged = state
            .start(vec![WorkspaceId::new(2)])
            .await
            .unwrap()
            .into_done()
            .unwrap();

        // Workspace row plus the project.
        assert_eq!(unflagged, 2);
        assert!(!store
            .projects
            .get(EntityId::new(10))
            .unwrap()
            .is_inaccessible());
        assert_eq!(store.projects.get_all(|_| true, false).len(), 1);
        // The next pull for this workspace starts from scratch.
        assert!(store.since.get(WorkspaceId::new(2), EntityKind::Project).is_none());
    }

    #[tokio::test]
    async fn pull_advances_watermark_to_request_time() {
        let time = clock();
        let request_time = time.now();
        let since = Arc::new(SinceParameters::new());
        let source = Arc::new(DataSource::<Project>::new(time.clone()));
        let endpoint = Arc::new(MockEndpoint::<Project>::new());
        let ws = WorkspaceId::new(1);

        // Row timestamps lag behind the request time (server clock skew).
        let mut row = project(10, 1);
        row.meta.at = request_time - Duration::hours(3);
        endpoint.set_fetch_response(ws, vec![row]);

        let state = PullEntityState::new(endpoint.clone(), source.clone(), since.clone(), time);
        let summary = state.start(&[ws]).await.unwrap().into_done().unwrap();

        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.applied, 1);
        assert_eq!(since.get(ws, EntityKind::Project), Some(request_time));
        // First pull carries no watermark.
        assert_eq!(endpoint.fetch_calls(), vec![(ws, None)]);
    }

    #[tokio::test]
    async fn pull_failure_isolated_per_workspace() {
        let time = clock();
        let since = Arc::new(SinceParameters::new());
        let source = Arc::new(DataSource::<Project>::new(time.clone()));
        let endpoint = Arc::new(MockEndpoint::<Project>::new());
        let ws_ok = WorkspaceId::new(1);
        let ws_bad = WorkspaceId::new(2);

        endpoint.set_fetch_response(ws_ok, vec![project(10, 1)]);
        endpoint.fail_fetch(ws_bad, ApiError::Transient("503".into()));

        let state = PullEntityState::new(endpoint, source, since.clone(), time);
        let summary = state
            .start(&[ws_ok, ws_bad])
            .await
            .unwrap()
            .into_done()
            .unwrap();

        assert_eq!(summary.applied, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(since.get(ws_ok, EntityKind::Project).is_some());
        assert!(since.get(ws_bad, EntityKind::Project).is_none());
    }

    #[tokio::test]
    async fn pull_unauthorized_aborts() {
        let time = clock();
        let since = Arc::new(SinceParameters::new());
        let source = Arc::new(DataSource::<Project>::new(time.clone()));
        let endpoint = Arc::new(MockEndpoint::<Project>::new());
        endpoint.fail_fetch(WorkspaceId::new(1), ApiError::Unauthorized);

        let state = PullEntityState::new(endpoint, source, since, time);
        let err = state.start(&[WorkspaceId::new(1)]).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized));
    }

    #[tokio::test]
    async fn pull_twice_is_idempotent() {
        let time = clock();
        let since = Arc::new(SinceParameters::new());
        let source = Arc::new(DataSource::<Project>::new(time.clone()));
        let endpoint = Arc::new(MockEndpoint::<Project>::new());
        let ws = WorkspaceId::new(1);
        endpoint.set_fetch_response(ws, vec![project(10, 1), project(11, 1)]);

        let state =
            PullEntityState::new(endpoint.clone(), source.clone(), since.clone(), time.clone());
        state.start(&[ws]).await.unwrap();
        let first_watermark = since.get(ws, EntityKind::Project);
        let rows_after_first = source.get_all(|_| true, true);

        // Second run with identical remote data: no duplicates, stable
        // status, watermark moves to the new request time only.
        time.advance(Duration::minutes(5));
        state.start(&[ws]).await.unwrap();

        assert_eq!(source.get_all(|_| true, true).len(), rows_after_first.len());
        assert!(source.dirty().is_empty());
        assert_eq!(since.get(ws, EntityKind::Project), first_watermark.map(|_| time.now()));
        assert_eq!(endpoint.fetch_calls()[1].1, first_watermark);
    }

    #[tokio::test]
    async fn persist_user_merges_singleton() {
        let time = clock();
        let source = Arc::new(UserDataSource::new(time));
        let endpoint = Arc::new(MockUserEndpoint::new());
        endpoint.set_user(user(Some(1)));

        let state = PersistUserState::new(endpoint, source.clone());
        let summary = state.start().await.unwrap().into_done().unwrap();

        assert_eq!(summary.applied, 1);
        assert_eq!(source.get().unwrap().sync_status(), SyncStatus::InSync);
    }

    #[tokio::test]
    async fn persist_user_transient_failure_is_recorded() {
        let time = clock();
        let source = Arc::new(UserDataSource::new(time));
        let endpoint = Arc::new(MockUserEndpoint::new());
        endpoint.fail_fetch(ApiError::Transient("502".into()));

        let state = PersistUserState::new(endpoint, source);
        let summary = state.start().await.unwrap().into_done().unwrap();
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].kind, EntityKind::User);
    }

    #[tokio::test]
    async fn single_workspace_becomes_default() {
        let time = clock();
        let store = store(time.clone());
        store
            .workspaces
            .update_with_conflict_resolution(workspace(1, "only"));
        store.user.update_with_conflict_resolution(user(None));

        let state = TrySetDefaultWorkspaceState::new(store.user.clone(), store.workspaces.clone());
        state.start().await.unwrap();

        let stored = store.user.get().unwrap();
        assert_eq!(stored.default_workspace_id, Some(WorkspaceId::new(1)));
        assert_eq!(stored.sync_status(), SyncStatus::SyncNeeded);
        assert_eq!(stored.at(), time.now());
    }

    #[tokio::test]
    async fn zero_workspaces_is_fatal_without_mutation() {
        let time = clock();
        let store = store(time);
        store.user.update_with_conflict_resolution(user(None));

        let state = TrySetDefaultWorkspaceState::new(store.user.clone(), store.workspaces.clone());
        let err = state.start().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::NoDefaultWorkspace { workspace_count: 0 }
        ));
        assert_eq!(store.user.get().unwrap().default_workspace_id, None);
        assert_eq!(store.user.get().unwrap().sync_status(), SyncStatus::InSync);
    }

    #[tokio::test]
    async fn several_workspaces_is_fatal() {
        let time = clock();
        let store = store(time);
        store.user.update_with_conflict_resolution(user(None));
        for id in 1..=4 {
            store
                .workspaces
                .update_with_conflict_resolution(workspace(id, "ws"));
        }

        let state = TrySetDefaultWorkspaceState::new(store.user.clone(), store.workspaces.clone());
        let err = state.start().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::NoDefaultWorkspace { workspace_count: 4 }
        ));
    }

    #[tokio::test]
    async fn existing_default_short_circuits() {
        let time = clock();
        let store = store(time);
        store.user.update_with_conflict_resolution(user(Some(7)));
        // Several workspaces would otherwise be fatal.
        for id in 1..=3 {
            store
                .workspaces
                .update_with_conflict_resolution(workspace(id, "ws"));
        }

        let state = TrySetDefaultWorkspaceState::new(store.user.clone(), store.workspaces.clone());
        assert!(state.start().await.is_ok());
        assert_eq!(store.user.get().unwrap().sync_status(), SyncStatus::InSync);
    }

    #[tokio::test]
    async fn inaccessible_workspace_does_not_count_as_default_candidate() {
        let time = clock();
        let store = store(time);
        store.user.update_with_conflict_resolution(user(None));
        store
            .workspaces
            .update_with_conflict_resolution(workspace(1, "accessible"));
        store
            .workspaces
            .update_with_conflict_resolution(workspace(2, "gone"));
        store.workspaces.mark_inaccessible(WorkspaceId::new(2));

        let state = TrySetDefaultWorkspaceState::new(store.user.clone(), store.workspaces.clone());
        state.start().await.unwrap();
        assert_eq!(
            store.user.get().unwrap().default_workspace_id,
            Some(WorkspaceId::new(1))
        );
    }
}
