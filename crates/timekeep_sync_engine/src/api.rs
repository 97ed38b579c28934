//! Remote API contract.
//!
//! The wire-format HTTP client lives outside this crate; the engine sees
//! each entity type through an endpoint trait with a changed-since listing
//! and a create/update push. Failures are classified, not inspected.
//!
//! Mock endpoints with scripted responses are exported for testing the
//! engine without a server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use timekeep_core::{
    EntityId, Project, ProjectClient, Syncable, SyncStatus, Tag, Task, TimeEntry, User,
    Workspace, WorkspaceId,
};

/// Result type for remote API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Classified remote API failure.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Server-side or network failure worth retrying (5xx, timeout).
    #[error("transient server failure: {0}")]
    Transient(String),

    /// The server rejected the payload (validation, 4xx).
    #[error("request rejected: {0}")]
    ClientRejection(String),

    /// Credentials no longer valid.
    #[error("unauthorized")]
    Unauthorized,

    /// The server could not be reached at all.
    #[error("server unreachable: {0}")]
    Unreachable(String),
}

/// Workspace-scoped endpoint for one entity type.
#[async_trait]
pub trait EntityEndpoint<T: Syncable>: Send + Sync {
    /// Lists entities changed since the given watermark. `None` fetches the
    /// complete history for the workspace.
    async fn fetch_changed_since(
        &self,
        workspace_id: WorkspaceId,
        since: Option<DateTime<Utc>>,
    ) -> ApiResult<Vec<T>>;

    /// Creates or updates one entity. The server echoes the stored row,
    /// server-assigned id included.
    async fn push(&self, entity: &T) -> ApiResult<T>;
}

/// Endpoint for the workspace listing.
///
/// Workspaces are never fetched incrementally: the full accessible set comes
/// back every time, and a locally known workspace absent from the listing
/// has become inaccessible.
#[async_trait]
pub trait WorkspacesEndpoint: Send + Sync {
    /// Lists every workspace the account can access.
    async fn fetch_all(&self) -> ApiResult<Vec<Workspace>>;

    /// Creates or updates one workspace.
    async fn push(&self, workspace: &Workspace) -> ApiResult<Workspace>;
}

/// Endpoint for the singleton user record.
#[async_trait]
pub trait UserEndpoint: Send + Sync {
    /// Fetches the user record.
    async fn fetch(&self) -> ApiResult<User>;

    /// Updates the user record.
    async fn push(&self, user: &User) -> ApiResult<User>;
}

/// All remote endpoints for one authenticated session.
#[derive(Clone)]
pub struct SyncApi {
    /// Time entry endpoint.
    pub time_entries: Arc<dyn EntityEndpoint<TimeEntry>>,
    /// Project endpoint.
    pub projects: Arc<dyn EntityEndpoint<Project>>,
    /// Client endpoint.
    pub clients: Arc<dyn EntityEndpoint<ProjectClient>>,
    /// Tag endpoint.
    pub tags: Arc<dyn EntityEndpoint<Tag>>,
    /// Task endpoint.
    pub tasks: Arc<dyn EntityEndpoint<Task>>,
    /// Workspace listing endpoint.
    pub workspaces: Arc<dyn WorkspacesEndpoint>,
    /// User endpoint.
    pub user: Arc<dyn UserEndpoint>,
}

/// Counter handing out server-side ids for mock pushes.
#[derive(Debug, Default)]
struct ServerIds(AtomicI64);

impl ServerIds {
    fn next(&self) -> EntityId {
        EntityId::new(self.0.fetch_add(1, Ordering::SeqCst) + 1000)
    }
}

/// A mock entity endpoint with scripted responses.
///
/// Fetches return whatever was queued per workspace (empty by default).
/// Pushes echo the entity back `InSync`-shaped with a server id assigned
/// over provisional ids, unless a failure was scripted for that entity.
pub struct MockEndpoint<T: Syncable> {
    fetch_responses: Mutex<HashMap<WorkspaceId, Vec<T>>>,
    fetch_failures: Mutex<HashMap<WorkspaceId, ApiError>>,
    push_failures: Mutex<HashMap<EntityId, ApiError>>,
    fetch_calls: Mutex<Vec<(WorkspaceId, Option<DateTime<Utc>>)>>,
    pushed: Mutex<Vec<T>>,
    server_ids: ServerIds,
}

impl<T: Syncable> MockEndpoint<T> {
    /// Creates a mock endpoint with no scripted data.
    pub fn new() -> Self {
        Self {
            fetch_responses: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(HashMap::new()),
            push_failures: Mutex::new(HashMap::new()),
            fetch_calls: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
            server_ids: ServerIds::default(),
        }
    }

    /// Scripts the rows returned for a workspace fetch.
    pub fn set_fetch_response(&self, workspace_id: WorkspaceId, rows: Vec<T>) {
        self.fetch_responses.lock().insert(workspace_id, rows);
    }

    /// Scripts a fetch failure for a workspace.
    pub fn fail_fetch(&self, workspace_id: WorkspaceId, error: ApiError) {
        self.fetch_failures.lock().insert(workspace_id, error);
    }

    /// Scripts a push failure for an entity id.
    pub fn fail_push(&self, id: EntityId, error: ApiError) {
        self.push_failures.lock().insert(id, error);
    }

    /// Removes a scripted push failure.
    pub fn clear_push_failure(&self, id: EntityId) {
        self.push_failures.lock().remove(&id);
    }

    /// Every fetch call made, with the watermark the engine sent.
    pub fn fetch_calls(&self) -> Vec<(WorkspaceId, Option<DateTime<Utc>>)> {
        self.fetch_calls.lock().clone()
    }

    /// Every entity the engine pushed.
    pub fn pushed(&self) -> Vec<T> {
        self.pushed.lock().clone()
    }
}

impl<T: Syncable> Default for MockEndpoint<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Syncable> EntityEndpoint<T> for MockEndpoint<T> {
    async fn fetch_changed_since(
        &self,
        workspace_id: WorkspaceId,
        since: Option<DateTime<Utc>>,
    ) -> ApiResult<Vec<T>> {
        self.fetch_calls.lock().push((workspace_id, since));
        if let Some(error) = self.fetch_failures.lock().get(&workspace_id) {
            return Err(error.clone());
        }
        Ok(self
            .fetch_responses
            .lock()
            .get(&workspace_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn push(&self, entity: &T) -> ApiResult<T> {
        if let Some(error) = self.push_failures.lock().get(&entity.id()) {
            return Err(error.clone());
        }

        let mut echo = entity.clone();
        if echo.id().is_provisional() {
            echo.set_id(self.server_ids.next());
        }
        echo.meta_mut().sync_status = SyncStatus::InSync;
        echo.meta_mut().last_sync_error = None;
        self.pushed.lock().push(echo.clone());
        Ok(echo)
    }
}

/// A mock workspace listing endpoint.
pub struct MockWorkspacesEndpoint {
    workspaces: Mutex<Vec<Workspace>>,
    fetch_failure: Mutex<Option<ApiError>>,
    pushed: Mutex<Vec<Workspace>>,
}

impl MockWorkspacesEndpoint {
    /// Creates a mock with an empty listing.
    pub fn new() -> Self {
        Self {
            workspaces: Mutex::new(Vec::new()),
            fetch_failure: Mutex::new(None),
            pushed: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the scripted listing.
    pub fn set_workspaces(&self, workspaces: Vec<Workspace>) {
        *self.workspaces.lock() = workspaces;
    }

    /// Scripts a listing failure.
    pub fn fail_fetch(&self, error: ApiError) {
        *self.fetch_failure.lock() = Some(error);
    }

    /// Every workspace the engine pushed.
    pub fn pushed(&self) -> Vec<Workspace> {
        self.pushed.lock().clone()
    }
}

impl Default for MockWorkspacesEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkspacesEndpoint for MockWorkspacesEndpoint {
    async fn fetch_all(&self) -> ApiResult<Vec<Workspace>> {
        if let Some(error) = self.fetch_failure.lock().clone() {
            return Err(error);
        }
        Ok(self.workspaces.lock().clone())
    }

    async fn push(&self, workspace: &Workspace) -> ApiResult<Workspace> {
        let mut echo = workspace.clone();
        echo.meta.sync_status = SyncStatus::InSync;
        self.pushed.lock().push(echo.clone());
        Ok(echo)
    }
}

/// A mock user endpoint.
pub struct MockUserEndpoint {
    user: Mutex<Option<User>>,
    fetch_failure: Mutex<Option<ApiError>>,
    push_failure: Mutex<Option<ApiError>>,
    pushed: Mutex<Vec<User>>,
}

impl MockUserEndpoint {
    /// Creates a mock with no user record.
    pub fn new() -> Self {
        Self {
            user: Mutex::new(None),
            fetch_failure: Mutex::new(None),
            push_failure: Mutex::new(None),
            pushed: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the fetched user record.
    pub fn set_user(&self, user: User) {
        *self.user.lock() = Some(user);
    }

    /// Scripts a fetch failure.
    pub fn fail_fetch(&self, error: ApiError) {
        *self.fetch_failure.lock() = Some(error);
    }

    /// Scripts a push failure.
    pub fn fail_push(&self, error: ApiError) {
        *self.push_failure.lock() = Some(error);
    }

    /// Every user record the engine pushed.
    pub fn pushed(&self) -> Vec<User> {
        self.pushed.lock().clone()
    }
}

impl Default for MockUserEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserEndpoint for MockUserEndpoint {
    async fn fetch(&self) -> ApiResult<User> {
        if let Some(error) = self.fetch_failure.lock().clone() {
            return Err(error);
        }
        self.user
            .lock()
            .clone()
            .ok_or_else(|| ApiError::Transient("no mock user set".into()))
    }

    async fn push(&self, user: &User) -> ApiResult<User> {
        if let Some(error) = self.push_failure.lock().clone() {
            return Err(error);
        }
        let mut echo = user.clone();
        echo.meta.sync_status = SyncStatus::InSync;
        self.pushed.lock().push(echo.clone());
        Ok(echo)
    }
}

/// A complete mock API: typed access to every mock endpoint plus a
/// [`SyncApi`] view for the engine.
pub struct MockApi {
    /// Time entry endpoint.
    pub time_entries: Arc<MockEndpoint<TimeEntry>>,
    /// Project endpoint.
    pub projects: Arc<MockEndpoint<Project>>,
    /// Client endpoint.
    pub clients: Arc<MockEndpoint<ProjectClient>>,
    /// Tag endpoint.
    pub tags: Arc<MockEndpoint<Tag>>,
    /// Task endpoint.
    pub tasks: Arc<MockEndpoint<Task>>,
    /// Workspace listing endpoint.
    pub workspaces: Arc<MockWorkspacesEndpoint>,
    /// User endpoint.
    pub user: Arc<MockUserEndpoint>,
}

impl MockApi {
    /// Creates a mock API with nothing scripted.
    pub fn new() -> Self {
        Self {
            time_entries: Arc::new(MockEndpoint::new()),
            projects: Arc::new(MockEndpoint::new()),
            clients: Arc::new(MockEndpoint::new()),
            tags: Arc::new(MockEndpoint::new()),
            tasks: Arc::new(MockEndpoint::new()),
            workspaces: Arc::new(MockWorkspacesEndpoint::new()),
            user: Arc::new(MockUserEndpoint::new()),
        }
    }

    /// The engine-facing view of this mock.
    pub fn sync_api(&self) -> SyncApi {
        SyncApi {
            time_entries: self.time_entries.clone(),
            projects: self.projects.clone(),
            clients: self.clients.clone(),
            tags: self.tags.clone(),
            tasks: self.tasks.clone(),
            workspaces: self.workspaces.clone(),
            user: self.user.clone(),
        }
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}
