//! The per-session aggregate of all data sources.

use crate::clock::TimeService;
use crate::data_source::DataSource;
use crate::model::{Project, ProjectClient, Tag, Task, TimeEntry, Workspace};
use crate::since::SinceParameters;
use crate::singleton::UserDataSource;
use std::sync::Arc;

/// All local data sources for one authenticated session.
///
/// Owned by the session context and handed to the sync engine; there is no
/// process-wide store.
pub struct LocalStore {
    /// Time entries.
    pub time_entries: Arc<DataSource<TimeEntry>>,
    /// Projects.
    pub projects: Arc<DataSource<Project>>,
    /// Clients.
    pub clients: Arc<DataSource<ProjectClient>>,
    /// Tags.
    pub tags: Arc<DataSource<Tag>>,
    /// Tasks.
    pub tasks: Arc<DataSource<Task>>,
    /// Workspaces.
    pub workspaces: Arc<DataSource<Workspace>>,
    /// The singleton user record.
    pub user: Arc<UserDataSource>,
    /// Pull watermarks.
    pub since: Arc<SinceParameters>,
}

impl LocalStore {
    /// Creates an empty store sharing the given time source.
    pub fn new(time_service: Arc<dyn TimeService>) -> Self {
        Self {
            time_entries: Arc::new(DataSource::new(time_service.clone())),
            projects: Arc::new(DataSource::new(time_service.clone())),
            clients: Arc::new(DataSource::new(time_service.clone())),
            tags: Arc::new(DataSource::new(time_service.clone())),
            tasks: Arc::new(DataSource::new(time_service.clone())),
            workspaces: Arc::new(DataSource::new(time_service.clone())),
            user: Arc::new(UserDataSource::new(time_service)),
            since: Arc::new(SinceParameters::new()),
        }
    }

    /// Hard-clears every table and watermark. Logout path: must only run
    /// after the sync engine has acknowledged a freeze.
    pub fn clear(&self) {
        let all_time_entries: Vec<_> = self
            .time_entries
            .get_all(|_| true, true)
            .iter()
            .map(|e| e.id)
            .collect();
        self.time_entries.delete_all(&all_time_entries);

        let all_projects: Vec<_> = self
            .projects
            .get_all(|_| true, true)
            .iter()
            .map(|e| e.id)
            .collect();
        self.projects.delete_all(&all_projects);

        let all_clients: Vec<_> = self
            .clients
            .get_all(|_| true, true)
            .iter()
            .map(|e| e.id)
            .collect();
        self.clients.delete_all(&all_clients);

        let all_tags: Vec<_> =
            self.tags.get_all(|_| true, true).iter().map(|e| e.id).collect();
        self.tags.delete_all(&all_tags);

        let all_tasks: Vec<_> = self
            .tasks
            .get_all(|_| true, true)
            .iter()
            .map(|e| e.id)
            .collect();
        self.tasks.delete_all(&all_tasks);

        let all_workspaces: Vec<_> = self
            .workspaces
            .get_all(|_| true, true)
            .iter()
            .map(|e| e.id)
            .collect();
        self.workspaces.delete_all(&all_workspaces);

        self.user.clear();
        self.since.reset();
    }
}
