//! Syncable entity model.
//!
//! Every persisted domain object carries a [`SyncMetadata`] block and
//! implements [`Syncable`]. Code that is generic over entity types (data
//! sources, pull/push/cleanup states) works exclusively through this trait;
//! there is no entity base type.

use crate::types::{EntityId, EntityKind, SyncMetadata, SyncStatus, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted domain object the sync engine knows how to reconcile.
pub trait Syncable: Clone + Send + Sync + 'static {
    /// The entity type this object belongs to.
    const KIND: EntityKind;

    /// The entity's identifier (provisional while negative).
    fn id(&self) -> EntityId;

    /// Replaces the identifier. Called once when a push merges the
    /// server-assigned id over a provisional one.
    fn set_id(&mut self, id: EntityId);

    /// The workspace this entity is scoped to, if any.
    fn workspace_id(&self) -> Option<WorkspaceId>;

    /// Sync bookkeeping.
    fn meta(&self) -> &SyncMetadata;

    /// Mutable sync bookkeeping.
    fn meta_mut(&mut self) -> &mut SyncMetadata;

    /// Server-side modification timestamp.
    fn at(&self) -> DateTime<Utc> {
        self.meta().at
    }

    /// Current sync status.
    fn sync_status(&self) -> SyncStatus {
        self.meta().sync_status
    }

    /// True when the server no longer grants access to this entity.
    fn is_inaccessible(&self) -> bool {
        self.meta().is_inaccessible
    }

    /// Adopts identifying fields from the row the server echoed back after a
    /// push, without touching local field values. Used when a concurrent
    /// local edit happened while the push was in flight.
    fn adopt_server_identity(&mut self, server: &Self) {
        self.set_id(server.id());
        self.meta_mut().server_deleted_at = server.meta().server_deleted_at;
    }
}

macro_rules! impl_syncable {
    ($ty:ident, $kind:expr, workspace) => {
        impl Syncable for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> EntityId {
                self.id
            }

            fn set_id(&mut self, id: EntityId) {
                self.id = id;
            }

            fn workspace_id(&self) -> Option<WorkspaceId> {
                Some(self.workspace_id)
            }

            fn meta(&self) -> &SyncMetadata {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut SyncMetadata {
                &mut self.meta
            }
        }
    };
}

/// A tracked time entry.
///
/// A running entry has `duration == None`; stopping it sets the duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    /// Entity id.
    pub id: EntityId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Project the entry is tracked against, if any.
    pub project_id: Option<EntityId>,
    /// Task within the project, if any.
    pub task_id: Option<EntityId>,
    /// Free-form description.
    pub description: String,
    /// When tracking started.
    pub start: DateTime<Utc>,
    /// Tracked duration in seconds. `None` while the entry is running.
    pub duration: Option<i64>,
    /// Whether the entry is billable.
    pub billable: bool,
    /// Tags attached to the entry.
    pub tag_ids: Vec<EntityId>,
    /// Sync bookkeeping.
    pub meta: SyncMetadata,
}

impl TimeEntry {
    /// True while this entry is still being tracked.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.duration.is_none()
    }
}

impl_syncable!(TimeEntry, EntityKind::TimeEntry, workspace);

/// A project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Entity id.
    pub id: EntityId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Client the project belongs to, if any.
    pub client_id: Option<EntityId>,
    /// Project name.
    pub name: String,
    /// Display color.
    pub color: String,
    /// Whether the project is active.
    pub active: bool,
    /// Sync bookkeeping.
    pub meta: SyncMetadata,
}

impl_syncable!(Project, EntityKind::Project, workspace);

/// A client that projects can be grouped under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectClient {
    /// Entity id.
    pub id: EntityId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Client name.
    pub name: String,
    /// Sync bookkeeping.
    pub meta: SyncMetadata,
}

impl_syncable!(ProjectClient, EntityKind::Client, workspace);

/// A tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Entity id.
    pub id: EntityId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Tag name.
    pub name: String,
    /// Sync bookkeeping.
    pub meta: SyncMetadata,
}

impl_syncable!(Tag, EntityKind::Tag, workspace);

/// A task within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Entity id.
    pub id: EntityId,
    /// Owning workspace.
    pub workspace_id: WorkspaceId,
    /// Owning project.
    pub project_id: EntityId,
    /// Task name.
    pub name: String,
    /// Whether the task is active.
    pub active: bool,
    /// Sync bookkeeping.
    pub meta: SyncMetadata,
}

impl_syncable!(Task, EntityKind::Task, workspace);

/// A workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Entity id.
    pub id: EntityId,
    /// Workspace name.
    pub name: String,
    /// Whether the current user administers this workspace.
    pub admin: bool,
    /// Sync bookkeeping.
    pub meta: SyncMetadata,
}

impl Workspace {
    /// The workspace id as a [`WorkspaceId`].
    #[must_use]
    pub fn workspace_id(&self) -> WorkspaceId {
        WorkspaceId::new(self.id.as_i64())
    }
}

impl Syncable for Workspace {
    const KIND: EntityKind = EntityKind::Workspace;

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn workspace_id(&self) -> Option<WorkspaceId> {
        Some(WorkspaceId::new(self.id.as_i64()))
    }

    fn meta(&self) -> &SyncMetadata {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMetadata {
        &mut self.meta
    }
}

/// The authenticated user. Exactly one record exists locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Entity id.
    pub id: EntityId,
    /// Email address.
    pub email: String,
    /// Full name.
    pub fullname: String,
    /// The workspace new entries default to, once determined.
    pub default_workspace_id: Option<WorkspaceId>,
    /// Sync bookkeeping.
    pub meta: SyncMetadata,
}

impl Syncable for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn workspace_id(&self) -> Option<WorkspaceId> {
        self.default_workspace_id
    }

    fn meta(&self) -> &SyncMetadata {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMetadata {
        &mut self.meta
    }
}
