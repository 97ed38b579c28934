//! Core type definitions for the TimeKeep local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a syncable entity.
///
/// Server-assigned ids are positive. Entities created locally get a
/// provisional negative id until a successful push merges the
/// server-assigned id in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntityId(pub i64);

impl EntityId {
    /// Creates a new entity ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true if the id is provisional (assigned locally, not yet
    /// reconciled with the server).
    #[must_use]
    pub const fn is_provisional(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Identifier for a workspace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WorkspaceId(pub i64);

impl WorkspaceId {
    /// Creates a new workspace ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workspace:{}", self.0)
    }
}

/// The entity types the sync engine coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Tracked time entries.
    TimeEntry,
    /// Projects.
    Project,
    /// Clients projects belong to.
    Client,
    /// Tags attached to time entries.
    Tag,
    /// Tasks within projects.
    Task,
    /// Workspaces.
    Workspace,
    /// The current user (singleton).
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::TimeEntry => "time_entry",
            EntityKind::Project => "project",
            EntityKind::Client => "client",
            EntityKind::Tag => "tag",
            EntityKind::Task => "task",
            EntityKind::Workspace => "workspace",
            EntityKind::User => "user",
        };
        f.write_str(name)
    }
}

/// Synchronization status of a locally stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Local and server copies agree.
    InSync,
    /// Local changes have not been acknowledged by the server.
    SyncNeeded,
    /// A push for this entity is in flight.
    Syncing,
    /// The server rejected the last push; not retried until edited again.
    Unsyncable,
}

impl SyncStatus {
    /// Returns true if the entity carries local changes the server has not
    /// acknowledged.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !matches!(self, SyncStatus::InSync)
    }
}

/// Sync bookkeeping carried by every syncable entity.
///
/// Invariant: `sync_status == Unsyncable` implies a non-empty
/// `last_sync_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Server-side modification timestamp.
    pub at: DateTime<Utc>,
    /// Set when the server reports the entity deleted.
    pub server_deleted_at: Option<DateTime<Utc>>,
    /// Current sync status.
    pub sync_status: SyncStatus,
    /// Soft-delete flag (deletion not yet acknowledged by the server).
    pub is_deleted: bool,
    /// The server no longer grants access to this entity.
    pub is_inaccessible: bool,
    /// Message from the last rejected push.
    pub last_sync_error: Option<String>,
}

impl SyncMetadata {
    /// Metadata for an entity just created locally.
    #[must_use]
    pub fn local(at: DateTime<Utc>) -> Self {
        Self {
            at,
            server_deleted_at: None,
            sync_status: SyncStatus::SyncNeeded,
            is_deleted: false,
            is_inaccessible: false,
            last_sync_error: None,
        }
    }

    /// Metadata for an entity as returned by the server.
    #[must_use]
    pub fn in_sync(at: DateTime<Utc>) -> Self {
        Self {
            at,
            server_deleted_at: None,
            sync_status: SyncStatus::InSync,
            is_deleted: false,
            is_inaccessible: false,
            last_sync_error: None,
        }
    }

    /// Marks the entity dirty after a local edit. Clears any stored push
    /// rejection so the entity becomes a push candidate again.
    pub fn touch_local_edit(&mut self, at: DateTime<Utc>) {
        self.at = at;
        self.sync_status = SyncStatus::SyncNeeded;
        self.last_sync_error = None;
    }
}
