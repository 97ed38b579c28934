//! Singleton data source for the user record.
//!
//! Exactly one user record exists per session. The conflict policy is the
//! same as [`DataSource::update_with_conflict_resolution`], specialized for
//! exactly-one-record semantics.
//!
//! [`DataSource::update_with_conflict_resolution`]: crate::data_source::DataSource::update_with_conflict_resolution

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::clock::TimeService;
use crate::data_source::ConflictOutcome;
use crate::error::{StoreError, StoreResult};
use crate::model::{Syncable, User};
use crate::types::{SyncStatus, WorkspaceId};
use parking_lot::RwLock;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Holds the single user record.
pub struct UserDataSource {
    user: RwLock<Option<User>>,
    feed: ChangeFeed,
    time_service: Arc<dyn TimeService>,
}

impl UserDataSource {
    /// Creates an empty user source.
    pub fn new(time_service: Arc<dyn TimeService>) -> Self {
        Self {
            user: RwLock::new(None),
            feed: ChangeFeed::new(),
            time_service,
        }
    }

    /// Subscribes to user change events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Returns the stored user.
    pub fn get(&self) -> StoreResult<User> {
        self.user.read().clone().ok_or(StoreError::SingletonMissing)
    }

    /// Persists a local edit to the user. Always marks the record dirty.
    pub fn update(&self, mut user: User) -> StoreResult<User> {
        user.meta.touch_local_edit(self.time_service.now());
        let id = user.id;
        *self.user.write() = Some(user.clone());
        self.feed.emit(ChangeEvent {
            id,
            kind: ChangeKind::Updated,
        });
        Ok(user)
    }

    /// Assigns the default workspace, stamping the record with the current
    /// time and marking it `SyncNeeded` so the choice is pushed back.
    pub fn set_default_workspace(&self, workspace_id: WorkspaceId) -> StoreResult<User> {
        let mut user = self.get()?;
        user.default_workspace_id = Some(workspace_id);
        self.update(user)
    }

    /// Merges the server's user record with any concurrent local edit.
    ///
    /// Same rule as the generic data source: a dirty local record keeps its
    /// fields unless the server copy's `at` is strictly newer.
    pub fn update_with_conflict_resolution(&self, mut server: User) -> ConflictOutcome {
        server.meta.sync_status = SyncStatus::InSync;
        server.meta.last_sync_error = None;
        let id = server.id;

        let mut slot = self.user.write();
        let outcome = match slot.as_ref() {
            None => {
                *slot = Some(server);
                ConflictOutcome::Inserted
            }
            Some(stored) => {
                if stored.sync_status().is_dirty() && server.at() <= stored.at() {
                    return ConflictOutcome::KeptLocal;
                }
                *slot = Some(server);
                ConflictOutcome::Updated
            }
        };
        drop(slot);

        let kind = match outcome {
            ConflictOutcome::Inserted => ChangeKind::Created,
            _ => ChangeKind::Updated,
        };
        self.feed.emit(ChangeEvent { id, kind });
        outcome
    }

    /// Marks a push as in flight and returns the snapshot to send.
    pub fn begin_push(&self) -> StoreResult<User> {
        let mut slot = self.user.write();
        let user = slot.as_mut().ok_or(StoreError::SingletonMissing)?;
        user.meta.sync_status = SyncStatus::Syncing;
        Ok(user.clone())
    }

    /// Records a successful push of the user record.
    pub fn finish_push(&self, mut server: User) -> StoreResult<User> {
        let mut slot = self.user.write();
        let stored = slot.as_ref().ok_or(StoreError::SingletonMissing)?;

        let result = if stored.sync_status() == SyncStatus::Syncing {
            server.meta.sync_status = SyncStatus::InSync;
            server.meta.last_sync_error = None;
            server
        } else {
            let mut local = stored.clone();
            local.adopt_server_identity(&server);
            local
        };
        *slot = Some(result.clone());
        drop(slot);

        self.feed.emit(ChangeEvent {
            id: result.id,
            kind: ChangeKind::Updated,
        });
        Ok(result)
    }

    /// Records a rejected push; the record waits for another local edit.
    pub fn reject_push(&self, message: impl Into<String>) -> StoreResult<User> {
        let mut slot = self.user.write();
        let user = slot.as_mut().ok_or(StoreError::SingletonMissing)?;
        user.meta.sync_status = SyncStatus::Unsyncable;
        user.meta.last_sync_error = Some(message.into());
        Ok(user.clone())
    }

    /// Drops the stored record. Logout path.
    pub fn clear(&self) {
        *self.user.write() = None;
    }

    /// Rolls a transient push failure back to `SyncNeeded`.
    pub fn abort_push(&self) -> StoreResult<()> {
        let mut slot = self.user.write();
        let user = slot.as_mut().ok_or(StoreError::SingletonMissing)?;
        if user.sync_status() == SyncStatus::Syncing {
            user.meta.sync_status = SyncStatus::SyncNeeded;
        }
        Ok(())
    }
}
