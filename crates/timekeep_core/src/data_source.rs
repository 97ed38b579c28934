//! Per-entity-type data sources.
//!
//! A [`DataSource`] is the facade every sync state goes through to read and
//! mutate locally persisted entities. It owns dirty tracking (sync status
//! transitions), the pull-side conflict resolution rule, push bookkeeping,
//! and the change feed. No network calls originate here.

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::clock::TimeService;
use crate::error::{StoreError, StoreResult};
use crate::model::Syncable;
use crate::types::{EntityId, SyncStatus, WorkspaceId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of merging a pulled server row into the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// The row was unknown locally and has been inserted.
    Inserted,
    /// The local row was overwritten with the server row.
    Updated,
    /// The server reported the row deleted and the local copy was removed.
    Deleted,
    /// The local row carries unsynced edits that won the merge.
    KeptLocal,
    /// The server row was irrelevant locally (e.g. deleted row never stored).
    Ignored,
}

/// A key-indexed store of syncable entities of one type.
pub struct DataSource<T: Syncable> {
    rows: RwLock<HashMap<EntityId, T>>,
    feed: ChangeFeed,
    time_service: Arc<dyn TimeService>,
    // Provisional ids count down from -1 so they can never collide with
    // server-assigned ids.
    next_provisional_id: AtomicI64,
}

impl<T: Syncable> DataSource<T> {
    /// Creates an empty data source.
    pub fn new(time_service: Arc<dyn TimeService>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            feed: ChangeFeed::new(),
            time_service,
            next_provisional_id: AtomicI64::new(-1),
        }
    }

    /// Subscribes to change events for this entity type.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Returns the entity with the given id, if present.
    pub fn get(&self, id: EntityId) -> Option<T> {
        self.rows.read().get(&id).cloned()
    }

    /// Returns all entities matching the predicate.
    ///
    /// Inaccessible entities are excluded unless explicitly requested.
    pub fn get_all(
        &self,
        predicate: impl Fn(&T) -> bool,
        include_inaccessible: bool,
    ) -> Vec<T> {
        self.rows
            .read()
            .values()
            .filter(|e| include_inaccessible || !e.is_inaccessible())
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    /// Returns the push candidate set: entities with local changes awaiting
    /// acknowledgement. Inaccessible entities are never pushed.
    pub fn dirty(&self) -> Vec<T> {
        self.get_all(|e| e.sync_status() == SyncStatus::SyncNeeded, false)
    }

    /// Number of stored entities, inaccessible ones included.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// True when no entities are stored.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Persists a locally created entity.
    ///
    /// Assigns a provisional negative id, stamps the current time and marks
    /// the entity `SyncNeeded`. Returns the stored entity.
    pub fn create(&self, mut entity: T) -> T {
        let id = EntityId::new(self.next_provisional_id.fetch_sub(1, Ordering::SeqCst));
        entity.set_id(id);
        entity.meta_mut().touch_local_edit(self.time_service.now());
        entity.meta_mut().is_deleted = false;
        entity.meta_mut().is_inaccessible = false;

        self.rows.write().insert(id, entity.clone());
        trace!(%id, kind = %T::KIND, "entity created locally");
        self.feed.emit(ChangeEvent {
            id,
            kind: ChangeKind::Created,
        });
        entity
    }

    /// Persists a local edit.
    ///
    /// The write is accepted only if the incoming `at` is newer than the
    /// stored row's; otherwise the write is stale and rejected, and the
    /// caller is expected to re-read and re-apply. Accepted edits always
    /// become `SyncNeeded`.
    pub fn update(&self, mut entity: T) -> StoreResult<T> {
        let id = entity.id();
        let mut rows = self.rows.write();
        let stored = rows.get(&id).ok_or(StoreError::NotFound(id))?;

        if entity.at() <= stored.at() {
            return Err(StoreError::StaleWrite {
                id,
                incoming: entity.at(),
                stored: stored.at(),
            });
        }

        let at = entity.at();
        entity.meta_mut().touch_local_edit(at);
        rows.insert(id, entity.clone());
        drop(rows);

        self.feed.emit(ChangeEvent {
            id,
            kind: ChangeKind::Updated,
        });
        Ok(entity)
    }

    /// Merges a pulled server row with any concurrently modified local row.
    ///
    /// - Unknown locally: insert as `InSync` (unless the server reports it
    ///   deleted, in which case there is nothing to do).
    /// - Server-deleted: remove the local copy only if it is `InSync`;
    ///   unsynced local edits survive and will be pushed.
    /// - Local row dirty: local fields win unless the server row's `at` is
    ///   strictly newer (last-writer-wins tie-break).
    /// - Local row clean: overwrite with the server row.
    ///
    /// A row returned by the server is by definition accessible again, so a
    /// server-side overwrite clears `is_inaccessible`.
    pub fn update_with_conflict_resolution(&self, mut server: T) -> ConflictOutcome {
        let id = server.id();
        let meta = server.meta_mut();
        meta.sync_status = SyncStatus::InSync;
        meta.is_inaccessible = false;
        meta.last_sync_error = None;

        let mut rows = self.rows.write();
        let existing = rows.get(&id).map(|stored| (stored.sync_status(), stored.at()));
        let outcome = match existing {
            None => {
                if server.meta().server_deleted_at.is_some() {
                    return ConflictOutcome::Ignored;
                }
                rows.insert(id, server);
                ConflictOutcome::Inserted
            }
            Some((status, stored_at)) => {
                if server.meta().server_deleted_at.is_some() {
                    if status == SyncStatus::InSync {
                        rows.remove(&id);
                        ConflictOutcome::Deleted
                    } else {
                        return ConflictOutcome::KeptLocal;
                    }
                } else if status.is_dirty() && server.at() <= stored_at {
                    return ConflictOutcome::KeptLocal;
                } else {
                    rows.insert(id, server);
                    ConflictOutcome::Updated
                }
            }
        };
        drop(rows);

        let kind = match outcome {
            ConflictOutcome::Inserted => ChangeKind::Created,
            ConflictOutcome::Deleted => ChangeKind::Deleted,
            _ => ChangeKind::Updated,
        };
        self.feed.emit(ChangeEvent { id, kind });
        outcome
    }

    /// Hard-removes the given entities. Returns the number actually removed.
    ///
    /// Cleanup-only: callers must have established that every id is safe to
    /// drop (confirmed `InSync` and deleted or inaccessible server-side).
    pub fn delete_all(&self, ids: &[EntityId]) -> usize {
        let mut removed = 0;
        let mut rows = self.rows.write();
        let mut events = Vec::new();
        for &id in ids {
            if rows.remove(&id).is_some() {
                removed += 1;
                events.push(ChangeEvent {
                    id,
                    kind: ChangeKind::Deleted,
                });
            }
        }
        drop(rows);
        if removed > 0 {
            debug!(removed, kind = %T::KIND, "entities hard-removed");
        }
        for event in events {
            self.feed.emit(event);
        }
        removed
    }

    /// Flags every entity scoped to the workspace as inaccessible.
    ///
    /// No data is deleted; rows become candidates for pull-driven
    /// reconciliation or cleanup. Returns the number of rows flagged.
    pub fn mark_inaccessible(&self, workspace_id: WorkspaceId) -> usize {
        let mut flagged = 0;
        let mut rows = self.rows.write();
        let mut events = Vec::new();
        for (id, entity) in rows.iter_mut() {
            if entity.workspace_id() == Some(workspace_id) && !entity.is_inaccessible() {
                entity.meta_mut().is_inaccessible = true;
                flagged += 1;
                events.push(ChangeEvent {
                    id: *id,
                    kind: ChangeKind::Updated,
                });
            }
        }
        drop(rows);
        if flagged > 0 {
            debug!(flagged, kind = %T::KIND, %workspace_id, "entities marked inaccessible");
        }
        for event in events {
            self.feed.emit(event);
        }
        flagged
    }

    /// Clears the inaccessible flag on every entity scoped to the workspace.
    ///
    /// Access-regained counterpart of [`mark_inaccessible`]: rows stop being
    /// cleanup candidates immediately, before the refetch that reconciles
    /// them. Returns the number of rows unflagged.
    ///
    /// [`mark_inaccessible`]: DataSource::mark_inaccessible
    pub fn mark_accessible(&self, workspace_id: WorkspaceId) -> usize {
        let mut unflagged = 0;
        let mut rows = self.rows.write();
        let mut events = Vec::new();
        for (id, entity) in rows.iter_mut() {
            if entity.workspace_id() == Some(workspace_id) && entity.is_inaccessible() {
                entity.meta_mut().is_inaccessible = false;
                unflagged += 1;
                events.push(ChangeEvent {
                    id: *id,
                    kind: ChangeKind::Updated,
                });
            }
        }
        drop(rows);
        if unflagged > 0 {
            debug!(unflagged, kind = %T::KIND, %workspace_id, "entities marked accessible again");
        }
        for event in events {
            self.feed.emit(event);
        }
        unflagged
    }

    /// Marks a push candidate as in flight and returns its snapshot.
    pub fn begin_push(&self, id: EntityId) -> StoreResult<T> {
        let mut rows = self.rows.write();
        let entity = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entity.meta_mut().sync_status = SyncStatus::Syncing;
        Ok(entity.clone())
    }

    /// Records a successful push.
    ///
    /// If no local edit happened while the push was in flight the row is
    /// replaced with the server echo and becomes `InSync`. If the row turned
    /// `SyncNeeded` again in the meantime, the local fields are kept and only
    /// the server identity is adopted; the edit goes out on the next run.
    /// The row is re-keyed when the server assigned a real id over a
    /// provisional one.
    pub fn finish_push(&self, local_id: EntityId, mut server: T) -> StoreResult<T> {
        let mut rows = self.rows.write();
        let stored = rows.remove(&local_id).ok_or(StoreError::NotFound(local_id))?;

        let result = if stored.sync_status() == SyncStatus::Syncing {
            let meta = server.meta_mut();
            meta.sync_status = SyncStatus::InSync;
            meta.last_sync_error = None;
            meta.is_inaccessible = false;
            server
        } else {
            // Concurrent local edit won; keep its fields.
            let mut local = stored;
            local.adopt_server_identity(&server);
            local
        };

        rows.insert(result.id(), result.clone());
        drop(rows);

        self.feed.emit(ChangeEvent {
            id: result.id(),
            kind: ChangeKind::Updated,
        });
        Ok(result)
    }

    /// Records a push the server rejected (validation / 4xx).
    ///
    /// The entity becomes `Unsyncable` with the error message retained, and
    /// is excluded from push attempts until locally edited again.
    pub fn reject_push(&self, id: EntityId, message: impl Into<String>) -> StoreResult<T> {
        let mut rows = self.rows.write();
        let entity = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let meta = entity.meta_mut();
        meta.sync_status = SyncStatus::Unsyncable;
        meta.last_sync_error = Some(message.into());
        let snapshot = entity.clone();
        drop(rows);

        self.feed.emit(ChangeEvent {
            id,
            kind: ChangeKind::Updated,
        });
        Ok(snapshot)
    }

    /// Rolls a transient push failure back to `SyncNeeded` so the next
    /// scheduled run retries it.
    pub fn abort_push(&self, id: EntityId) -> StoreResult<()> {
        let mut rows = self.rows.write();
        let entity = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entity.sync_status() == SyncStatus::Syncing {
            entity.meta_mut().sync_status = SyncStatus::SyncNeeded;
        }
        Ok(())
    }
}
