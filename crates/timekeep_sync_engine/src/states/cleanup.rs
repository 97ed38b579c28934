//! Cleanup graph states.
//!
//! Cleanup runs after pull and push, so every row it inspects has had a
//! chance to be reconciled first. Only rows whose state the server has
//! acknowledged (`InSync`) are ever hard-removed; unsynced edits are kept
//! even when their workspace is gone.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::transition::{CleanupSummary, Transition};
use std::sync::Arc;
use timekeep_core::{DataSource, Syncable, SyncStatus, TimeEntry, TimeService};
use tracing::{debug, info};

/// Predicate deciding whether an inaccessible, in-sync row may be removed.
///
/// Most entity types are always suitable; time entries keep the running
/// entry alive even when its workspace became inaccessible.
pub type SuitableForDeletion<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Hard-removes entities whose workspace became inaccessible, once their
/// local state is fully acknowledged by the server.
pub struct DeleteInaccessibleEntitiesState<T: Syncable> {
    source: Arc<DataSource<T>>,
    suitable: SuitableForDeletion<T>,
}

impl<T: Syncable> DeleteInaccessibleEntitiesState<T> {
    /// Creates the state; every in-sync inaccessible row is removable.
    pub fn new(source: Arc<DataSource<T>>) -> Self {
        Self::with_suitability(source, Box::new(|_| true))
    }

    /// Creates the state with an extra suitability predicate.
    pub fn with_suitability(source: Arc<DataSource<T>>, suitable: SuitableForDeletion<T>) -> Self {
        Self { source, suitable }
    }

    /// Removes the suitable rows. The payload is the number removed.
    pub async fn start(&self) -> SyncResult<Transition<CleanupSummary>> {
        let victims: Vec<_> = self
            .source
            .get_all(
                |e| {
                    e.is_inaccessible()
                        && e.sync_status() == SyncStatus::InSync
                        && (self.suitable)(e)
                },
                true,
            )
            .iter()
            .map(|e| e.id())
            .collect();

        if victims.is_empty() {
            return Ok(Transition::NothingToDo);
        }

        let deleted = self.source.delete_all(&victims);
        info!(kind = %T::KIND, deleted, "inaccessible entities removed");
        Ok(Transition::Done(CleanupSummary { deleted }))
    }
}

impl DeleteInaccessibleEntitiesState<TimeEntry> {
    /// Time entry variant: the running entry is never removed.
    pub fn for_time_entries(source: Arc<DataSource<TimeEntry>>) -> Self {
        Self::with_suitability(source, Box::new(|entry| !entry.is_running()))
    }
}

/// Purges acknowledged time entries that fell out of the retention window.
///
/// The cutoff comparison is strict: an entry starting exactly at
/// `now - retention_window` survives. Dirty entries are never purged, no
/// matter how old; inaccessible entries are left to the inaccessible-entity
/// state.
pub struct DeleteOldTimeEntriesState {
    source: Arc<DataSource<TimeEntry>>,
    time_service: Arc<dyn TimeService>,
    config: SyncConfig,
}

impl DeleteOldTimeEntriesState {
    /// Creates the state.
    pub fn new(
        source: Arc<DataSource<TimeEntry>>,
        time_service: Arc<dyn TimeService>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            time_service,
            config,
        }
    }

    /// Purges entries older than the retention window.
    pub async fn start(&self) -> SyncResult<Transition<CleanupSummary>> {
        let cutoff = self.time_service.now() - self.config.retention_window;
        let victims: Vec<_> = self
            .source
            .get_all(
                |entry| entry.start < cutoff && entry.sync_status() == SyncStatus::InSync,
                false,
            )
            .iter()
            .map(|entry| entry.id)
            .collect();

        if victims.is_empty() {
            return Ok(Transition::NothingToDo);
        }

        let deleted = self.source.delete_all(&victims);
        debug!(deleted, %cutoff, "old time entries purged");
        Ok(Transition::Done(CleanupSummary { deleted }))
    }
}
