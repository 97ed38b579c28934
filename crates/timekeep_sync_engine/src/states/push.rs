//! Push graph states.
//!
//! Pushes run only after the pull graph has finished so the candidate set
//! reflects the merged remote state. Each dirty entity is pushed
//! individually; failures are classified and never abort sibling pushes.

use crate::api::{ApiError, EntityEndpoint, UserEndpoint};
use crate::error::{SyncError, SyncResult};
use crate::transition::{PushSummary, Transition};
use std::sync::Arc;
use timekeep_core::{DataSource, SyncStatus, Syncable, UserDataSource};
use tracing::{debug, warn};

/// Pushes every dirty entity of one type.
///
/// Order within the candidate set is unspecified; each entity goes out as a
/// separate request. A `ClientRejection` parks the entity as `Unsyncable`
/// and the run continues; a transient failure rolls the entity back to
/// `SyncNeeded` for the next run; authorization loss aborts.
pub struct PushEntityState<T: Syncable> {
    endpoint: Arc<dyn EntityEndpoint<T>>,
    source: Arc<DataSource<T>>,
}

impl<T: Syncable> PushEntityState<T> {
    /// Creates the state.
    pub fn new(endpoint: Arc<dyn EntityEndpoint<T>>, source: Arc<DataSource<T>>) -> Self {
        Self { endpoint, source }
    }

    /// Pushes the dirty set.
    pub async fn start(&self) -> SyncResult<Transition<PushSummary>> {
        let candidates = self.source.dirty();
        if candidates.is_empty() {
            return Ok(Transition::NothingToDo);
        }

        let mut summary = PushSummary::default();
        for candidate in candidates {
            let local_id = candidate.id();
            let snapshot = self.source.begin_push(local_id)?;

            match self.endpoint.push(&snapshot).await {
                Ok(server) => {
                    self.source.finish_push(local_id, server)?;
                    summary.pushed += 1;
                }
                Err(ApiError::ClientRejection(message)) => {
                    warn!(%local_id, kind = %T::KIND, %message, "push rejected");
                    self.source.reject_push(local_id, message)?;
                    summary.rejected += 1;
                }
                Err(ApiError::Unauthorized) => {
                    self.source.abort_push(local_id)?;
                    return Err(SyncError::Unauthorized);
                }
                Err(err) => {
                    self.source.abort_push(local_id)?;
                    summary.transient.push((local_id, err.to_string()));
                }
            }
        }

        debug!(
            kind = %T::KIND,
            pushed = summary.pushed,
            rejected = summary.rejected,
            retry = summary.transient.len(),
            "push finished"
        );
        Ok(Transition::Done(summary))
    }
}

/// Pushes the user record when it carries unsynced edits.
pub struct PushUserState {
    endpoint: Arc<dyn UserEndpoint>,
    user: Arc<UserDataSource>,
}

impl PushUserState {
    /// Creates the state.
    pub fn new(endpoint: Arc<dyn UserEndpoint>, user: Arc<UserDataSource>) -> Self {
        Self { endpoint, user }
    }

    /// Pushes the user record if dirty.
    pub async fn start(&self) -> SyncResult<Transition<PushSummary>> {
        let user = match self.user.get() {
            Ok(user) => user,
            // No user record yet (first run before any pull): nothing to push.
            Err(_) => return Ok(Transition::NothingToDo),
        };
        if user.sync_status() != SyncStatus::SyncNeeded {
            return Ok(Transition::NothingToDo);
        }

        let snapshot = self.user.begin_push()?;
        let mut summary = PushSummary::default();
        match self.endpoint.push(&snapshot).await {
            Ok(server) => {
                self.user.finish_push(server)?;
                summary.pushed = 1;
            }
            Err(ApiError::ClientRejection(message)) => {
                warn!(%message, "user push rejected");
                self.user.reject_push(message)?;
                summary.rejected = 1;
            }
            Err(ApiError::Unauthorized) => {
                self.user.abort_push()?;
                return Err(SyncError::Unauthorized);
            }
            Err(err) => {
                self.user.abort_push()?;
                summary.transient.push((snapshot.id, err.to_string()));
            }
        }
        Ok(Transition::Done(summary))
    }
}
