//! Typed state results.
//!
//! Every state invocation produces exactly one transition (or an error).
//! Multiple logical steps are separate states chained by the graph driver,
//! never multiple emissions from one state.

use timekeep_core::{EntityId, EntityKind, WorkspaceId};

/// The single result of one state invocation, carrying a typed payload to
/// the next stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<P> {
    /// The state completed; the payload feeds the next stage.
    Done(P),
    /// The state had no work (e.g. empty push candidate set).
    NothingToDo,
}

impl<P> Transition<P> {
    /// Returns the payload of a `Done` transition.
    pub fn into_done(self) -> Option<P> {
        match self {
            Transition::Done(payload) => Some(payload),
            Transition::NothingToDo => None,
        }
    }
}

/// A retryable failure scoped to one (workspace, entity type) pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeError {
    /// Workspace the fetch targeted, if workspace-scoped.
    pub workspace_id: Option<WorkspaceId>,
    /// Entity type the fetch targeted.
    pub kind: EntityKind,
    /// Failure message.
    pub message: String,
}

/// Aggregate result of one entity type's pull across all workspaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Rows the server returned.
    pub fetched: usize,
    /// Rows that changed the local store (inserted, updated, or deleted).
    pub applied: usize,
    /// Rows where unsynced local edits won the merge.
    pub kept_local: usize,
    /// Per-scope retryable failures; the affected watermarks did not
    /// advance.
    pub errors: Vec<ScopeError>,
}

impl PullSummary {
    /// Merges another summary into this one.
    pub fn absorb(&mut self, other: PullSummary) {
        self.fetched += other.fetched;
        self.applied += other.applied;
        self.kept_local += other.kept_local;
        self.errors.extend(other.errors);
    }
}

/// Aggregate result of one entity type's push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
    /// Entities acknowledged by the server.
    pub pushed: usize,
    /// Entities the server rejected (now `Unsyncable`).
    pub rejected: usize,
    /// Transient per-entity failures, retried on the next run.
    pub transient: Vec<(EntityId, String)>,
}

impl PushSummary {
    /// Merges another summary into this one.
    pub fn absorb(&mut self, other: PushSummary) {
        self.pushed += other.pushed;
        self.rejected += other.rejected;
        self.transient.extend(other.transient);
    }
}

/// Aggregate result of the cleanup graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Rows hard-removed from the local store.
    pub deleted: usize,
}
