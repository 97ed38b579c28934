//! Since-parameter (watermark) repository.
//!
//! Stores, per workspace and per entity type, the timestamp through which
//! that type has been fully pulled. A watermark is created lazily on the
//! first pull for a workspace and only ever advances after a pull for that
//! scope completed without error. [`SinceParameters::reset`] clears every
//! watermark to force the next pull graph to fetch the complete remote
//! history (wiped local store, suspected staleness).

use crate::types::{EntityKind, WorkspaceId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Watermark storage keyed by (workspace, entity type).
#[derive(Default)]
pub struct SinceParameters {
    watermarks: RwLock<HashMap<(WorkspaceId, EntityKind), DateTime<Utc>>>,
}

impl SinceParameters {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the watermark for the given scope, if one has been recorded.
    pub fn get(&self, workspace_id: WorkspaceId, kind: EntityKind) -> Option<DateTime<Utc>> {
        self.watermarks.read().get(&(workspace_id, kind)).copied()
    }

    /// Records a watermark after an error-free pull of the given scope.
    pub fn set(&self, workspace_id: WorkspaceId, kind: EntityKind, timestamp: DateTime<Utc>) {
        self.watermarks
            .write()
            .insert((workspace_id, kind), timestamp);
    }

    /// Clears every watermark.
    pub fn reset(&self) {
        self.watermarks.write().clear();
    }

    /// Clears every watermark for one workspace, forcing the next pulls to
    /// refetch its complete history (access regained after a revocation).
    pub fn reset_workspace(&self, workspace_id: WorkspaceId) {
        self.watermarks
            .write()
            .retain(|(scope, _), _| *scope != workspace_id);
    }

    /// Number of recorded watermarks.
    pub fn len(&self) -> usize {
        self.watermarks.read().len()
    }

    /// True when no watermark has been recorded.
    pub fn is_empty(&self) -> bool {
        self.watermarks.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermarks_are_scoped_per_workspace_and_kind() {
        let since = SinceParameters::new();
        let ws1 = WorkspaceId::new(1);
        let ws2 = WorkspaceId::new(2);
        let now = Utc::now();

        since.set(ws1, EntityKind::TimeEntry, now);
        assert_eq!(since.get(ws1, EntityKind::TimeEntry), Some(now));
        assert_eq!(since.get(ws1, EntityKind::Project), None);
        assert_eq!(since.get(ws2, EntityKind::TimeEntry), None);
    }

    #[test]
    fn reset_clears_everything() {
        let since = SinceParameters::new();
        let now = Utc::now();
        since.set(WorkspaceId::new(1), EntityKind::Project, now);
        since.set(WorkspaceId::new(2), EntityKind::Tag, now);
        assert_eq!(since.len(), 2);

        since.reset();
        assert!(since.is_empty());
        assert_eq!(since.get(WorkspaceId::new(1), EntityKind::Project), None);
    }

    #[test]
    fn reset_workspace_spares_other_workspaces() {
        let since = SinceParameters::new();
        let now = Utc::now();
        since.set(WorkspaceId::new(1), EntityKind::Project, now);
        since.set(WorkspaceId::new(1), EntityKind::Tag, now);
        since.set(WorkspaceId::new(2), EntityKind::Project, now);

        since.reset_workspace(WorkspaceId::new(1));
        assert_eq!(since.get(WorkspaceId::new(1), EntityKind::Project), None);
        assert_eq!(since.get(WorkspaceId::new(1), EntityKind::Tag), None);
        assert_eq!(since.get(WorkspaceId::new(2), EntityKind::Project), Some(now));
    }
}
