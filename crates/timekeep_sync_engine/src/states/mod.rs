//! Individual sync states.
//!
//! A state is one atomic step of a sync graph: it reads collaborators it
//! was constructed with, performs at most one kind of side effect, and
//! resolves to a single [`Transition`](crate::transition::Transition).
//! Sequencing and fan-out live in the graph drivers, not here.

pub mod cleanup;
pub mod pull;
pub mod push;

pub use cleanup::{DeleteInaccessibleEntitiesState, DeleteOldTimeEntriesState};
pub use pull::{
    MarkWorkspacesInaccessibleState, PersistUserState, PullEntityState, PullWorkspacesState,
    ResetSinceParamsState, RestoreWorkspaceAccessState, TrySetDefaultWorkspaceState,
    WorkspaceChanges,
};
pub use push::{PushEntityState, PushUserState};
