//! # Timekeep Sync Engine
//!
//! Offline-first synchronization engine for the Timekeep client.
//!
//! This crate provides:
//! - Pull / push / cleanup sync graphs built from single-purpose states
//! - Incremental pulls with per-(workspace, type) watermarks
//! - Conflict-aware merging (dirty local edits win unless the server row
//!   is strictly newer)
//! - Push bookkeeping with provisional-id reconciliation
//! - A session-owned orchestrator with a progress stream, trigger
//!   coalescing, and a freeze handshake for logout
//! - Mock endpoints for testing without a server
//!
//! ## Architecture
//!
//! Each run executes **pull → push → cleanup**:
//! 1. Pull remote changes first so pushes see the merged state
//! 2. Push dirty local entities, merging server-assigned identities back
//! 3. Clean up inaccessible and out-of-retention rows the server has
//!    acknowledged
//!
//! A single runner task owns the graphs, which makes at-most-one-run
//! in flight structural rather than lock-enforced.
//!
//! ## Key Invariants
//!
//! - Watermarks advance to the request time, never to entity timestamps
//! - Unsynced local edits are never discarded by pulls or cleanup
//! - A fatal error halts the run; retryable errors wait for the next one
//! - After `freeze()` resolves, no state is or will be mid-flight

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod config;
mod error;
mod graph;
mod orchestrator;
mod queue;
mod states;
mod transition;

pub use api::{
    ApiError, ApiResult, EntityEndpoint, MockApi, MockEndpoint, MockUserEndpoint,
    MockWorkspacesEndpoint, SyncApi, UserEndpoint, WorkspacesEndpoint,
};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use graph::SyncGraphs;
pub use orchestrator::{SyncOrchestrator, SyncPhase};
pub use queue::SyncTrigger;
pub use states::{
    DeleteInaccessibleEntitiesState, DeleteOldTimeEntriesState, MarkWorkspacesInaccessibleState,
    PersistUserState, PullEntityState, PullWorkspacesState, PushEntityState, PushUserState,
    ResetSinceParamsState, RestoreWorkspaceAccessState, TrySetDefaultWorkspaceState,
    WorkspaceChanges,
};
pub use transition::{CleanupSummary, PullSummary, PushSummary, ScopeError, Transition};
