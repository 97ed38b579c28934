//! # TimeKeep Core
//!
//! Local store facade for the TimeKeep sync engine.
//!
//! This crate provides:
//! - The syncable entity model (time entries, projects, clients, tags,
//!   tasks, workspaces, user)
//! - Per-entity-type data sources with dirty tracking, conflict-aware
//!   updates, and change notification feeds
//! - The singleton user data source
//! - The since-parameter (watermark) repository for incremental pulls
//! - The time source abstraction
//!
//! The physical storage engine and the wire protocol live outside this
//! crate; data sources confine their side effects to the backing store and
//! never talk to the network.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod clock;
mod data_source;
mod error;
mod model;
mod since;
mod singleton;
mod store;
mod types;

pub use change_feed::{ChangeEvent, ChangeFeed, ChangeKind};
pub use clock::{ManualTimeService, SystemTimeService, TimeService};
pub use data_source::{ConflictOutcome, DataSource};
pub use error::{StoreError, StoreResult};
pub use model::{Project, ProjectClient, Syncable, Tag, Task, TimeEntry, User, Workspace};
pub use since::SinceParameters;
pub use singleton::UserDataSource;
pub use store::LocalStore;
pub use types::{EntityId, EntityKind, SyncMetadata, SyncStatus, WorkspaceId};
