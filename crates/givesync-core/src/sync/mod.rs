//! Mutation queue ownership, replay, and scheduling.

mod coordinator;
mod scheduler;
mod state;

pub use coordinator::{DrainReport, EnqueueAck, ReplayPolicy, SyncCoordinator};
pub use scheduler::{ChannelScheduler, NullScheduler, SyncScheduler, SyncTag};
pub use state::{SyncState, SyncStatus};
