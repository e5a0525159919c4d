pub mod cache;
pub mod command;
pub mod config;
pub mod context;
pub mod ffi;
pub mod listeners;
pub mod logging;
pub mod merge;
pub mod mutation;
pub mod network;
pub mod queue;
pub mod submit;
pub mod sync;

pub use cache::{CacheSnapshot, QueryCache, QueryKey};
pub use command::{LabourCommand, LabourUpdateType};
pub use config::{ConfigError, RejectionPolicy, SyncConfig};
pub use context::{ContextError, SyncContext};
pub use listeners::{ListenerSet, Subscription};
pub use mutation::{MutationError, MutationLayer, MutationOutcome, OptimisticAction};
pub use network::{HttpReachabilityProbe, NetworkMonitor, NetworkSnapshot, ReachabilityProbe};
pub use queue::{CommandQueue, DeadLetter, QueueError, QueuedCommand};
pub use submit::{
    CommandSubmitter, HttpCommandClient, StaticToken, SubmitOutcome, TokenProvider, TransportError,
};
pub use sync::{DrainOutcome, SkipReason, SyncError, SyncManager, SyncReport, SyncState, SyncStatus};
