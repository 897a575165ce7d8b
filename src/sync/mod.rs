//! Offline-first sync: the durable queue, connectivity tracking, the
//! backend client and the engine that drains one into the other.

pub mod backend;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod queue;

pub use backend::{Backend, HttpBackend, SubmitResponse};
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use engine::{DrainOutcome, DrainReport, EngineState, SyncConfig, SyncEngine};
pub use error::SyncError;
pub use queue::{PersistentFailure, SyncItemType, SyncQueue, SyncQueueItem};
