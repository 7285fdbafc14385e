//! Offline cache manager and the messages it understands.

mod manager;
mod message;

pub use manager::{
  ActivateReport, FetchOutcome, InstallReport, LifecycleState, OfflineCacheManager,
};
pub use message::{ControlMessage, MessageOutcome};
