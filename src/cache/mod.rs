//! Persistent response cache for offline support.
//!
//! This module provides:
//! - Request identity (method + URL) with stable hashed storage keys
//! - Named cache stores, one per generation, in a single SQLite database
//! - Lookup within one store or across all stores

mod storage;
mod traits;

pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CachedResponse, RequestKey, ResponseSource, ServedResponse};
