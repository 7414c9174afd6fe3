//! Durable, versioned response stores.
//!
//! This module provides the request→response stores the router and the
//! lifecycle controller work against:
//! - Named stores whose names embed a deployment version tag
//! - Entries keyed by request method + URL (last write wins)
//! - Atomic batch writes so install never leaves a partial shell store
//! - Lookups across every open store

mod key;
mod storage;
mod traits;

pub use key::RequestKey;
pub use storage::SqliteStorage;
pub use traits::{CachedResponse, StoreError, StoreManager};
