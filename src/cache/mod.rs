//! Generation-partitioned response cache.
//!
//! This module provides the storage side of the worker:
//! - Named, versioned generations of URL -> response entries
//! - Normalized request keys (method + absolute URL, GET only)
//! - An in-memory backend for tests and a SQLite backend for durable caching

mod generations;
mod key;
mod response;
mod store;

pub use generations::{Generations, CACHE_PREFIX};
pub use key::RequestKey;
pub use response::{ResponseSource, ServedResponse, StoredResponse};
pub use store::{CacheStore, MemoryStore, SqliteStore};
