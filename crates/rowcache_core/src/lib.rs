//! # rowcache core
//!
//! A transparent, index-backed caching layer between a record store
//! and a distributed key-value cache.
//!
//! rowcache maintains secondary indexes over query fields ("records
//! where `color_id = 9`") as versioned, TTL-bounded entries in the
//! cache, without the caller managing cache keys, staleness, or
//! invalidation races:
//!
//! - [`Scope`] restricts an index to records matching a static
//!   predicate
//! - [`VersionStore`] stamps entries per entity type and makes coarse
//!   invalidation a single atomic increment
//! - [`EntryStore`] and [`CacheEntry`] implement the versioned entry
//!   protocol with lazy staleness detection
//! - [`Index`] populates, serves, and corrects one field-tuple mapping
//! - [`IndexRegistry`] dispatches queries to indexes and shares them
//!   across entity subtypes
//! - [`InvalidationCoordinator`] keeps indexes correct across
//!   transactional commit and rollback, and around bulk writes
//!
//! Staleness is tolerated and resolved by versioning, not prevented by
//! locking: concurrent writers may race on one entry, and the
//! version/TTL mechanism bounds the damage.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod coordinator;
mod entry;
mod error;
mod index;
mod record;
mod registry;
mod scope;
mod store;
#[cfg(test)]
mod testing;
mod types;
mod value;
mod version;

pub use cache::RecordCache;
pub use config::CacheConfig;
pub use coordinator::{InvalidationCoordinator, PendingInvalidation};
pub use entry::{CacheEntry, EntryPayload, EntryStore};
pub use error::{CacheError, CacheResult};
pub use index::{
    CorrectionAction, FindMode, Index, IndexKey, IndexSpec, Resolved, Staged, StorageMode,
};
pub use record::{RawRecord, RecordChange, ID_FIELD, TYPE_FIELD};
pub use registry::{Dispatch, IndexRegistry, QueryResult};
pub use scope::Scope;
pub use store::{Condition, RecordStore, StoreError, StoreResult};
pub use types::{RecordId, Version};
pub use value::FieldValue;
