//! Result Store
//!
//! Bounded, thread-safe cache of classified panels with oldest-collected eviction.

mod store;

pub use store::{InsertOutcome, ResultStore, StoreStats, DEFAULT_CAPACITY};
