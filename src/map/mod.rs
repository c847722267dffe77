//! Map implementations
//!
//! This module provides a reader/writer-locked concurrent map with atomic
//! compound operations.
//!
//! ## Available Maps
//!
//! - [`ConcurrentMap`]: shared reads, exclusive writes, lazy and conditional insertion
//!
//! ## Choosing an Insertion Operation
//!
//! - Use `get_or_set` when the value is already at hand
//! - Use `get_or_set_func` when computing the value is expensive and running it
//!   twice under a race is acceptable
//! - Use `get_or_set_func_lock` when the computation must run at most once,
//!   accepting that every other access waits for it

pub mod concurrent;

pub use self::concurrent::ConcurrentMap;

/// Backing storage handed to `read_lock_func`, `lock_func` and `into_inner`
pub use fxhash::FxHashMap;


#[cfg(test)]
mod proptests;

#[cfg(test)]
mod loom_tests;
