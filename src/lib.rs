//! # guardmap
//!
//! A thread-safe generic key-value map built on a single reader/writer lock.
//!
//! ## Features
//!
//! - **Atomic compound operations**: get-or-set and set-if-absent run in one critical section
//! - **Lazy insertion**: compute missing values outside the lock, or under it when the
//!   computation must happen exactly once
//! - **Batch and structural operations**: batch set/remove, merge, flip, replace and deep clone
//! - **Snapshots**: keys, values and the full mapping copied out under a read lock
//!
//! ## Quick Start
//!
//! ```rust
//! use guardmap::ConcurrentMap;
//!
//! let map = ConcurrentMap::new();
//! map.set("a", 1);
//! assert_eq!(map.get_or_set("a", 2), 1);
//! assert!(map.set_if_not_exist("b", 2));
//! assert_eq!(map.len(), 2);
//! ```
//!
//! ## Thread Safety
//!
//! `ConcurrentMap<K, V>` is `Send + Sync` whenever `K` and `V` are. Share it
//! with an `Arc`; every operation takes `&self`.
//!
//! ## Metrics
//!
//! Each map carries opt-in counters, see [`metrics::MetricsCollector`].

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod map;
pub mod metrics;

pub use crate::map::{ConcurrentMap, FxHashMap};

/// Common utilities and helper types
pub mod util {
    /// Cache line size for alignment purposes
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Pad a value to its own cache line
    #[repr(align(64))]
    pub struct CachePadded<T> {
        value: T,
    }

    impl<T> CachePadded<T> {
        /// Create a new cache-padded value
        #[inline]
        pub const fn new(value: T) -> Self {
            Self { value }
        }

        /// Get a reference to the inner value
        #[inline]
        pub const fn get(&self) -> &T {
            &self.value
        }

        /// Get a mutable reference to the inner value
        #[inline]
        pub fn get_mut(&mut self) -> &mut T {
            &mut self.value
        }

        /// Get the inner value
        #[inline]
        pub fn into_inner(self) -> T {
            self.value
        }
    }

    impl<T: core::fmt::Debug> core::fmt::Debug for CachePadded<T> {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            core::fmt::Debug::fmt(&self.value, f)
        }
    }
}
