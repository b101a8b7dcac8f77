//! 缓存模块：通用的有界 LRU 容器，以及基于它的正则缓存与响应缓存键。
//!
//! # Bounded Caching Module
//!
//! One eviction policy, reused everywhere: [`BoundedCache`] knows nothing
//! about what it stores. It backs compiled-pattern memoization
//! ([`PatternCache`]) and the orchestrator's optional response memoization
//! keyed by [`CacheKey`].
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BoundedCache`] | Thread-safe LRU with hit/miss/eviction counters |
//! | [`CacheEntry`] | Value plus creation time, last access and access count |
//! | [`CacheStats`] | Counter snapshot with `hit_ratio()` |
//! | [`PatternCache`] | Compiled `regex::Regex` keyed by pattern and flags |
//! | [`CacheKeyGenerator`] | SHA-256 key for a (backend, request) pair |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_fanout::cache::BoundedCache;
//!
//! let cache = BoundedCache::new(2).unwrap();
//! cache.set("a", 1);
//! cache.set("b", 2);
//! cache.get(&"a");
//! assert_eq!(cache.set("c", 3), Some("b"));
//! assert!(cache.stats().hit_ratio() > 0.99);
//! ```

mod bounded;
mod key;
mod pattern;

pub use bounded::{BoundedCache, CacheEntry, CacheStats};
pub use key::{CacheKey, CacheKeyGenerator};
pub use pattern::PatternCache;
