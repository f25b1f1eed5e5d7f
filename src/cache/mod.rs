//! Generic stale-while-revalidate fetch cache.
//!
//! This module provides a planner-agnostic caching mechanism that:
//! - Serves cached values immediately and refreshes them in the background
//! - Shares one outstanding request between concurrent readers of a key
//! - Orders responses by generation so a slow, older response never wins
//! - Publishes every settled value to all subscribers of the key

mod layer;
mod loading;
mod traits;

pub use layer::{fetcher, FetchCache, Fetcher, PendingFetch, Subscription};
pub use loading::{LoadingGuard, LoadingTracker};
pub use traits::{CacheKey, CacheResult, CacheSource, FetchOptions, QueryKey, Snapshot};
