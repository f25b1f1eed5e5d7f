//! Client-side sync core for Better Planner.
//!
//! - [`calendar`]: week and quarter arithmetic
//! - [`cache`]: stale-while-revalidate fetch cache
//! - [`queue`]: persisted offline write queue
//! - [`sync`]: page hooks built from the two, owned by a [`sync::SyncContext`]
//! - [`planner`]: domain records and the HTTP backend

pub mod cache;
pub mod calendar;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod planner;
pub mod queue;
pub mod schedule;
pub mod sync;

pub use error::SyncError;
