//! Planner domain: records, page bundles, query keys and the backend seam.

mod accessor;
mod client;
#[cfg(test)]
pub(crate) mod fake;
mod keys;
pub mod mutations;
mod types;

pub use accessor::PlannerAccessor;
pub use client::HttpAccessor;
pub use keys::PlannerQueryKey;
pub use types::*;
