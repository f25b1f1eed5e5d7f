//! Page-level sync hooks composed from the fetch cache and offline queue.

mod bundle;
mod context;
mod hook;
mod status;

pub use bundle::{Bundle, BundleCaches};
pub use context::{SubmitOutcome, SyncConfig, SyncContext};
pub use hook::{HookOptions, SyncHandle, SyncState};
pub use status::{SyncIndicator, SyncStatus};
