//! The seam between the sync core and the planner backend.

use std::future::Future;

use super::types::{
  ActivityLogs, ActivityParams, DailyBundle, DailyParams, DashboardBundle, DashboardParams,
  WeeklyBundle, WeeklyParams,
};
use crate::error::SyncError;
use crate::queue::Mutation;

/// Remote data accessor.
///
/// Each page bundle is read in one call so it is cached as one unit. Writes
/// go through [`apply`](Self::apply), which is also what the offline queue
/// replays.
pub trait PlannerAccessor: Send + Sync + 'static {
  fn fetch_dashboard(
    &self,
    params: DashboardParams,
  ) -> impl Future<Output = Result<DashboardBundle, SyncError>> + Send;

  fn fetch_weekly(
    &self,
    params: WeeklyParams,
  ) -> impl Future<Output = Result<WeeklyBundle, SyncError>> + Send;

  fn fetch_daily(&self, params: DailyParams) -> impl Future<Output = Result<DailyBundle, SyncError>> + Send;

  fn fetch_activity_logs(
    &self,
    params: ActivityParams,
  ) -> impl Future<Output = Result<ActivityLogs, SyncError>> + Send;

  /// Apply one write. Must be safe to call again after a transient failure.
  fn apply(&self, mutation: Mutation) -> impl Future<Output = Result<(), SyncError>> + Send;
}
