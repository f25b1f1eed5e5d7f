//! Query keys for planner bundles.

use chrono::NaiveDate;

use crate::cache::{CacheKey, QueryKey};

use super::types::{ActivityParams, DailyParams, DashboardParams, WeeklyParams};

/// Query key types for planner API calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlannerQueryKey {
  /// Quarter overview
  Dashboard { year: i32, quarter: u8 },
  /// Weekly sync page for one week of a quarter
  Weekly { year: i32, quarter: u8, week: u32 },
  /// Daily sync page
  Daily { date: NaiveDate },
  /// Activity feed for one day
  ActivityLogs { date: NaiveDate },
}

impl PlannerQueryKey {
  /// Resource family of every key of this kind.
  pub fn resource(&self) -> &'static str {
    match self {
      Self::Dashboard { .. } => "dashboard",
      Self::Weekly { .. } => "weekly",
      Self::Daily { .. } => "daily",
      Self::ActivityLogs { .. } => "activity-logs",
    }
  }
}

impl QueryKey for PlannerQueryKey {
  fn cache_key(&self) -> CacheKey {
    let params = match self {
      Self::Dashboard { year, quarter } => format!("{}:{}", year, quarter),
      Self::Weekly { year, quarter, week } => format!("{}:{}:{}", year, quarter, week),
      Self::Daily { date } | Self::ActivityLogs { date } => date.format("%Y-%m-%d").to_string(),
    };
    CacheKey::new(format!("{}:{}", self.resource(), params))
  }

  fn description(&self) -> String {
    match self {
      Self::Dashboard { year, quarter } => format!("dashboard {}-Q{}", year, quarter),
      Self::Weekly { year, quarter, week } => {
        format!("weekly sync {}-Q{} week {}", year, quarter, week)
      }
      Self::Daily { date } => format!("daily sync {}", date),
      Self::ActivityLogs { date } => format!("activity on {}", date),
    }
  }
}

impl From<&DashboardParams> for PlannerQueryKey {
  fn from(params: &DashboardParams) -> Self {
    Self::Dashboard {
      year: params.quarter.year,
      quarter: params.quarter.quarter,
    }
  }
}

impl From<&WeeklyParams> for PlannerQueryKey {
  fn from(params: &WeeklyParams) -> Self {
    Self::Weekly {
      year: params.quarter.year,
      quarter: params.quarter.quarter,
      week: params.week,
    }
  }
}

impl From<&DailyParams> for PlannerQueryKey {
  fn from(params: &DailyParams) -> Self {
    Self::Daily { date: params.date }
  }
}

impl From<&ActivityParams> for PlannerQueryKey {
  fn from(params: &ActivityParams) -> Self {
    Self::ActivityLogs { date: params.date }
  }
}
