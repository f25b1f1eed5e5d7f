//! Planner records and the per-page bundles built from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::calendar::QuarterRef;
use crate::queue::Target;

/// Quarterly goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
  pub id: String,
  pub title: String,
  pub year: i32,
  pub quarter: u8,
  #[serde(default)]
  pub description: Option<String>,
  /// 0..=100
  #[serde(default)]
  pub progress: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
  Todo,
  InProgress,
  Done,
}

impl TaskStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Todo => "TODO",
      TaskStatus::InProgress => "IN_PROGRESS",
      TaskStatus::Done => "DONE",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
      "TODO" => Ok(TaskStatus::Todo),
      "IN_PROGRESS" => Ok(TaskStatus::InProgress),
      "DONE" => Ok(TaskStatus::Done),
      other => Err(format!("unknown task status '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  pub title: String,
  pub status: TaskStatus,
  #[serde(default)]
  pub goal_id: Option<String>,
  /// Day the task is scheduled for, if any
  #[serde(default)]
  pub date: Option<NaiveDate>,
  #[serde(default)]
  pub week: Option<u32>,
}

/// Recurring personal rule shown on the weekly page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
  pub id: String,
  pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyProgress {
  pub goal_id: String,
  pub week: u32,
  pub progress: u8,
  #[serde(default)]
  pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
  pub date: NaiveDate,
  pub content: String,
  #[serde(default)]
  pub mood: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
  pub id: String,
  #[serde(default)]
  pub task_id: Option<String>,
  pub started_at: DateTime<Utc>,
  pub duration_secs: i64,
  #[serde(default)]
  pub note: Option<String>,
}

/// One line of the activity feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLog {
  pub id: String,
  pub at: DateTime<Utc>,
  pub kind: String,
  pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
  pub total_goals: u32,
  pub completed_tasks: u32,
  pub open_tasks: u32,
  /// Tracked time this quarter
  pub tracked_secs: i64,
}

// ============================================================================
// Bundles
// ============================================================================

/// Quarter overview page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardBundle {
  #[serde(default)]
  pub goals: Vec<Goal>,
  #[serde(default)]
  pub metrics: DashboardMetrics,
}

/// Weekly sync page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyBundle {
  #[serde(default)]
  pub goals: Vec<Goal>,
  #[serde(default)]
  pub progress: Vec<WeeklyProgress>,
  #[serde(default)]
  pub rules: Vec<Rule>,
  #[serde(default)]
  pub tasks: Vec<Task>,
}

/// Daily sync page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyBundle {
  #[serde(default)]
  pub tasks: Vec<Task>,
  #[serde(default)]
  pub journal: Option<JournalEntry>,
  #[serde(default)]
  pub time_entries: Vec<TimeEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogs {
  #[serde(default)]
  pub entries: Vec<ActivityLog>,
}

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardParams {
  pub quarter: QuarterRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyParams {
  pub quarter: QuarterRef,
  pub week: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyParams {
  pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityParams {
  pub date: NaiveDate,
}

// ============================================================================
// Resources
// ============================================================================

/// Writable server resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
  Goal,
  Task,
  Rule,
  Progress,
  Journal,
  TimeEntry,
}

impl Resource {
  /// Path segment under `/api/`, also used as [`Target::resource`].
  pub fn as_str(&self) -> &'static str {
    match self {
      Resource::Goal => "goals",
      Resource::Task => "tasks",
      Resource::Rule => "rules",
      Resource::Progress => "progress",
      Resource::Journal => "journal",
      Resource::TimeEntry => "time-entries",
    }
  }

  pub fn target(&self, id: impl Into<String>) -> Target {
    Target::new(self.as_str(), id)
  }

  /// Cache key families whose bundles embed this resource.
  pub fn invalidates(&self) -> &'static [&'static str] {
    match self {
      Resource::Goal => &["dashboard", "weekly"],
      Resource::Task => &["dashboard", "weekly", "daily"],
      Resource::Rule => &["weekly"],
      Resource::Progress => &["dashboard", "weekly"],
      Resource::Journal => &["daily", "activity-logs"],
      Resource::TimeEntry => &["dashboard", "daily", "activity-logs"],
    }
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Resource {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "goals" => Ok(Resource::Goal),
      "tasks" => Ok(Resource::Task),
      "rules" => Ok(Resource::Rule),
      "progress" => Ok(Resource::Progress),
      "journal" => Ok(Resource::Journal),
      "time-entries" => Ok(Resource::TimeEntry),
      other => Err(format!("unknown resource '{}'", other)),
    }
  }
}
