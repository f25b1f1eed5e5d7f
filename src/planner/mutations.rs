//! Constructors for the writes the planner pages make.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;

use super::types::{Resource, TaskStatus};
use crate::queue::{ActionKind, Mutation};

pub fn update_task_status(task_id: &str, status: TaskStatus) -> Mutation {
  Mutation::new(
    ActionKind::Update,
    Resource::Task.target(task_id),
    json!({ "status": status }),
  )
}

pub fn delete_task(task_id: &str) -> Mutation {
  Mutation::new(ActionKind::Delete, Resource::Task.target(task_id), json!(null))
}

/// Journal entries are keyed by day, so saving one is an update of that day.
pub fn save_journal(date: NaiveDate, content: &str) -> Mutation {
  Mutation::new(
    ActionKind::Update,
    Resource::Journal.target(date.format("%Y-%m-%d").to_string()),
    json!({ "date": date, "content": content }),
  )
}

pub fn log_time(task_id: Option<&str>, started_at: DateTime<Utc>, duration: chrono::Duration) -> Mutation {
  let id = format!("{}", started_at.timestamp_millis());
  Mutation::new(
    ActionKind::Create,
    Resource::TimeEntry.target(id),
    json!({
      "task_id": task_id,
      "started_at": started_at,
      "duration_secs": duration.num_seconds(),
    }),
  )
}

pub fn update_goal_progress(goal_id: &str, week: u32, progress: u8) -> Mutation {
  Mutation::new(
    ActionKind::Update,
    Resource::Progress.target(format!("{}:{}", goal_id, week)),
    json!({ "goal_id": goal_id, "week": week, "progress": progress.min(100) }),
  )
}
