//! In-memory accessor for tests of the sync layer.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::accessor::PlannerAccessor;
use super::types::{
  ActivityLog, ActivityLogs, ActivityParams, DailyBundle, DailyParams, DashboardBundle,
  DashboardMetrics, DashboardParams, JournalEntry, Task, TaskStatus, WeeklyBundle, WeeklyParams,
};
use crate::error::SyncError;
use crate::queue::Mutation;

/// Records calls and applied writes. Reads reflect the writes applied so far.
#[derive(Default)]
pub(crate) struct FakeAccessor {
  calls: Mutex<HashMap<&'static str, usize>>,
  applied: Mutex<Vec<Mutation>>,
  read_error: Mutex<Option<SyncError>>,
  write_error: Mutex<Option<SyncError>>,
  delay: Mutex<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeAccessor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn calls(&self, op: &str) -> usize {
    lock(&self.calls).get(op).copied().unwrap_or(0)
  }

  pub fn applied(&self) -> Vec<Mutation> {
    lock(&self.applied).clone()
  }

  pub fn fail_reads(&self, err: Option<SyncError>) {
    *lock(&self.read_error) = err;
  }

  pub fn fail_writes(&self, err: Option<SyncError>) {
    *lock(&self.write_error) = err;
  }

  pub fn set_delay(&self, delay: Duration) {
    *lock(&self.delay) = delay;
  }

  /// Count a call and wait out the configured delay. Returns the call number.
  async fn call(&self, op: &'static str, error: &Mutex<Option<SyncError>>) -> Result<usize, SyncError> {
    let n = {
      let mut calls = lock(&self.calls);
      let n = calls.entry(op).or_insert(0);
      *n += 1;
      *n
    };
    let delay = *lock(&self.delay);
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    match lock(error).clone() {
      Some(err) => Err(err),
      None => Ok(n),
    }
  }

  fn task_statuses(&self) -> Vec<Task> {
    let mut tasks: Vec<Task> = Vec::new();
    for m in lock(&self.applied).iter().filter(|m| m.target.resource == "tasks") {
      let Some(status) = m.payload["status"].as_str().and_then(|s| s.parse::<TaskStatus>().ok()) else {
        continue;
      };
      match tasks.iter_mut().find(|t| t.id == m.target.id) {
        Some(task) => task.status = status,
        None => tasks.push(Task {
          id: m.target.id.clone(),
          title: format!("task {}", m.target.id),
          status,
          goal_id: None,
          date: None,
          week: None,
        }),
      }
    }
    tasks
  }
}

impl PlannerAccessor for FakeAccessor {
  async fn fetch_dashboard(&self, _params: DashboardParams) -> Result<DashboardBundle, SyncError> {
    let n = self.call("dashboard", &self.read_error).await?;
    Ok(DashboardBundle {
      goals: Vec::new(),
      metrics: DashboardMetrics {
        total_goals: n as u32,
        ..Default::default()
      },
    })
  }

  async fn fetch_weekly(&self, params: WeeklyParams) -> Result<WeeklyBundle, SyncError> {
    self.call("weekly", &self.read_error).await?;
    let mut tasks = vec![Task {
      id: format!("w{}", params.week),
      title: format!("week {}", params.week),
      status: TaskStatus::Todo,
      goal_id: None,
      date: None,
      week: Some(params.week),
    }];
    tasks.extend(self.task_statuses());
    Ok(WeeklyBundle {
      tasks,
      ..Default::default()
    })
  }

  async fn fetch_daily(&self, params: DailyParams) -> Result<DailyBundle, SyncError> {
    self.call("daily", &self.read_error).await?;
    let journal = lock(&self.applied)
      .iter()
      .filter(|m| m.target.resource == "journal" && m.target.id == params.date.format("%Y-%m-%d").to_string())
      .last()
      .map(|m| JournalEntry {
        date: params.date,
        content: m.payload["content"].as_str().unwrap_or_default().to_string(),
        mood: None,
      });
    Ok(DailyBundle {
      tasks: self.task_statuses(),
      journal,
      time_entries: Vec::new(),
    })
  }

  async fn fetch_activity_logs(&self, _params: ActivityParams) -> Result<ActivityLogs, SyncError> {
    self.call("activity_logs", &self.read_error).await?;
    let at: DateTime<Utc> = DateTime::UNIX_EPOCH;
    let entries = lock(&self.applied)
      .iter()
      .enumerate()
      .map(|(i, m)| ActivityLog {
        id: i.to_string(),
        at,
        kind: m.target.resource.clone(),
        summary: m.target.to_string(),
      })
      .collect();
    Ok(ActivityLogs { entries })
  }

  async fn apply(&self, mutation: Mutation) -> Result<(), SyncError> {
    self.call("apply", &self.write_error).await?;
    lock(&self.applied).push(mutation);
    Ok(())
  }
}
