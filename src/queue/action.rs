use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
  Create,
  Update,
  Delete,
}

/// Logical resource a mutation applies to (e.g. task `5`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
  pub resource: String,
  pub id: String,
}

impl Target {
  pub fn new(resource: impl Into<String>, id: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      id: id.into(),
    }
  }
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.resource, self.id)
  }
}

/// A write the user asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
  pub kind: ActionKind,
  pub target: Target,
  #[serde(default)]
  pub payload: Value,
}

impl Mutation {
  pub fn new(kind: ActionKind, target: Target, payload: Value) -> Self {
    Self {
      kind,
      target,
      payload,
    }
  }
}

/// A mutation recorded while it could not reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
  /// Unique and increasing over the life of the store
  pub id: u64,
  #[serde(flatten)]
  pub mutation: Mutation,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay attempts so far
  #[serde(default)]
  pub attempts: u32,
  #[serde(default)]
  pub last_error: Option<String>,
}

impl QueuedAction {
  pub fn target(&self) -> &Target {
    &self.mutation.target
  }
}

/// Everything the queue persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
  /// Id handed to the next enqueued action
  pub next_id: u64,
  pub actions: Vec<QueuedAction>,
}

impl Default for QueueSnapshot {
  fn default() -> Self {
    Self {
      next_id: 1,
      actions: Vec::new(),
    }
  }
}
