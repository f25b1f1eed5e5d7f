use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::accessor::PlannerAccessor;
use super::types::{
  ActivityLogs, ActivityParams, DailyBundle, DailyParams, DashboardBundle, DashboardParams,
  WeeklyBundle, WeeklyParams,
};
use crate::config::Config;
use crate::error::SyncError;
use crate::queue::{ActionKind, Mutation};

/// Planner backend over HTTP/JSON.
#[derive(Clone)]
pub struct HttpAccessor {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl HttpAccessor {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_token(
      &config.server.url,
      Config::get_api_token(),
      Duration::from_secs(config.server.timeout_secs),
    )
  }

  pub fn with_token(url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
    let base = parse_base_url(url)?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("planner-sync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base, token })
  }

  fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
    self
      .base
      .join(path)
      .map_err(|e| SyncError::Rejected(format!("invalid endpoint {}: {}", path, e)))
  }

  fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
    let builder = self.client.request(method, url);
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, SyncError> {
    let url = self.endpoint(path)?;
    debug!(%url, "GET");
    let response = self
      .request(Method::GET, url)
      .query(query)
      .send()
      .await
      .map_err(classify_transport)?;
    let response = check_status(response).await?;
    response.json::<T>().await.map_err(classify_transport)
  }
}

/// Parse the server URL, making sure relative joins stay under its path.
fn parse_base_url(url: &str) -> Result<Url> {
  let mut base = Url::parse(url.trim()).map_err(|e| eyre!("Invalid server url {}: {}", url, e))?;
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  Ok(base)
}

/// Method and path for one write.
fn route(mutation: &Mutation) -> (Method, String) {
  let target = &mutation.target;
  match mutation.kind {
    ActionKind::Create => (Method::POST, format!("api/{}", target.resource)),
    ActionKind::Update => (Method::PATCH, format!("api/{}/{}", target.resource, target.id)),
    ActionKind::Delete => (Method::DELETE, format!("api/{}/{}", target.resource, target.id)),
  }
}

/// Map an HTTP status to the retry classification.
fn classify_status(status: StatusCode, body: &str) -> SyncError {
  let detail = if body.is_empty() {
    status.to_string()
  } else {
    format!("{}: {}", status, body)
  };

  match status {
    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthorized(detail),
    StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => SyncError::Network(detail),
    s if s.is_server_error() => SyncError::Network(detail),
    _ => SyncError::Rejected(detail),
  }
}

fn classify_transport(err: reqwest::Error) -> SyncError {
  if err.is_decode() {
    SyncError::Decode(err.to_string())
  } else {
    SyncError::Network(err.to_string())
  }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  Err(classify_status(status, body.trim()))
}

impl PlannerAccessor for HttpAccessor {
  async fn fetch_dashboard(&self, params: DashboardParams) -> Result<DashboardBundle, SyncError> {
    self
      .get(
        "api/dashboard",
        &[
          ("year", params.quarter.year.to_string()),
          ("quarter", params.quarter.quarter.to_string()),
        ],
      )
      .await
  }

  async fn fetch_weekly(&self, params: WeeklyParams) -> Result<WeeklyBundle, SyncError> {
    self
      .get(
        "api/weekly-sync",
        &[
          ("year", params.quarter.year.to_string()),
          ("quarter", params.quarter.quarter.to_string()),
          ("week", params.week.to_string()),
        ],
      )
      .await
  }

  async fn fetch_daily(&self, params: DailyParams) -> Result<DailyBundle, SyncError> {
    self
      .get("api/daily-sync", &[("date", params.date.format("%Y-%m-%d").to_string())])
      .await
  }

  async fn fetch_activity_logs(&self, params: ActivityParams) -> Result<ActivityLogs, SyncError> {
    self
      .get("api/activity-logs", &[("date", params.date.format("%Y-%m-%d").to_string())])
      .await
  }

  async fn apply(&self, mutation: Mutation) -> Result<(), SyncError> {
    let (method, path) = route(&mutation);
    let url = self.endpoint(&path)?;
    debug!(%method, %url, "applying mutation");

    let mut request = self.request(method, url);
    if mutation.kind != ActionKind::Delete {
      request = request.json(&mutation.payload);
    }

    let response = request.send().await.map_err(classify_transport)?;
    check_status(response).await?;
    Ok(())
  }
}
