//! Queued mutation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::store::{IndexValues, Record};
use crate::transport::{Method, RequestOptions};

/// What kind of write a queued mutation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
  ProfileUpdate,
  SettingChange,
  DraftUpload,
  Other,
}

impl MutationType {
  /// Classify a mutating request by its url.
  pub fn classify(url: &str) -> Self {
    let path = url.split('?').next().unwrap_or_default().to_lowercase();
    if path.contains("/profile") || path.contains("/users/me") {
      Self::ProfileUpdate
    } else if path.contains("/settings") || path.contains("/preferences") {
      Self::SettingChange
    } else if ["/drafts", "/stories", "/chapters", "/episodes"]
      .iter()
      .any(|p| path.contains(p))
    {
      Self::DraftUpload
    } else {
      Self::Other
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ProfileUpdate => "profile_update",
      Self::SettingChange => "setting_change",
      Self::DraftUpload => "draft_upload",
      Self::Other => "other",
    }
  }
}

/// The request to replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationPayload {
  pub url: String,
  pub method: Method,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub query: Option<BTreeMap<String, Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<BTreeMap<String, String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub headers: Option<BTreeMap<String, String>>,
}

impl MutationPayload {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method,
      body: None,
      query: None,
      path: None,
      headers: None,
    }
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  /// The request to send when replaying, flagged to skip the offline path.
  pub fn to_replay_request(&self) -> RequestOptions {
    RequestOptions {
      url: self.url.clone(),
      method: self.method,
      body: self.body.clone(),
      query: self.query.clone(),
      path: self.path.clone(),
      headers: self.headers.clone(),
      replay_bypass: true,
      owner_id: None,
    }
  }
}

impl From<&RequestOptions> for MutationPayload {
  fn from(options: &RequestOptions) -> Self {
    Self {
      url: options.url.clone(),
      method: options.method,
      body: options.body.clone(),
      query: options.query.clone(),
      path: options.path.clone(),
      headers: options.headers.clone(),
    }
  }
}

/// A write captured while offline. Present in the queue means not yet
/// confirmed applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
  pub id: Uuid,
  #[serde(rename = "type")]
  pub mutation_type: MutationType,
  pub payload: MutationPayload,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
  /// Earliest time the next replay may be attempted
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_attempt_at: Option<DateTime<Utc>>,
}

impl PendingMutation {
  pub fn new(mutation_type: MutationType, payload: MutationPayload, created_at: DateTime<Utc>) -> Self {
    Self {
      id: Uuid::new_v4(),
      mutation_type,
      payload,
      created_at,
      retry_count: 0,
      last_error: None,
      next_attempt_at: None,
    }
  }

  /// Whether backoff allows a replay at `now`.
  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.next_attempt_at.map_or(true, |at| now >= at)
  }
}

impl Record for PendingMutation {
  fn key(&self) -> String {
    self.id.to_string()
  }

  fn index_values(&self) -> IndexValues {
    IndexValues {
      stored_at: Some(self.created_at),
      ..IndexValues::default()
    }
  }
}

/// A mutation set aside after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
  pub mutation: PendingMutation,
  pub failed_at: DateTime<Utc>,
  pub last_error: String,
}

impl Record for DeadLetter {
  fn key(&self) -> String {
    self.mutation.id.to_string()
  }

  fn index_values(&self) -> IndexValues {
    IndexValues {
      stored_at: Some(self.failed_at),
      ..IndexValues::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_classify() {
    assert_eq!(MutationType::classify("/users/profile"), MutationType::ProfileUpdate);
    assert_eq!(MutationType::classify("/users/me"), MutationType::ProfileUpdate);
    assert_eq!(MutationType::classify("/settings/theme"), MutationType::SettingChange);
    assert_eq!(MutationType::classify("/stories/42/chapters"), MutationType::DraftUpload);
    assert_eq!(MutationType::classify("/drafts"), MutationType::DraftUpload);
    assert_eq!(MutationType::classify("/follows/7"), MutationType::Other);
  }

  #[test]
  fn test_serialized_shape() {
    let mutation = PendingMutation::new(
      MutationType::ProfileUpdate,
      MutationPayload::new(Method::Patch, "/users/profile").with_body(json!({"bio": "hi"})),
      Utc::now(),
    );
    let value = serde_json::to_value(&mutation).unwrap();
    assert_eq!(value["type"], json!("profile_update"));
    assert_eq!(value["retryCount"], json!(0));
    assert_eq!(value["payload"]["method"], json!("PATCH"));
    assert!(value.get("nextAttemptAt").is_none());
  }

  #[test]
  fn test_replay_request_sets_bypass() {
    let payload = MutationPayload::new(Method::Post, "/stories").with_body(json!({"title": "t"}));
    let request = payload.to_replay_request();
    assert!(request.replay_bypass);
    assert_eq!(request.method, Method::Post);
    assert_eq!(MutationPayload::from(&request), payload);
  }

  #[test]
  fn test_is_due() {
    let now = Utc::now();
    let mut mutation = PendingMutation::new(
      MutationType::Other,
      MutationPayload::new(Method::Delete, "/follows/1"),
      now,
    );
    assert!(mutation.is_due(now));
    mutation.next_attempt_at = Some(now + chrono::Duration::seconds(5));
    assert!(!mutation.is_due(now));
    assert!(mutation.is_due(now + chrono::Duration::seconds(5)));
  }
}
