//! The request contract the engine rides on.
//!
//! A transport accepts [`RequestOptions`] and returns a
//! [`TransportResponse`]. A network-level failure (nothing came back) is an
//! `Err`; an HTTP failure is an `Ok` response with `error` set.

mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpTransport;

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  /// Anything other than GET changes server state.
  pub fn is_mutating(&self) -> bool {
    !matches!(self, Method::Get)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A request as issued by application code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
  pub url: String,
  pub method: Method,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub query: Option<BTreeMap<String, Value>>,
  /// Values substituted into `{name}` placeholders of the url
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<BTreeMap<String, String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub headers: Option<BTreeMap<String, String>>,
  /// Set on queue replays so the offline path is skipped
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub replay_bypass: bool,
  /// Owner the cached response is scoped to
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub owner_id: Option<String>,
}

impl RequestOptions {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method,
      body: None,
      query: None,
      path: None,
      headers: None,
      replay_bypass: false,
      owner_id: None,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self
      .query
      .get_or_insert_with(BTreeMap::new)
      .insert(key.into(), value.into());
    self
  }

  pub fn with_path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self
      .path
      .get_or_insert_with(BTreeMap::new)
      .insert(key.into(), value.into());
    self
  }

  pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self
      .headers
      .get_or_insert_with(BTreeMap::new)
      .insert(key.into(), value.into());
    self
  }

  pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
    self.owner_id = Some(owner_id.into());
    self
  }

  /// The url with `{name}` placeholders filled from `path`.
  pub fn resolved_url(&self) -> String {
    let mut url = self.url.clone();
    if let Some(path) = &self.path {
      for (name, value) in path {
        url = url.replace(&format!("{{{}}}", name), value);
      }
    }
    url
  }
}

/// Error body of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
}

/// What a transport hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportResponse {
  pub status: u16,
  pub status_text: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ResponseError>,
}

impl TransportResponse {
  pub fn ok(data: Value) -> Self {
    Self {
      status: 200,
      status_text: "OK".to_string(),
      data: Some(data),
      error: None,
    }
  }

  /// A response served from the local cache instead of the network.
  pub fn cached(data: Value) -> Self {
    Self {
      status: 200,
      status_text: "OK (cached)".to_string(),
      data: Some(data),
      error: None,
    }
  }

  /// Acknowledgement for a mutation captured while offline.
  pub fn queued(mutation_id: uuid::Uuid) -> Self {
    Self {
      status: 202,
      status_text: "Accepted (queued)".to_string(),
      data: Some(serde_json::json!({
        "queued": true,
        "mutationId": mutation_id.to_string(),
        "message": "Request queued until connectivity returns",
      })),
      error: None,
    }
  }

  pub fn failed(status: u16, message: impl Into<String>) -> Self {
    let message = message.into();
    Self {
      status,
      status_text: message.clone(),
      data: None,
      error: Some(ResponseError {
        message,
        body: None,
      }),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status) && self.error.is_none()
  }

  pub fn is_queued(&self) -> bool {
    self.status == 202
      && self
        .data
        .as_ref()
        .and_then(|d| d.get("queued"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
  }
}

/// Trait for anything that can carry a request to the server.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn request(&self, options: RequestOptions) -> Result<TransportResponse>;

  /// Whether this transport already routes through the interceptor.
  fn is_intercepted(&self) -> bool {
    false
  }
}
