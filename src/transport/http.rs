use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Method, RequestOptions, ResponseError, Transport, TransportResponse};
use crate::config::ApiConfig;

/// HTTP transport over `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let mut base = config.base_url.clone();
    // Without a trailing slash Url::join would replace the last segment
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  /// Absolute URL for a request, including its query string.
  pub fn build_url(&self, options: &RequestOptions) -> Result<Url> {
    let resolved = options.resolved_url();
    let mut url = self
      .base_url
      .join(resolved.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid request URL {}: {}", resolved, e))?;

    if let Some(query) = options.query.as_ref().filter(|q| !q.is_empty()) {
      let mut pairs = url.query_pairs_mut();
      for (key, value) in query {
        pairs.append_pair(key, &query_value(value));
      }
    }

    Ok(url)
  }
}

/// Strings go in unquoted; everything else as its JSON text.
fn query_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn to_reqwest(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn request(&self, options: RequestOptions) -> Result<TransportResponse> {
    let url = self.build_url(&options)?;
    debug!(method = %options.method, %url, "Sending request");

    let mut request = self.client.request(to_reqwest(options.method), url.clone());
    if let Some(headers) = &options.headers {
      for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
      }
    }
    if let Some(body) = &options.body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let status = response.status();
    let text = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;

    let body: Option<Value> = if text.trim().is_empty() {
      None
    } else {
      Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    };

    let status_text = status.canonical_reason().unwrap_or("").to_string();
    if status.is_success() {
      Ok(TransportResponse {
        status: status.as_u16(),
        status_text,
        data: body,
        error: None,
      })
    } else {
      Ok(TransportResponse {
        status: status.as_u16(),
        status_text: status_text.clone(),
        data: None,
        error: Some(ResponseError {
          message: format!("{} {}", status.as_u16(), status_text),
          body,
        }),
      })
    }
  }
}
