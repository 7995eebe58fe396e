//! Scriptable transport for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

use super::{RequestOptions, Transport, TransportResponse};

type Responder = Box<dyn FnMut(&RequestOptions) -> Result<TransportResponse> + Send>;

/// Records every request and answers from a responder closure.
pub(crate) struct MockTransport {
  calls: Mutex<Vec<RequestOptions>>,
  responder: Mutex<Responder>,
  delay: Option<Duration>,
}

impl MockTransport {
  pub fn new(responder: impl FnMut(&RequestOptions) -> Result<TransportResponse> + Send + 'static) -> Self {
    Self {
      calls: Mutex::new(Vec::new()),
      responder: Mutex::new(Box::new(responder)),
      delay: None,
    }
  }

  /// Answers every request with 200 and `data`.
  pub fn ok(data: Value) -> Self {
    Self::new(move |_| Ok(TransportResponse::ok(data.clone())))
  }

  /// Fails every request at the network level.
  pub fn unreachable() -> Self {
    Self::new(|options| Err(eyre!("connection refused: {}", options.url)))
  }

  /// Sleep before answering, so concurrent callers overlap.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// Swap the responder, e.g. when the network "comes back".
  pub fn respond_with(
    &self,
    responder: impl FnMut(&RequestOptions) -> Result<TransportResponse> + Send + 'static,
  ) {
    *self.responder.lock().unwrap() = Box::new(responder);
  }

  pub fn calls(&self) -> Vec<RequestOptions> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn request(&self, options: RequestOptions) -> Result<TransportResponse> {
    self.calls.lock().unwrap().push(options.clone());
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    let mut guard = self.responder.lock().unwrap();
    let responder: &mut Responder = &mut guard;
    responder(&options)
  }
}
