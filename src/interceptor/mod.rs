//! Request interception as a middleware pipeline.
//!
//! A [`Pipeline`] is a stack of [`Layer`]s in front of a transport. Each
//! layer sees the request first and decides whether to answer it itself or
//! hand it on through [`Next`]. The pipeline is built once; wrapping an
//! already intercepted transport is a no-op.

mod cache_layer;
mod queue_layer;

pub use cache_layer::ResponseCacheLayer;
pub use queue_layer::OfflineQueueLayer;

use async_trait::async_trait;
use color_eyre::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

use crate::cache::ResponseCache;
use crate::connectivity::Connectivity;
use crate::queue::MutationQueue;
use crate::transport::{RequestOptions, Transport, TransportResponse};

/// One stage of the pipeline.
#[async_trait]
pub trait Layer: Send + Sync {
  async fn handle(&self, options: RequestOptions, next: Next<'_>) -> Result<TransportResponse>;
}

/// The rest of the pipeline after the current layer.
pub struct Next<'a> {
  layers: &'a [Arc<dyn Layer>],
  transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
  pub fn run(self, options: RequestOptions) -> BoxFuture<'a, Result<TransportResponse>> {
    match self.layers.split_first() {
      Some((layer, rest)) => {
        let next = Next {
          layers: rest,
          transport: self.transport,
        };
        layer.handle(options, next)
      }
      None => self.transport.request(options),
    }
  }
}

/// Builder for an intercepted transport.
#[derive(Default)]
pub struct Pipeline {
  layers: Vec<Arc<dyn Layer>>,
}

impl Pipeline {
  pub fn new() -> Self {
    Self::default()
  }

  /// The standard offline-first stack: response cache, then offline queue.
  pub fn offline_first(cache: ResponseCache, queue: MutationQueue, connectivity: Connectivity) -> Self {
    Self::new()
      .layer(ResponseCacheLayer::new(cache, connectivity.clone()))
      .layer(OfflineQueueLayer::new(queue, connectivity))
  }

  /// Append a layer. Layers run in the order they were added.
  pub fn layer(mut self, layer: impl Layer + 'static) -> Self {
    self.layers.push(Arc::new(layer));
    self
  }

  /// Put the pipeline in front of `transport`. A transport that is already
  /// intercepted comes back unchanged.
  pub fn wrap(self, transport: Arc<dyn Transport>) -> Arc<dyn Transport> {
    if transport.is_intercepted() {
      debug!("Transport already intercepted; leaving it as is");
      return transport;
    }
    Arc::new(InterceptedTransport {
      layers: self.layers,
      inner: transport,
    })
  }
}

/// A transport with a pipeline in front of it.
pub struct InterceptedTransport {
  layers: Vec<Arc<dyn Layer>>,
  inner: Arc<dyn Transport>,
}

#[async_trait]
impl Transport for InterceptedTransport {
  async fn request(&self, options: RequestOptions) -> Result<TransportResponse> {
    Next {
      layers: &self.layers,
      transport: self.inner.as_ref(),
    }
    .run(options)
    .await
  }

  fn is_intercepted(&self) -> bool {
    true
  }
}
