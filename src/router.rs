//! Offline-aware request router.
//!
//! Every application data request passes through [`OfflineRouter::request`].
//! Online, the router is transparent: the live response is returned as is and
//! successful collection reads refresh the local cache in the background.
//! Offline, reads are served from the cache and writes are queued for the
//! drainer.
//!
//! A live call that fails at the network layer while the oracle reported
//! online is returned as an error. It does not fall back to the cache.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::entity::EntityKind;
use crate::store::{LocalStore, Mutation, MutationMethod};
use crate::transport::{Request, Response, ResponseSource, Transport};

/// A live collection body waiting to be written to the cache.
type Refresh = (EntityKind, Vec<u8>);

/// Routes requests to the network, the cache, or the offline queue.
pub struct OfflineRouter<S: LocalStore> {
  store: Arc<S>,
  transport: Arc<dyn Transport>,
  connectivity: Arc<dyn Connectivity>,
  refreshes: mpsc::UnboundedSender<Refresh>,
}

impl<S: LocalStore + 'static> OfflineRouter<S> {
  /// Create a router. Must be called within a Tokio runtime: it spawns the
  /// task that applies cache refreshes in request order.
  pub fn new(
    store: Arc<S>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(apply_refreshes(Arc::clone(&store), rx));

    Self {
      store,
      transport,
      connectivity,
      refreshes: tx,
    }
  }

  /// Handle one request.
  ///
  /// Offline responses are synthesized with fixed statuses: 200 from cache,
  /// 202 queued, 503 nothing cached for the path, 400 unsupported method.
  pub async fn request(&self, request: Request) -> Result<Response> {
    if self.connectivity.is_online().await {
      return self.live(request).await;
    }

    if request.method == Method::GET {
      return self.serve_cached(&request.path);
    }

    match MutationMethod::from_method(&request.method) {
      Some(method) => self.enqueue(&request, method),
      None => {
        debug!(method = %request.method, path = %request.path, "Unsupported offline request");
        Response::synthesized(
          StatusCode::BAD_REQUEST,
          &json!({ "error": "Unsupported offline request" }),
          ResponseSource::Unavailable,
        )
      }
    }
  }

  async fn live(&self, request: Request) -> Result<Response> {
    let response = self.transport.send(&request).await?;

    if request.method == Method::GET && response.ok() {
      if let Some(kind) = EntityKind::resolve(&request.path) {
        self.refresh_cache(kind, response.body.clone());
      }
    }

    Ok(response)
  }

  /// Hand a live response body to the refresh task without holding up
  /// the caller.
  fn refresh_cache(&self, kind: EntityKind, body: Vec<u8>) {
    if self.refreshes.send((kind, body)).is_err() {
      warn!(%kind, "Cache refresh task stopped, cache unchanged");
    }
  }

  fn serve_cached(&self, path: &str) -> Result<Response> {
    let Some(kind) = EntityKind::resolve(path) else {
      debug!(path, "Offline read of uncached path");
      return Response::synthesized(
        StatusCode::SERVICE_UNAVAILABLE,
        &json!({ "error": "Offline and not cached" }),
        ResponseSource::Unavailable,
      );
    };

    let records = self.store.read_collection(kind)?;
    debug!(path, %kind, count = records.len(), "Serving cached collection");

    Response::synthesized(StatusCode::OK, &Value::Array(records), ResponseSource::Cache)
  }

  fn enqueue(&self, request: &Request, method: MutationMethod) -> Result<Response> {
    let body = match request.body.as_deref().map(str::trim) {
      None | Some("") => json!({}),
      Some(raw) => serde_json::from_str(raw).map_err(|e| {
        eyre!(
          "Failed to parse body of offline {} {}: {}",
          method,
          request.path,
          e
        )
      })?,
    };

    let id = self
      .store
      .enqueue(&Mutation::new(request.path.clone(), method, body))?;
    info!(id, %method, path = %request.path, "Queued offline write");

    Response::synthesized(
      StatusCode::ACCEPTED,
      &json!({ "queued": true }),
      ResponseSource::Queued,
    )
  }
}

/// Apply refreshes one at a time, in the order the responses arrived, so
/// an older snapshot never lands after a newer one. Failures are logged only.
async fn apply_refreshes<S: LocalStore + 'static>(
  store: Arc<S>,
  mut rx: mpsc::UnboundedReceiver<Refresh>,
) {
  while let Some((kind, body)) = rx.recv().await {
    let store = Arc::clone(&store);
    let applied = tokio::task::spawn_blocking(move || {
      let records = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Array(records)) => records,
        Ok(_) => {
          debug!(%kind, "Response is not a collection, cache unchanged");
          return;
        }
        Err(e) => {
          debug!(%kind, error = %e, "Response is not JSON, cache unchanged");
          return;
        }
      };

      match store.replace_collection(kind, &records) {
        Ok(()) => info!(%kind, count = records.len(), "Refreshed cached collection"),
        Err(e) => warn!(%kind, error = %e, "Failed to refresh cached collection"),
      }
    })
    .await;

    if let Err(e) = applied {
      warn!(%kind, error = %e, "Cache refresh panicked");
    }
  }
}
