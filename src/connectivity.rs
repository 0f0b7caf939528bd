//! Network reachability checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;
use url::Url;

use crate::config::ConnectivityConfig;

/// Answers "can we reach the network right now?".
///
/// Every call re-evaluates. Implementations keep no memory of earlier answers.
#[async_trait]
pub trait Connectivity: Send + Sync {
  async fn is_online(&self) -> bool;
}

/// Probes a URL with a short `HEAD` request.
///
/// Any HTTP response counts as online, whatever its status.
pub struct HttpProbe {
  client: reqwest::Client,
  url: Url,
}

impl HttpProbe {
  pub fn new(config: &ConnectivityConfig, fallback_url: &Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.probe_timeout_ms))
      .build()
      .map_err(|e| eyre!("Failed to create probe client: {}", e))?;

    Ok(Self {
      client,
      url: config
        .probe_url
        .clone()
        .unwrap_or_else(|| fallback_url.clone()),
    })
  }
}

#[async_trait]
impl Connectivity for HttpProbe {
  async fn is_online(&self) -> bool {
    match self.client.head(self.url.clone()).send().await {
      Ok(_) => true,
      Err(e) => {
        debug!(url = %self.url, error = %e, "Connectivity probe failed");
        false
      }
    }
  }
}

/// A switchable flag. Backs the `--offline` flag.
#[derive(Debug)]
pub struct StaticConnectivity {
  online: AtomicBool,
}

impl StaticConnectivity {
  pub fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
    }
  }

  #[cfg(test)]
  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
  async fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }
}
