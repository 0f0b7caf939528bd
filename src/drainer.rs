//! Background reconciliation of the offline write queue.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::connectivity::Connectivity;
use crate::store::{LocalStore, MutationMethod, QueueId, QueuedMutation};
use crate::transport::{Request, Transport};

/// Why a drain pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  AlreadyRunning,
  Offline,
}

/// A queued entry whose replay failed during a pass.
#[derive(Debug, Clone)]
pub struct ReplayFailure {
  pub id: QueueId,
  pub method: MutationMethod,
  pub path: String,
  pub reason: String,
}

/// Summary of one completed pass.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
  /// Entries delivered and removed, in replay order
  pub delivered: Vec<QueueId>,
  /// Entries left queued
  pub failed: Vec<ReplayFailure>,
}

impl DrainReport {
  pub fn is_empty(&self) -> bool {
    self.delivered.is_empty() && self.failed.is_empty()
  }
}

#[derive(Debug, Clone)]
pub enum DrainOutcome {
  Skipped(SkipReason),
  Completed(DrainReport),
}

/// Replays queued mutations against the server, one at a time.
///
/// At most one pass runs per drainer. A second `drain()` while a pass is in
/// flight returns [`DrainOutcome::Skipped`] immediately.
pub struct QueueDrainer<S: LocalStore> {
  store: Arc<S>,
  transport: Arc<dyn Transport>,
  connectivity: Arc<dyn Connectivity>,
  in_progress: AtomicBool,
}

/// Clears the in-progress flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl<S: LocalStore> QueueDrainer<S> {
  pub fn new(
    store: Arc<S>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Self {
    Self {
      store,
      transport,
      connectivity,
      in_progress: AtomicBool::new(false),
    }
  }

  /// Run one pass over a snapshot of the queue.
  ///
  /// Entries that fail to replay stay queued and the pass moves on. Storage
  /// errors abort the pass and are returned.
  pub async fn drain(&self) -> Result<DrainOutcome> {
    if self
      .in_progress
      .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      return Ok(DrainOutcome::Skipped(SkipReason::AlreadyRunning));
    }
    let _guard = PassGuard(&self.in_progress);

    if !self.connectivity.is_online().await {
      return Ok(DrainOutcome::Skipped(SkipReason::Offline));
    }

    let queue = self.store.list_queue()?;
    let mut report = DrainReport::default();

    for entry in queue {
      match self.replay(&entry).await {
        Ok(()) => {
          self.store.remove_queued(entry.id)?;
          info!(
            id = entry.id,
            method = %entry.mutation.method,
            path = %entry.mutation.path,
            "Synced queued mutation"
          );
          report.delivered.push(entry.id);
        }
        Err(reason) => {
          warn!(
            id = entry.id,
            method = %entry.mutation.method,
            path = %entry.mutation.path,
            reason = %reason,
            "Sync failed, mutation stays queued"
          );
          report.failed.push(ReplayFailure {
            id: entry.id,
            method: entry.mutation.method,
            path: entry.mutation.path,
            reason,
          });
        }
      }
    }

    Ok(DrainOutcome::Completed(report))
  }

  /// Send one entry. `Err` carries the failure reason.
  async fn replay(&self, entry: &QueuedMutation) -> std::result::Result<(), String> {
    let request = Request::new(entry.mutation.method.to_method(), &entry.mutation.path)
      .with_json(&entry.mutation.body)
      .map_err(|e| e.to_string())?;

    match self.transport.send(&request).await {
      Ok(response) if response.ok() => Ok(()),
      Ok(response) => Err(format!("server responded {}", response.status)),
      Err(e) => Err(e.to_string()),
    }
  }

  /// Drain on every tick of `every` until `shutdown` resolves.
  ///
  /// Passes that find the network down are skipped and retried on the next
  /// tick. A storage error ends the loop.
  pub async fn run_until<F>(&self, every: Duration, shutdown: F) -> Result<()>
  where
    F: Future<Output = ()>,
  {
    if every.is_zero() {
      return Err(eyre!("Drain interval must be greater than zero"));
    }
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut was_online: Option<bool> = None;

    loop {
      tokio::select! {
        _ = &mut shutdown => break,
        _ = ticker.tick() => {
          let outcome = self.drain().await?;

          let online = !matches!(outcome, DrainOutcome::Skipped(SkipReason::Offline));
          match (was_online, online) {
            (Some(false), true) => info!("Connectivity restored"),
            (Some(true), false) => warn!("Connectivity lost, writes will be queued"),
            _ => {}
          }
          was_online = Some(online);

          if let DrainOutcome::Completed(report) = outcome {
            if !report.is_empty() {
              info!(
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "Drain pass finished"
              );
            }
          }
        }
      }
    }

    Ok(())
  }
}
