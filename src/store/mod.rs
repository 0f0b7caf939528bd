//! Durable on-device storage for cached collections and the offline write queue.
//!
//! The router and drainer only talk to the [`LocalStore`] trait, so the SQLite
//! backend can be swapped for another embedded store without touching them.

mod sqlite;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Report, Result};
use reqwest::Method;
use serde_json::Value;

use crate::entity::EntityKind;

pub use sqlite::SqliteStore;

/// Identifier assigned to a queued mutation by the store.
pub type QueueId = i64;

/// HTTP verbs that may be queued for later delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMethod {
  Post,
  Put,
  Delete,
}

impl MutationMethod {
  pub fn as_str(self) -> &'static str {
    match self {
      MutationMethod::Post => "POST",
      MutationMethod::Put => "PUT",
      MutationMethod::Delete => "DELETE",
    }
  }

  /// The mutating verb for `method`, or `None` for reads and anything else.
  pub fn from_method(method: &Method) -> Option<Self> {
    match *method {
      Method::POST => Some(MutationMethod::Post),
      Method::PUT => Some(MutationMethod::Put),
      Method::DELETE => Some(MutationMethod::Delete),
      _ => None,
    }
  }

  pub fn to_method(self) -> Method {
    match self {
      MutationMethod::Post => Method::POST,
      MutationMethod::Put => Method::PUT,
      MutationMethod::Delete => Method::DELETE,
    }
  }
}

impl fmt::Display for MutationMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for MutationMethod {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_uppercase().as_str() {
      "POST" => Ok(MutationMethod::Post),
      "PUT" => Ok(MutationMethod::Put),
      "DELETE" => Ok(MutationMethod::Delete),
      other => Err(eyre!("Not a queueable method: {}", other)),
    }
  }
}

/// One write intent that could not be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
  pub path: String,
  pub method: MutationMethod,
  pub body: Value,
  pub enqueued_at: DateTime<Utc>,
}

impl Mutation {
  /// A mutation stamped with the current time.
  pub fn new(path: impl Into<String>, method: MutationMethod, body: Value) -> Self {
    Self {
      path: path.into(),
      method,
      body,
      enqueued_at: Utc::now(),
    }
  }
}

/// A mutation as stored in the queue, with its assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMutation {
  pub id: QueueId,
  pub mutation: Mutation,
}

/// Trait for local storage backends.
///
/// Every operation hits durable storage. Failures are returned to the caller;
/// implementations must never drop a queued mutation silently.
pub trait LocalStore: Send + Sync {
  /// Atomically replace every cached record of `kind` with `records`.
  fn replace_collection(&self, kind: EntityKind, records: &[Value]) -> Result<()>;

  /// Current cached records of `kind`; empty if never populated.
  fn read_collection(&self, kind: EntityKind) -> Result<Vec<Value>>;

  /// When `kind` was last replaced, if ever.
  fn refreshed_at(&self, kind: EntityKind) -> Result<Option<DateTime<Utc>>>;

  /// Append a mutation to the queue and return its id.
  fn enqueue(&self, mutation: &Mutation) -> Result<QueueId>;

  /// All queued mutations in enqueue order.
  fn list_queue(&self) -> Result<Vec<QueuedMutation>>;

  /// Number of queued mutations.
  fn queue_len(&self) -> Result<usize>;

  /// Remove a queued mutation. Removing an unknown id is a no-op.
  fn remove_queued(&self, id: QueueId) -> Result<()>;
}
