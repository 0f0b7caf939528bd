//! Typed views of cached CRM records.
//!
//! The store keeps raw JSON so unknown fields survive a round trip. These
//! types are for callers that want to read the cache with structure.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::EntityKind;

/// A record type stored in one cached collection.
pub trait CachedRecord: DeserializeOwned + Serialize {
  /// The collection this record lives in
  fn kind() -> EntityKind;

  fn id(&self) -> i64;

  /// Short human-readable description
  fn label(&self) -> String;
}

/// Decode raw cached records into `T`.
pub fn decode_collection<T: CachedRecord>(records: Vec<Value>) -> Result<Vec<T>> {
  records
    .into_iter()
    .map(|record| {
      serde_json::from_value(record)
        .map_err(|e| eyre!("Failed to decode cached {} record: {}", T::kind(), e))
    })
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
  Open,
  Converted,
  Closed,
  Lost,
  #[serde(other)]
  Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
  Pending,
  Won,
  Lost,
  #[serde(other)]
  Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowupStatus {
  Pending,
  Contacted,
  Completed,
  Rescheduled,
  #[serde(other)]
  Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
  pub id: i64,
  pub tenant_id: i64,
  pub name: String,
  pub contact_person: Option<String>,
  pub email: Option<String>,
  pub phone: Option<String>,
  pub address: Option<String>,
  pub city: Option<String>,
  pub state: Option<String>,
  pub zip: Option<String>,
  pub notes: Option<String>,
  pub created_at: String,
  pub lead_status: LeadStatus,
  pub converted_on: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
  pub id: i64,
  pub tenant_id: i64,
  pub name: String,
  pub contact_person: Option<String>,
  pub email: Option<String>,
  pub phone: Option<String>,
  pub address: Option<String>,
  pub city: Option<String>,
  pub state: Option<String>,
  pub zip: Option<String>,
  pub notes: Option<String>,
  pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
  pub id: i64,
  pub tenant_id: i64,
  pub project_name: String,
  pub project_status: ProjectStatus,
  pub project_description: Option<String>,
  pub project_start: Option<String>,
  pub project_end: Option<String>,
  pub project_worth: Option<f64>,
  pub client_id: Option<i64>,
  pub lead_id: Option<i64>,
  pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
  pub id: i64,
  pub tenant_id: i64,
  pub contact_person: Option<String>,
  pub email: Option<String>,
  pub phone: Option<String>,
  pub contact_date: String,
  pub notes: Option<String>,
  pub outcome: Option<String>,
  pub follow_up: Option<String>,
  pub followup_status: FollowupStatus,
  pub summary: String,
  pub client_id: Option<i64>,
  pub lead_id: Option<i64>,
}

impl CachedRecord for Lead {
  fn kind() -> EntityKind {
    EntityKind::Lead
  }

  fn id(&self) -> i64 {
    self.id
  }

  fn label(&self) -> String {
    format!("{} [{:?}]", self.name, self.lead_status)
  }
}

impl CachedRecord for Client {
  fn kind() -> EntityKind {
    EntityKind::Client
  }

  fn id(&self) -> i64 {
    self.id
  }

  fn label(&self) -> String {
    match &self.contact_person {
      Some(contact) => format!("{} ({})", self.name, contact),
      None => self.name.clone(),
    }
  }
}

impl CachedRecord for Project {
  fn kind() -> EntityKind {
    EntityKind::Project
  }

  fn id(&self) -> i64 {
    self.id
  }

  fn label(&self) -> String {
    format!("{} [{:?}]", self.project_name, self.project_status)
  }
}

impl CachedRecord for Interaction {
  fn kind() -> EntityKind {
    EntityKind::Interaction
  }

  fn id(&self) -> i64 {
    self.id
  }

  fn label(&self) -> String {
    format!(
      "{} {} [{:?}]",
      self.contact_date, self.summary, self.followup_status
    )
  }
}
