//! Entity kinds and the path-prefix table used to resolve request paths.

use std::fmt;
use std::str::FromStr;

use color_eyre::{eyre::eyre, Report};

/// A cached collection. Each kind maps to exactly one collection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
  Lead,
  Client,
  Project,
  Interaction,
}

impl EntityKind {
  /// Every kind, in resolution order.
  pub const ALL: [EntityKind; 4] = [
    EntityKind::Lead,
    EntityKind::Client,
    EntityKind::Project,
    EntityKind::Interaction,
  ];

  /// Path prefix of the collection endpoint
  pub fn prefix(self) -> &'static str {
    match self {
      EntityKind::Lead => "/leads/",
      EntityKind::Client => "/clients/",
      EntityKind::Project => "/projects/",
      EntityKind::Interaction => "/interactions/",
    }
  }

  /// Name used as the storage discriminator
  pub fn as_str(self) -> &'static str {
    match self {
      EntityKind::Lead => "leads",
      EntityKind::Client => "clients",
      EntityKind::Project => "projects",
      EntityKind::Interaction => "interactions",
    }
  }

  /// Resolve a request path to the entity kind whose prefix it starts with.
  ///
  /// Matching is a plain string prefix test, so `/leads/42` and
  /// `/leads/?page=2` both resolve to [`EntityKind::Lead`].
  pub fn resolve(path: &str) -> Option<EntityKind> {
    Self::ALL
      .into_iter()
      .find(|kind| path.starts_with(kind.prefix()))
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for EntityKind {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_lowercase();
    Self::ALL
      .into_iter()
      .find(|kind| kind.as_str() == lower || kind.as_str().trim_end_matches('s') == lower)
      .ok_or_else(|| eyre!("Unknown entity kind: {}", s))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_collection_paths() {
    assert_eq!(EntityKind::resolve("/leads/"), Some(EntityKind::Lead));
    assert_eq!(EntityKind::resolve("/clients/"), Some(EntityKind::Client));
    assert_eq!(EntityKind::resolve("/projects/"), Some(EntityKind::Project));
    assert_eq!(
      EntityKind::resolve("/interactions/"),
      Some(EntityKind::Interaction)
    );
  }

  #[test]
  fn test_resolve_is_prefix_match() {
    assert_eq!(EntityKind::resolve("/leads/42"), Some(EntityKind::Lead));
    assert_eq!(
      EntityKind::resolve("/projects/?page=2"),
      Some(EntityKind::Project)
    );
  }

  #[test]
  fn test_resolve_unknown_paths() {
    assert_eq!(EntityKind::resolve("/unknown/"), None);
    assert_eq!(EntityKind::resolve("/leads"), None);
    assert_eq!(EntityKind::resolve("leads/"), None);
    assert_eq!(EntityKind::resolve("/api/leads/"), None);
  }

  #[test]
  fn test_parse_kind_names() {
    assert_eq!("leads".parse::<EntityKind>().unwrap(), EntityKind::Lead);
    assert_eq!("Lead".parse::<EntityKind>().unwrap(), EntityKind::Lead);
    assert_eq!(
      "interaction".parse::<EntityKind>().unwrap(),
      EntityKind::Interaction
    );
    assert!("accounts".parse::<EntityKind>().is_err());
  }
}
