//! Fixture state per environment and actor pair

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Actor pair label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActorPair {
    A,
    B,
}

impl ActorPair {
    /// The other pair
    #[inline]
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Lower-case tag used in deterministic identifiers
    #[inline]
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

impl fmt::Display for ActorPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::B => "B",
        })
    }
}

/// Actor kind within a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// Organization owner
    Owner,
    /// Dependent actor (client of the organization)
    Dependent,
}

impl ActorKind {
    /// The other kind
    #[inline]
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Owner => Self::Dependent,
            Self::Dependent => Self::Owner,
        }
    }
}

/// Identifiers and credentials established for one actor pair in one
/// environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureState {
    pub organization_id: String,
    pub owner_id: String,
    pub owner_user_id: String,
    pub dependent_id: String,
    pub dependent_user_id: String,
    pub owner_email: String,
    pub dependent_email: String,
    /// Lazily seeded resources by logical key (`booking`, `sale`, ...)
    pub resource_ids: BTreeMap<String, String>,
}

impl FixtureState {
    /// Identifier for a logical key, covering both actors and seeded resources
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "organization" | "org" => Some(&self.organization_id),
            "owner" => Some(&self.owner_id),
            "owner_user" => Some(&self.owner_user_id),
            "dependent" => Some(&self.dependent_id),
            "dependent_user" => Some(&self.dependent_user_id),
            _ => self.resource_ids.get(key).map(String::as_str),
        }
    }

    /// Remember a seeded resource
    pub fn remember(&mut self, key: impl Into<String>, id: impl Into<String>) {
        self.resource_ids.insert(key.into(), id.into());
    }

    /// Forget a seeded resource so the next use re-seeds it
    pub fn forget(&mut self, key: &str) -> Option<String> {
        self.resource_ids.remove(key)
    }

    /// Email of the actor of `kind`
    #[must_use]
    pub fn email(&self, kind: ActorKind) -> &str {
        match kind {
            ActorKind::Owner => &self.owner_email,
            ActorKind::Dependent => &self.dependent_email,
        }
    }
}
