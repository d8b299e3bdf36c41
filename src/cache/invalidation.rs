//! Which cache-key families go stale when an entity changes.

use std::fmt;
use std::str::FromStr;

use super::keys::{self, KeyPrefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Business,
    Review,
    User,
}

/// One step of an invalidation fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purge {
    /// A single exact key
    Key(String),
    /// Every key in a namespace
    Family(KeyPrefix),
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Business => "business",
            EntityType::Review => "review",
            EntityType::User => "user",
        }
    }

    /// Keys and families to purge after a write to this entity.
    ///
    /// Search results can reference any business or review, so those writes
    /// drop the whole search family even without an id.
    pub fn purge_plan(&self, id: Option<&str>) -> Vec<Purge> {
        let mut plan = Vec::new();
        match self {
            EntityType::Business => {
                if let Some(id) = id {
                    plan.push(Purge::Key(keys::business(id)));
                    plan.push(Purge::Key(keys::business_trust_score(id)));
                    plan.push(Purge::Key(keys::business_reviews(id)));
                    plan.push(Purge::Key(keys::pricing(id)));
                    plan.push(Purge::Key(keys::availability(id)));
                }
                plan.push(Purge::Family(KeyPrefix::Search));
            }
            EntityType::Review => {
                if let Some(id) = id {
                    plan.push(Purge::Key(keys::review(id)));
                }
                plan.push(Purge::Family(KeyPrefix::Search));
            }
            EntityType::User => {
                if let Some(id) = id {
                    plan.push(Purge::Key(keys::user(id)));
                }
            }
        }
        plan
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "business" => Ok(EntityType::Business),
            "review" => Ok(EntityType::Review),
            "user" => Ok(EntityType::User),
            other => Err(anyhow::anyhow!("Unknown entity type '{}'", other)),
        }
    }
}
