//! Cache key namespace and TTL policy.
//!
//! Every key starts with one of the fixed [`KeyPrefix`] namespaces. Filter
//! objects are encoded with object keys sorted at every depth, so two filters
//! with the same fields produce the same key no matter what order the caller
//! built them in.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// TTL policy in seconds. Pick by volatility.
pub mod ttl {
    pub const SHORT: u64 = 60;
    pub const MEDIUM: u64 = 300;
    pub const LONG: u64 = 3600;
    pub const DAY: u64 = 86400;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPrefix {
    Business,
    Review,
    User,
    Search,
    Geo,
    Pricing,
    Availability,
}

impl KeyPrefix {
    pub const ALL: [KeyPrefix; 7] = [
        KeyPrefix::Business,
        KeyPrefix::Review,
        KeyPrefix::User,
        KeyPrefix::Search,
        KeyPrefix::Geo,
        KeyPrefix::Pricing,
        KeyPrefix::Availability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPrefix::Business => "business:",
            KeyPrefix::Review => "review:",
            KeyPrefix::User => "user:",
            KeyPrefix::Search => "search:",
            KeyPrefix::Geo => "geo:",
            KeyPrefix::Pricing => "pricing:",
            KeyPrefix::Availability => "availability:",
        }
    }

    pub fn key(&self, suffix: &str) -> String {
        format!("{}{}", self.as_str(), suffix)
    }
}

pub fn business(id: &str) -> String {
    KeyPrefix::Business.key(id)
}

pub fn business_trust_score(id: &str) -> String {
    KeyPrefix::Business.key(&format!("{}:trust-score", id))
}

/// Review list for one business.
pub fn business_reviews(business_id: &str) -> String {
    KeyPrefix::Review.key(&format!("business:{}", business_id))
}

pub fn review(id: &str) -> String {
    KeyPrefix::Review.key(id)
}

pub fn user(id: &str) -> String {
    KeyPrefix::User.key(id)
}

pub fn pricing(business_id: &str) -> String {
    KeyPrefix::Pricing.key(business_id)
}

pub fn availability(business_id: &str) -> String {
    KeyPrefix::Availability.key(business_id)
}

pub fn search<F: Serialize>(filters: &F) -> String {
    KeyPrefix::Search.key(&canonical_json(filters))
}

pub fn geo<F: Serialize>(filters: &F) -> String {
    KeyPrefix::Geo.key(&canonical_json(filters))
}

/// Field-order-stable JSON for key suffixes.
pub fn canonical_json<F: Serialize>(filters: &F) -> String {
    match serde_json::to_value(filters) {
        Ok(value) => sort_keys(value).to_string(),
        Err(e) => {
            // Still a valid (if coarse) key; a filter that can't serialize is a caller bug.
            warn!("Failed to encode cache key filters: {}", e);
            "null".to_string()
        }
    }
}

// Rebuilt explicitly so the order holds even if serde_json's preserve_order is on.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
