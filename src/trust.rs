//! Trust Score engine
//!
//! ビジネスごとの検証シグナルを 0-100 のスコアに畳み込む。
//! - レビュー (評価 + 件数)
//! - 外部リスティングの一貫性
//! - Web プレゼンス
//! - ライセンス / 保険
//! - 応答性
//!
//! I/O なしの純粋関数。同じ入力と `now` なら必ず同じ結果になる。
//! 欠けている値・壊れた値は「加点なし」として扱い、エラーにはしない。

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

const REVIEW_SIGNAL_MAX: f64 = 30.0;
const CITATION_MAX: f64 = 25.0;
const WEB_PRESENCE_MAX: f64 = 20.0;
const LICENSING_MAX: f64 = 15.0;
const RESPONSIVENESS_MAX: f64 = 10.0;

/// External listing sources that count towards citation consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListingSource {
    Google,
    Yelp,
    Bbb,
}

impl ListingSource {
    pub const ALL: [ListingSource; 3] = [ListingSource::Google, ListingSource::Yelp, ListingSource::Bbb];

    pub fn name(&self) -> &'static str {
        match self {
            ListingSource::Google => "google",
            ListingSource::Yelp => "yelp",
            ListingSource::Bbb => "bbb",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceSignal {
    #[serde(deserialize_with = "lenient")]
    pub rating: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub review_count: u32,
    #[serde(deserialize_with = "lenient")]
    pub verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrustScoreInputs {
    #[serde(deserialize_with = "lenient")]
    pub rating: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub review_count: u32,
    /// Keyed by source name; names outside [`ListingSource`] are ignored.
    #[serde(deserialize_with = "lenient_sources")]
    pub sources: BTreeMap<String, SourceSignal>,
    #[serde(deserialize_with = "lenient")]
    pub website: Option<String>,
    #[serde(rename = "hasSSL", deserialize_with = "lenient")]
    pub has_ssl: bool,
    #[serde(deserialize_with = "lenient")]
    pub has_schema: bool,
    #[serde(deserialize_with = "lenient")]
    pub licensed: bool,
    #[serde(deserialize_with = "lenient")]
    pub insured: bool,
    #[serde(deserialize_with = "lenient")]
    pub certifications: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub claimed: bool,
    #[serde(deserialize_with = "lenient")]
    pub response_rate: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// A field of the wrong shape decodes as its default (no credit) instead of
/// failing the whole payload.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Per-source leniency: an undecodable source entry is dropped, the rest stay.
fn lenient_sources<'de, D>(deserializer: D) -> Result<BTreeMap<String, SourceSignal>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Object(entries) => entries,
        _ => return Ok(BTreeMap::new()),
    };

    Ok(entries
        .into_iter()
        .filter_map(|(name, signal)| serde_json::from_value(signal).ok().map(|s| (name, s)))
        .collect())
}

/// Per-category scores (display-rounded to one decimal) and the total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScoreBreakdown {
    pub total: u8,
    pub review_signal: f64,
    pub citation_consistency: f64,
    pub web_presence: f64,
    pub licensing_signal: f64,
    pub responsiveness: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeLevel {
    Elite,
    Verified,
    Trusted,
    Listed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustBadge {
    pub level: BadgeLevel,
    pub label: &'static str,
    pub color: &'static str,
}

/// Highest threshold first.
const BADGE_TIERS: [(u8, BadgeLevel, &str, &str); 3] = [
    (85, BadgeLevel::Elite, "Elite Pro", "gold"),
    (70, BadgeLevel::Verified, "Verified Pro", "green"),
    (50, BadgeLevel::Trusted, "Trusted", "blue"),
];

/// Format a trust score as a badge tier
pub fn score_to_badge(score: u8) -> TrustBadge {
    for (threshold, level, label, color) in BADGE_TIERS {
        if score >= threshold {
            return TrustBadge { level, label, color };
        }
    }
    TrustBadge {
        level: BadgeLevel::Listed,
        label: "Listed",
        color: "gray",
    }
}

/// Score against the current wall clock.
pub fn calculate_trust_score(inputs: &TrustScoreInputs) -> TrustScoreBreakdown {
    calculate_trust_score_at(inputs, Utc::now())
}

/// Score with an explicit reference time for the recency bonus.
pub fn calculate_trust_score_at(inputs: &TrustScoreInputs, now: DateTime<Utc>) -> TrustScoreBreakdown {
    let review = review_signal(inputs);
    let citation = citation_consistency(inputs);
    let web = web_presence(inputs);
    let licensing = licensing_signal(inputs);
    let responsiveness = responsiveness(inputs, now);

    // Round once, from the unrounded sum.
    let raw_total = review + citation + web + licensing + responsiveness;
    let total = raw_total.round().clamp(0.0, 100.0) as u8;

    TrustScoreBreakdown {
        total,
        review_signal: round_display(review),
        citation_consistency: round_display(citation),
        web_presence: round_display(web),
        licensing_signal: round_display(licensing),
        responsiveness: round_display(responsiveness),
    }
}

fn review_signal(inputs: &TrustScoreInputs) -> f64 {
    let rating = match inputs.rating.filter(|r| r.is_finite()) {
        Some(r) => r,
        None => return 0.0,
    };

    let rating_score = (((rating - 3.0) / 2.0) * 20.0).clamp(0.0, 20.0);
    let volume_score = ((inputs.review_count as f64 + 1.0).log10() * 3.0).min(10.0);
    (rating_score + volume_score).min(REVIEW_SIGNAL_MAX)
}

fn citation_consistency(inputs: &TrustScoreInputs) -> f64 {
    let present: BTreeMap<ListingSource, &SourceSignal> = inputs
        .sources
        .iter()
        .filter_map(|(name, signal)| ListingSource::parse(name).map(|s| (s, signal)))
        .collect();

    let base = match present.len() {
        0 => 0.0,
        1 => 3.0,
        2 => 6.0,
        _ => 10.0,
    };
    let verified = present.values().filter(|s| s.verified).count() as f64 * 5.0;

    (base + verified).min(CITATION_MAX)
}

fn web_presence(inputs: &TrustScoreInputs) -> f64 {
    let has_website = inputs
        .website
        .as_deref()
        .map(|w| !w.trim().is_empty())
        .unwrap_or(false);
    if !has_website {
        return 0.0;
    }

    let mut score: f64 = 10.0;
    if inputs.has_ssl {
        score += 5.0;
    }
    if inputs.has_schema {
        score += 5.0;
    }
    score.min(WEB_PRESENCE_MAX)
}

fn licensing_signal(inputs: &TrustScoreInputs) -> f64 {
    let mut score: f64 = 0.0;
    if inputs.licensed {
        score += 7.0;
    }
    if inputs.insured {
        score += 7.0;
    }
    // One point for any certification at all; more don't stack.
    if !inputs.certifications.is_empty() {
        score += 1.0;
    }
    score.min(LICENSING_MAX)
}

fn responsiveness(inputs: &TrustScoreInputs, now: DateTime<Utc>) -> f64 {
    let mut score = 0.0;
    if inputs.claimed {
        score += 5.0;
    }

    if let Some(rate) = inputs.response_rate.filter(|r| r.is_finite()) {
        score += rate.clamp(0.0, 1.0) * 3.0;
    }

    if let Some(updated) = inputs.last_updated {
        // Future timestamps count as just updated.
        let age = (now - updated).max(Duration::zero());
        if age <= Duration::days(30) {
            score += 2.0;
        } else if age <= Duration::days(90) {
            score += 1.0;
        }
    }

    score.min(RESPONSIVENESS_MAX)
}

fn round_display(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
