//! Prometheus-compatible metrics exporter for trust-cache
//!
//! Endpoint: GET /metrics (on the web API port, default 8080)

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::cache::CacheCoordinator;
use crate::trust::BadgeLevel;

/// Service counters updated from request handling
pub struct ServiceMetrics {
    /// Trust score requests received
    pub score_requests: AtomicU64,
    /// Scores actually computed (cache misses + uncached requests)
    pub scores_computed: AtomicU64,
    /// Invalidation requests received
    pub invalidation_requests: AtomicU64,
    /// Invalidation requests naming an unknown entity type
    pub invalidations_ignored: AtomicU64,
    /// Badge distribution of computed scores
    pub badge_elite: AtomicU64,
    pub badge_verified: AtomicU64,
    pub badge_trusted: AtomicU64,
    pub badge_listed: AtomicU64,
    /// Server start time
    pub start_time: Instant,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            score_requests: AtomicU64::new(0),
            scores_computed: AtomicU64::new(0),
            invalidation_requests: AtomicU64::new(0),
            invalidations_ignored: AtomicU64::new(0),
            badge_elite: AtomicU64::new(0),
            badge_verified: AtomicU64::new(0),
            badge_trusted: AtomicU64::new(0),
            badge_listed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn inc_badge(&self, level: BadgeLevel) {
        match level {
            BadgeLevel::Elite => self.badge_elite.fetch_add(1, Ordering::Relaxed),
            BadgeLevel::Verified => self.badge_verified.fetch_add(1, Ordering::Relaxed),
            BadgeLevel::Trusted => self.badge_trusted.fetch_add(1, Ordering::Relaxed),
            BadgeLevel::Listed => self.badge_listed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn get_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.start_time.elapsed().as_secs(),
            "score_requests": self.score_requests.load(Ordering::Relaxed),
            "scores_computed": self.scores_computed.load(Ordering::Relaxed),
            "invalidation_requests": self.invalidation_requests.load(Ordering::Relaxed),
            "invalidations_ignored": self.invalidations_ignored.load(Ordering::Relaxed),
            "badges": {
                "elite": self.badge_elite.load(Ordering::Relaxed),
                "verified": self.badge_verified.load(Ordering::Relaxed),
                "trusted": self.badge_trusted.load(Ordering::Relaxed),
                "listed": self.badge_listed.load(Ordering::Relaxed),
            },
        })
    }
}

/// Generate Prometheus-format metrics text
pub fn render_metrics(cache: &CacheCoordinator, metrics: &ServiceMetrics) -> String {
    let mut out = String::with_capacity(4096);
    let c = &cache.counters;

    // ──────────────────────────────────────────────
    // Server info
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "trustcache_up", "Whether the service is up.", "gauge");
    writeln!(out, "trustcache_up 1").ok();

    let uptime = metrics.start_time.elapsed().as_secs_f64();
    write_help_type(&mut out, "trustcache_uptime_seconds_total", "Uptime since boot in seconds.", "counter");
    writeln!(out, "trustcache_uptime_seconds_total {:.3}", uptime).ok();

    // ──────────────────────────────────────────────
    // Cache lookups
    // ──────────────────────────────────────────────
    let hits = c.hits.load(Ordering::Relaxed);
    let misses = c.misses.load(Ordering::Relaxed);
    write_help_type(&mut out, "trustcache_cache_lookups_total", "Cache lookups by result.", "counter");
    writeln!(out, "trustcache_cache_lookups_total{{result=\"hit\"}} {}", hits).ok();
    writeln!(out, "trustcache_cache_lookups_total{{result=\"miss\"}} {}", misses).ok();

    let total = hits + misses;
    let hit_rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };
    write_help_type(&mut out, "trustcache_cache_hit_ratio", "Cache hit ratio (0.0-1.0).", "gauge");
    writeln!(out, "trustcache_cache_hit_ratio {:.4}", hit_rate).ok();

    // ──────────────────────────────────────────────
    // Cache writes / deletes
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "trustcache_cache_ops_total", "Cache write operations by kind.", "counter");
    writeln!(out, "trustcache_cache_ops_total{{op=\"set\"}} {}", c.sets.load(Ordering::Relaxed)).ok();
    writeln!(out, "trustcache_cache_ops_total{{op=\"delete\"}} {}", c.deletes.load(Ordering::Relaxed)).ok();
    writeln!(out, "trustcache_cache_ops_total{{op=\"delete_pattern\"}} {}", c.pattern_deletes.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "trustcache_cache_computes_total", "Values computed after a read-through miss.", "counter");
    writeln!(out, "trustcache_cache_computes_total {}", c.computes.load(Ordering::Relaxed)).ok();

    // ──────────────────────────────────────────────
    // Invalidation
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "trustcache_invalidations_total", "Entity invalidations run.", "counter");
    writeln!(out, "trustcache_invalidations_total {}", c.invalidations.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "trustcache_keys_purged_total", "Keys removed by invalidation.", "counter");
    writeln!(out, "trustcache_keys_purged_total {}", c.keys_purged.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "trustcache_invalidations_ignored_total", "Invalidation requests for unknown entity types.", "counter");
    writeln!(out, "trustcache_invalidations_ignored_total {}", metrics.invalidations_ignored.load(Ordering::Relaxed)).ok();

    // ──────────────────────────────────────────────
    // Backend health
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "trustcache_cache_failures_total", "Swallowed cache failures by kind.", "counter");
    writeln!(out, "trustcache_cache_failures_total{{kind=\"error\"}} {}", c.backend_errors.load(Ordering::Relaxed)).ok();
    writeln!(out, "trustcache_cache_failures_total{{kind=\"timeout\"}} {}", c.timeouts.load(Ordering::Relaxed)).ok();
    writeln!(out, "trustcache_cache_failures_total{{kind=\"decode\"}} {}", c.decode_errors.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "trustcache_cache_backend_info", "Active cache backend.", "gauge");
    writeln!(out, "trustcache_cache_backend_info{{backend=\"{}\"}} 1", cache.backend_name()).ok();

    // ──────────────────────────────────────────────
    // Trust scoring
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "trustcache_score_requests_total", "Trust score requests received.", "counter");
    writeln!(out, "trustcache_score_requests_total {}", metrics.score_requests.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "trustcache_scores_computed_total", "Trust scores computed.", "counter");
    writeln!(out, "trustcache_scores_computed_total {}", metrics.scores_computed.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "trustcache_badges_total", "Computed scores by badge tier.", "counter");
    write_counter_if_nonzero(&mut out, "trustcache_badges_total", "level", "elite", metrics.badge_elite.load(Ordering::Relaxed));
    write_counter_if_nonzero(&mut out, "trustcache_badges_total", "level", "verified", metrics.badge_verified.load(Ordering::Relaxed));
    write_counter_if_nonzero(&mut out, "trustcache_badges_total", "level", "trusted", metrics.badge_trusted.load(Ordering::Relaxed));
    write_counter_if_nonzero(&mut out, "trustcache_badges_total", "level", "listed", metrics.badge_listed.load(Ordering::Relaxed));

    // ──────────────────────────────────────────────
    // Build info
    // ──────────────────────────────────────────────
    write_help_type(&mut out, "trustcache_build_info", "trust-cache build information.", "gauge");
    writeln!(out, "trustcache_build_info{{version=\"{}\"}} 1", env!("CARGO_PKG_VERSION")).ok();

    out
}

// ── helpers ─────────────────────────────────────────

fn write_help_type(out: &mut String, name: &str, help: &str, metric_type: &str) {
    writeln!(out, "# HELP {} {}", name, help).ok();
    writeln!(out, "# TYPE {} {}", name, metric_type).ok();
}

fn write_counter_if_nonzero(out: &mut String, name: &str, label: &str, value: &str, count: u64) {
    if count > 0 {
        writeln!(out, "{}{{{}=\"{}\"}} {}", name, label, value, count).ok();
    }
}
