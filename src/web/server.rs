use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::cache::{keys, ttl, CacheCoordinator, EntityType};
use crate::config::WebConfig;
use crate::metrics::{render_metrics, ServiceMetrics};
use crate::trust::{calculate_trust_score, score_to_badge, TrustBadge, TrustScoreBreakdown, TrustScoreInputs};

/// Web API - スコア計算 + キャッシュ無効化のフック
/// The caller side of the cache: scores through read-through, writes
/// through `invalidate_related`.
pub struct WebServer {
    state: AppState,
    config: WebConfig,
}

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheCoordinator>,
    pub metrics: Arc<ServiceMetrics>,
}

#[derive(Serialize)]
struct ScoreResponse {
    breakdown: TrustScoreBreakdown,
    badge: TrustBadge,
    #[serde(skip_serializing_if = "Option::is_none")]
    cached: Option<bool>,
}

#[derive(Serialize)]
struct InvalidateResponse {
    entity: String,
    id: Option<String>,
    purged: u64,
    ignored: bool,
}

impl WebServer {
    pub fn new(state: AppState, config: WebConfig) -> Self {
        Self { state, config }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        if !self.config.enabled {
            info!("Web API disabled");
            return Ok(());
        }

        let app = router(self.state.clone());

        let addr = format!("{}:{}", self.config.address, self.config.port);
        info!("🌐 Web API listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/trust-score", post(api_trust_score))
        .route("/api/businesses/:id/trust-score", post(api_business_trust_score))
        .route("/api/invalidate/:entity", post(api_invalidate_all))
        .route("/api/invalidate/:entity/:id", post(api_invalidate))
        .route("/api/stats", get(api_stats))
        .route("/metrics", get(api_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn score(state: &AppState, inputs: &TrustScoreInputs) -> TrustScoreBreakdown {
    let breakdown = calculate_trust_score(inputs);
    state.metrics.scores_computed.fetch_add(1, Ordering::Relaxed);
    state.metrics.inc_badge(score_to_badge(breakdown.total).level);
    breakdown
}

/// Uncached scoring
async fn api_trust_score(
    State(state): State<AppState>,
    Json(inputs): Json<TrustScoreInputs>,
) -> Json<ScoreResponse> {
    state.metrics.score_requests.fetch_add(1, Ordering::Relaxed);
    let breakdown = score(&state, &inputs);
    Json(ScoreResponse {
        badge: score_to_badge(breakdown.total),
        breakdown,
        cached: None,
    })
}

/// Read-through scoring for one business
async fn api_business_trust_score(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(inputs): Json<TrustScoreInputs>,
) -> Json<ScoreResponse> {
    state.metrics.score_requests.fetch_add(1, Ordering::Relaxed);

    let mut computed = false;
    let breakdown: TrustScoreBreakdown = state
        .cache
        .remember(&keys::business_trust_score(&id), ttl::MEDIUM, || {
            computed = true;
            let breakdown = score(&state, &inputs);
            async move { breakdown }
        })
        .await;

    Json(ScoreResponse {
        badge: score_to_badge(breakdown.total),
        breakdown,
        cached: Some(!computed),
    })
}

async fn api_invalidate_all(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Json<InvalidateResponse> {
    invalidate(&state, entity, None).await
}

async fn api_invalidate(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> Json<InvalidateResponse> {
    invalidate(&state, entity, Some(id)).await
}

async fn invalidate(state: &AppState, entity: String, id: Option<String>) -> Json<InvalidateResponse> {
    state.metrics.invalidation_requests.fetch_add(1, Ordering::Relaxed);

    let (purged, ignored) = match entity.parse::<EntityType>() {
        Ok(kind) => (state.cache.invalidate_related(kind, id.as_deref()).await, false),
        Err(e) => {
            // Nothing to purge for types we don't cache
            debug!("Ignoring invalidation: {}", e);
            state.metrics.invalidations_ignored.fetch_add(1, Ordering::Relaxed);
            (0, true)
        }
    };

    Json(InvalidateResponse {
        entity,
        id,
        purged,
        ignored,
    })
}

/// Stats API
async fn api_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "cache": state.cache.get_stats(),
        "service": state.metrics.get_stats(),
    }))
}

async fn api_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(&state.cache, &state.metrics),
    )
}
