use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use trust_cache::cache::CacheCoordinator;
use trust_cache::config::Config;
use trust_cache::metrics::ServiceMetrics;
use trust_cache::web::server::{AppState, WebServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (LOG_FORMAT=json for structured output)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trust_cache=info".into());
    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("trust-cache v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "trust-cache.toml".to_string());

    let config = Config::load(&config_path)?;
    info!("Config loaded from {}", config_path);

    // Shared store if configured and reachable, local store otherwise
    let cache = Arc::new(CacheCoordinator::connect(&config.cache).await);
    info!("Cache backend: {}", cache.backend_name());

    // Start local cache sweeper
    let sweeper = cache.clone();
    let sweep_interval = Duration::from_secs(config.cache.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        sweeper.run_sweeper(sweep_interval).await;
    });

    let state = AppState {
        cache,
        metrics: Arc::new(ServiceMetrics::new()),
    };

    if !config.web.enabled {
        info!("Web API disabled; idling until shutdown");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let web = WebServer::new(state, config.web.clone());
    tokio::select! {
        result = web.run() => {
            if let Err(e) = &result {
                error!("Web server error: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
