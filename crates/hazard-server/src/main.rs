//! Hazard Server - live presence sharing and hazard alerts

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hazard_core::{BoundingBox, CircularWalk, GeoPoint};
use hazard_server::cache::{CacheLayer, RedisTier};
use hazard_server::config::Config;
use hazard_server::persistence::{init_database, SqliteStore};
use hazard_server::ports::{ChangeFeed, PositionSource, RemoteCacheTier, ReportSource};
use hazard_server::sources::{HttpReportSource, SimulatedPositionSource};
use hazard_server::state::AppState;
use hazard_server::sync::{LocalChangeFeed, SyncProtocol, WsChangeFeed};
use hazard_server::{api, loops};

/// Initial viewport around a simulated walker (meters).
const SIM_VIEWPORT_RADIUS_M: f64 = 2_000.0;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hazard_server=debug".parse()?),
        )
        .init();

    tracing::info!("Starting Hazard Server...");

    let config = Config::from_env();
    let port = config.server_port;

    let db = init_database(&config.database_path, config.database_max_connections).await?;

    let remote: Option<Arc<dyn RemoteCacheTier>> = match config.redis_url.as_deref() {
        Some(url) => match RedisTier::connect(url).await {
            Ok(tier) => Some(Arc::new(tier)),
            Err(err) => {
                tracing::warn!("Remote cache unavailable ({}); using local cache only", err);
                None
            }
        },
        None => None,
    };
    let cache = Arc::new(CacheLayer::new(remote, config.local_cache_ttl));

    let feed = Arc::new(LocalChangeFeed::new());
    let store = SqliteStore::new(db, feed.clone());
    let reports: Option<Arc<dyn ReportSource>> = match config.report_source_url.as_deref() {
        Some(url) => Some(Arc::new(HttpReportSource::new(url)?)),
        None => None,
    };
    let state = Arc::new(AppState::new(
        config.clone(),
        cache,
        store,
        feed.clone(),
        reports,
    ));

    let source: Option<Arc<dyn PositionSource>> = match (config.sim_center_lat, config.sim_center_lng) {
        (Some(lat), Some(lng)) => {
            let center = GeoPoint::checked(lat, lng)?;
            state.set_viewport(BoundingBox::around(&center, SIM_VIEWPORT_RADIUS_M));
            tracing::info!(
                "Simulating {} walking {} m around ({}, {})",
                config.local_entity_id,
                config.sim_radius_m,
                lat,
                lng
            );
            let walk = CircularWalk::new(center, config.sim_radius_m, config.sim_speed_mps);
            Some(Arc::new(SimulatedPositionSource::new(walk, Duration::from_secs(1))))
        }
        _ => None,
    };
    let sharing = source.is_some();

    let change_feed: Arc<dyn ChangeFeed> = match config.peer_feed_url.as_deref() {
        Some(url) => Arc::new(WsChangeFeed::new(url)),
        None => feed.clone(),
    };
    let sync = Arc::new(SyncProtocol::new(
        config.local_entity_id.clone(),
        state.pipeline().clone(),
        change_feed,
        source,
    ));
    sync.start().await;

    // Start background loops
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let loop_handles = vec![
        tokio::spawn(loops::presence_sweep_loop::run_presence_sweep_loop(
            state.clone(),
            shutdown_tx.subscribe(),
        )),
        tokio::spawn(loops::hazard_refresh_loop::run_hazard_refresh_loop(
            state.clone(),
            shutdown_tx.subscribe(),
        )),
        tokio::spawn(loops::cache_prune_loop::run_cache_prune_loop(
            state.clone(),
            shutdown_tx.subscribe(),
        )),
    ];

    let app = api::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(());
    sync.stop().await;
    if sharing {
        if let Err(err) = sync.stop_sharing().await {
            tracing::warn!("Failed to withdraw {}: {}", config.local_entity_id, err);
        }
    }
    for handle in loop_handles {
        handle.await.ok();
    }

    tracing::info!("Hazard Server stopped");
    Ok(())
}
