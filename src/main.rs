mod api;
mod catalog;
mod config;
mod crowd;
mod detectors;
mod error;
mod health;
mod interventions;
mod model;
mod realtime;
mod stats;
mod store;
mod ws;

use std::str::FromStr;
use std::sync::Arc;

use axum::http::{header, Method};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use api::AppState;
use config::Config;
use store::{LiveStore, MemoryStore, RedisStore};

#[derive(OpenApi)]
#[openapi(
    info(title = "BusIQ Network Intelligence API", version = "0.1.0"),
    paths(
        api::buses::list_buses,
        api::buses::get_bus,
        api::predictions::ghosts,
        api::predictions::bunching_report,
        api::crowding::snapshot,
        api::crowding::recent,
        api::crowding::submit_report,
        api::ops::list_interventions,
        api::ops::action_intervention,
        api::ops::interventions_history,
        api::ops::network_health,
        api::ops::stats_summary,
        api::liveness::liveness,
    ),
    components(schemas(
        model::VehicleRecord,
        model::OccupancyStatus,
        detectors::ghost::GhostReport,
        detectors::ghost::GhostBus,
        detectors::ghost::GhostRoute,
        detectors::bunching::BunchingReport,
        detectors::bunching::BunchingAlert,
        detectors::bunching::BunchingPair,
        detectors::bunching::Severity,
        crowd::CrowdingSnapshot,
        crowd::RouteCrowdingSummary,
        model::CrowdReport,
        model::CrowdReportRequest,
        model::CrowdingLevel,
        api::ops::InterventionsResponse,
        api::ops::InterventionActionRequest,
        model::Intervention,
        model::InterventionType,
        model::InterventionPriority,
        model::InterventionStatus,
        model::InterventionTrigger,
        model::InterventionAction,
        model::HealthReport,
        model::HealthComponent,
        model::RouteHealth,
        stats::StatsSummary,
        stats::PeakHour,
        stats::RouteAppearance,
        api::liveness::LivenessResponse,
    )),
    tags(
        (name = "buses", description = "Live fleet snapshot"),
        (name = "predictions", description = "Ghost bus and bunching detection"),
        (name = "crowding", description = "Rider-submitted crowding reports"),
        (name = "ops", description = "Intervention engine, network health, and stats"),
        (name = "health", description = "Process liveness"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let config = Config::load("config.yaml").expect("failed to load config.yaml");
    tracing::info!(
        feeds = 2,
        catalog_urls = config.static_catalog_urls.len(),
        "config.loaded"
    );
    let config = Arc::new(config);

    let cors_layer = if config.cors_permissive {
        tracing::warn!("cors.permissive_enabled — do not use in production");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        let origins: Vec<_> = config.cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        tracing::info!(origins = ?config.cors_origins, "cors.restricted");
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        tracing::warn!(
            "cors.no_origins_configured — falling back to a restrictive, no-origin CORS layer; set 'cors_origins' or 'cors_permissive: true' to allow browser clients"
        );
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
    };

    let timezone = chrono_tz::Tz::from_str(&config.timezone)
        .unwrap_or_else(|_| panic!("invalid timezone: {}", config.timezone));

    let client = reqwest::Client::builder()
        .user_agent("busiq/0.1")
        .build()
        .expect("failed to build HTTP client");

    let catalog = Arc::new(catalog::StaticCatalog::load(&client, &config.static_catalog_urls).await);

    let redis_url = config.redis_url.clone().unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
    let store: Arc<dyn LiveStore> = match RedisStore::connect(&redis_url).await {
        Ok(redis) => {
            tracing::info!("store.redis_connected");
            Arc::new(redis)
        }
        Err(e) => {
            tracing::warn!(error = %e, "store.redis_unavailable — falling back to in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState {
        catalog: catalog.clone(),
        store: store.clone(),
        config: config.clone(),
        timezone,
        action_lock: Arc::new(Mutex::new(())),
    };

    let cancel = CancellationToken::new();

    let poller_config = realtime::PollerConfig {
        vehicle_positions_url: config.vehicle_positions_url.clone(),
        trip_updates_url: config.trip_updates_url.clone(),
        api_key: config.realtime_api_key.clone(),
    };
    let poll_interval = std::time::Duration::from_secs(config.poll_interval_secs);
    tokio::spawn(realtime::run(
        poller_config,
        client.clone(),
        catalog.clone(),
        store.clone(),
        poll_interval,
        cancel.clone(),
    ));

    let stats_path = std::path::PathBuf::from(&config.stats_file);
    let stats_interval = std::time::Duration::from_secs(config.stats_interval_secs);
    tokio::spawn(stats::run(stats_path, catalog.clone(), store.clone(), stats_interval, cancel.clone()));

    let app = axum::Router::new()
        .merge(api::router(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    let addr = format!("{}:{}", config.bind_host, config.bind_port);
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind");
    tracing::info!(addr, "server.listening");
    tracing::info!("swagger UI: http://{addr}/swagger-ui");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("server.shutting_down");
            shutdown_cancel.cancel();
        })
        .await
        .expect("server error");
}
