use actix_web::middleware::from_fn;
use actix_web::{App, HttpServer, middleware, web};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use transit_live::api;
use transit_live::config::Settings;
use transit_live::cors::{CorsPolicy, cors_gate};
use transit_live::error::StartupError;
use transit_live::extract::Extractors;
use transit_live::gtfs_feed::load_reference_feed;
use transit_live::origin::HttpOrigin;
use transit_live::reference::GtfsStore;
use transit_live::state::{AppState, EndpointCaches};

// ============================================================================
// Logging
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_JSON")
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

// ============================================================================
// Background Task
// ============================================================================

async fn cache_sweep_task(caches: Arc<EndpointCaches>, every: Duration) {
    let mut interval = time::interval(every);

    loop {
        interval.tick().await;

        let removed = caches.sweep_expired();
        if removed > 0 {
            info!("🧹 Cache sweep removed {} expired entries", removed);
        } else {
            debug!("🧹 Cache sweep: nothing expired");
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

fn build_state(settings: &Settings) -> Result<AppState, StartupError> {
    info!("📡 Loading reference feed...");
    let feed = load_reference_feed(
        settings.gtfs_path.as_deref(),
        settings.gtfs_url.as_deref(),
        settings.snapshot_max_age_days,
    )?;
    info!(
        "✓ Reference feed ready: {} routes, {} stops, {} trips, {} shapes",
        feed.routes.len(),
        feed.stops.len(),
        feed.trips.len(),
        feed.shapes.len()
    );

    Ok(AppState {
        origin: Arc::new(HttpOrigin::new(&settings.origin_base_url, settings.origin_timeout)?),
        store: Arc::new(GtfsStore::new(feed)),
        extractors: Arc::new(Extractors::new()?),
        caches: Arc::new(EndpointCaches::new(&settings.ttls, settings.cache_max_entries)),
        search_limit: settings.search_limit,
    })
}

async fn run_server(settings: Settings, app_state: AppState) -> std::io::Result<()> {
    let policy = CorsPolicy::new(settings.allowed_origins.clone());

    let sweep_caches = app_state.caches.clone();
    let sweep_every = settings.cache_sweep_interval;
    tokio::spawn(async move {
        cache_sweep_task(sweep_caches, sweep_every).await;
    });

    info!("🚀 Transit live server v{}", env!("CARGO_PKG_VERSION"));
    info!("🌐 Listening on http://{}", settings.bind_addr);
    info!("🛰️  Live origin: {}", settings.origin_base_url);
    info!("🔐 Allowed origins: {}", settings.allowed_origins.join(", "));
    info!(
        "⏱️  Cache TTLs: live-stop {}s, live-trip {}s, search {}s, entities {}s",
        settings.ttls.live_stop.as_secs(),
        settings.ttls.live_trip.as_secs(),
        settings.ttls.search.as_secs(),
        settings.ttls.entity.as_secs()
    );
    info!("📍 Routes:");
    info!("   GET  /live-stop/{{stopNumber}}    - Upcoming arrivals at a stop");
    info!("   GET  /live-trip/{{fleetNumber}}   - Current trip of a vehicle");
    info!("   GET  /routes/{{query}}            - Route search");
    info!("   GET  /stops/{{query}}             - Stop search");
    info!("   GET  /stop/{{id}}                 - Stop by id");
    info!("   GET  /trip/{{id}}                 - Trip with stop visits");
    info!("   GET  /shape/{{id}}                - Shape geometry");
    info!("   GET  /api/stats                 - Cache statistics");
    info!("   GET  /health                    - Health check");

    let bind_addr = settings.bind_addr.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(policy.clone()))
            .wrap(middleware::Compress::default())
            .wrap(policy.cors())
            .wrap(from_fn(cors_gate))
            .wrap(middleware::Logger::default())
            .configure(api::configure)
    })
    .bind(bind_addr)?
    .run()
    .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let started = Settings::from_env()
        .map_err(StartupError::from)
        .and_then(|settings| build_state(&settings).map(|state| (settings, state)));

    let (settings, app_state) = match started {
        Ok(started) => started,
        Err(e) => {
            error!("❌ Server cannot start: {}", e);
            error!("💡 Check ORIGIN_BASE_URL, GTFS_PATH / GTFS_URL and network access");
            std::process::exit(1);
        }
    };

    actix_web::rt::System::new().block_on(run_server(settings, app_state))
}
