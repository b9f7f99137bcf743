// HTTP handlers: live scraping endpoints, reference lookups, health and stats.

use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use tracing::info;

use crate::cache::{TtlCache, normalize_key};
use crate::error::ApiError;
use crate::state::AppState;

const MAX_QUERY_LEN: usize = 100;

#[derive(Serialize)]
struct DataEnvelope<T> {
    data: T,
}

// ============================================================================
// Validation
// ============================================================================

/// A stop, fleet or entity id: non-empty and a whole number.
fn numeric_param(name: &'static str, raw: &str) -> Result<String, ApiError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ApiError::validation(name, "must not be empty"));
    }
    // Digits only: `parse` would also take a leading `+`, which the origin
    // reads as a space and which would split one stop over two cache keys.
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::validation(name, "must be a whole number"));
    }
    Ok(value.to_string())
}

fn search_param(name: &'static str, raw: &str) -> Result<String, ApiError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ApiError::validation(name, "must not be empty"));
    }
    if value.chars().count() > MAX_QUERY_LEN {
        return Err(ApiError::validation(
            name,
            format!("must be at most {} characters", MAX_QUERY_LEN),
        ));
    }
    Ok(value.to_string())
}

/// Serves `key` from `cache`, or awaits `fetch` and stores its result. The
/// fetch is never polled on a hit; a failed fetch leaves the cache untouched.
async fn through_cache<T, Fut>(cache: &TtlCache<T>, key: &str, fetch: Fut) -> Result<T, ApiError>
where
    T: Clone,
    Fut: Future<Output = Result<T, ApiError>>,
{
    if let Some(hit) = cache.get(key) {
        info!("⚡ {} [{}]: cache hit", cache.name(), key);
        return Ok(hit);
    }

    let value = fetch.await?;
    cache.set(key, value.clone());
    info!("🔄 {} [{}]: cache miss, stored fresh result", cache.name(), key);
    Ok(value)
}

// ============================================================================
// Live Endpoints
// ============================================================================

pub async fn live_stop(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let stop_number = numeric_param("stopNumber", &path)?;

    let fetched = through_cache(&state.caches.live_stop, &stop_number, async {
        let html = state.origin.stop_results(&stop_number).await?;
        Ok::<_, ApiError>(state.extractors.stop_timetable.extract(&html)?)
    })
    .await;

    // An operator 404 means nothing is due at this stop; the empty answer is
    // not cached so the next request asks again.
    let arrivals = match fetched {
        Ok(arrivals) => arrivals,
        Err(ApiError::Origin(e)) if e.is_not_found() => {
            info!("📍 Live stop {}: operator has no timetable", stop_number);
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    info!(
        "📍 Live stop {}: {} arrivals ({} live)",
        stop_number,
        arrivals.len(),
        arrivals.iter().filter(|a| a.live_status).count()
    );
    Ok(HttpResponse::Ok().json(DataEnvelope { data: arrivals }))
}

pub async fn live_trip(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let fleet_number = numeric_param("fleetNumber", &path)?;

    let trip = through_cache(&state.caches.live_trip, &fleet_number, async {
        let html = state.origin.fleet_trip(&fleet_number).await.map_err(|e| {
            if e.is_not_found() {
                ApiError::NotFound(format!(
                    "No trip information found for fleet number {}. \
                     The vehicle may not be in service or the fleet number may be incorrect.",
                    fleet_number
                ))
            } else {
                e.into()
            }
        })?;

        let mut trip = state.extractors.fleet_trip.extract(&html)?;
        if trip.associated_fleet_number.is_empty() {
            trip.associated_fleet_number = fleet_number.clone();
        }
        Ok::<_, ApiError>(trip)
    })
    .await?;

    info!(
        "🚌 Live trip for fleet {}: route {}, {} stops",
        fleet_number,
        trip.route_number,
        trip.stops.len()
    );
    Ok(HttpResponse::Ok().json(DataEnvelope { data: trip }))
}

// ============================================================================
// Reference Endpoints
// ============================================================================

pub async fn search_routes(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let query = normalize_key(&search_param("query", &path)?);

    let routes = through_cache(&state.caches.route_search, &query, async {
        Ok::<_, ApiError>(state.store.search_routes(&query, state.search_limit).await?)
    })
    .await?;

    info!("🔎 Route search {:?}: {} matches", query, routes.len());
    Ok(HttpResponse::Ok().json(routes))
}

pub async fn search_stops(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let query = normalize_key(&search_param("query", &path)?);

    let stops = through_cache(&state.caches.stop_search, &query, async {
        Ok::<_, ApiError>(state.store.search_stops(&query, state.search_limit).await?)
    })
    .await?;

    info!("🔎 Stop search {:?}: {} matches", query, stops.len());
    Ok(HttpResponse::Ok().json(stops))
}

pub async fn get_stop(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = numeric_param("id", &path)?;

    let stop = through_cache(&state.caches.stop_by_id, &id, async {
        state
            .store
            .stop(&id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Stop '{}' not found", id)))
    })
    .await?;

    info!("📍 Stop retrieved: {} ({})", stop.name, stop.id);
    Ok(HttpResponse::Ok().json(stop))
}

pub async fn get_trip(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = numeric_param("id", &path)?;

    let trip = through_cache(&state.caches.trip_by_id, &id, async {
        state
            .store
            .trip(&id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Trip '{}' not found", id)))
    })
    .await?;

    info!("🧭 Trip retrieved: {} ({} stop visits)", trip.id, trip.stops.len());
    Ok(HttpResponse::Ok().json(trip))
}

pub async fn get_shape(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = numeric_param("id", &path)?;

    let shape = through_cache(&state.caches.shape_by_id, &id, async {
        state
            .store
            .shape(&id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Shape '{}' not found", id)))
    })
    .await?;

    info!("🗺️  Shape retrieved: {} ({} points)", shape.id, shape.points.len());
    Ok(HttpResponse::Ok().json(shape))
}

// ============================================================================
// Meta
// ============================================================================

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "transit-live",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().timestamp(),
    }))
}

pub async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "caches": state.caches.stats(),
        "timestamp": Utc::now().timestamp(),
    }))
}

/// Registers every route. Path parameters accept an empty segment so that
/// `/live-stop/` is answered with a validation error instead of a 404.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/api/stats", web::get().to(get_stats))
        .route("/live-stop/{stop_number:[^/]*}", web::get().to(live_stop))
        .route("/live-trip/{fleet_number:[^/]*}", web::get().to(live_trip))
        .route("/routes/{query:[^/]*}", web::get().to(search_routes))
        .route("/stops/{query:[^/]*}", web::get().to(search_stops))
        .route("/stop/{id:[^/]*}", web::get().to(get_stop))
        .route("/trip/{id:[^/]*}", web::get().to(get_trip))
        .route("/shape/{id:[^/]*}", web::get().to(get_shape));
}
