// Shared application state: the live origin, the reference store, the page
// extractors and one cache per endpoint family. Built once at startup and
// handed to every worker through `web::Data`.

use std::sync::Arc;

use crate::cache::{CacheStats, Clock, SystemClock, TtlCache};
use crate::config::CacheTtls;
use crate::extract::Extractors;
use crate::live_models::{LiveTrip, StopArrival};
use crate::origin::LiveOrigin;
use crate::reference::{ReferenceStore, RouteSummary, Shape, StopRow, TripDetail};

pub struct EndpointCaches {
    pub live_stop: TtlCache<Vec<StopArrival>>,
    pub live_trip: TtlCache<LiveTrip>,
    pub route_search: TtlCache<Vec<RouteSummary>>,
    pub stop_search: TtlCache<Vec<StopRow>>,
    pub stop_by_id: TtlCache<StopRow>,
    pub trip_by_id: TtlCache<TripDetail>,
    pub shape_by_id: TtlCache<Shape>,
}

impl EndpointCaches {
    pub fn new(ttls: &CacheTtls, max_entries: usize) -> Self {
        Self::with_clock(ttls, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(ttls: &CacheTtls, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        EndpointCaches {
            live_stop: TtlCache::with_clock("live-stop", ttls.live_stop, max_entries, clock.clone()),
            live_trip: TtlCache::with_clock("live-trip", ttls.live_trip, max_entries, clock.clone()),
            route_search: TtlCache::with_clock("route-search", ttls.search, max_entries, clock.clone()),
            stop_search: TtlCache::with_clock("stop-search", ttls.search, max_entries, clock.clone()),
            stop_by_id: TtlCache::with_clock("stop-by-id", ttls.entity, max_entries, clock.clone()),
            trip_by_id: TtlCache::with_clock("trip-by-id", ttls.entity, max_entries, clock.clone()),
            shape_by_id: TtlCache::with_clock("shape-by-id", ttls.entity, max_entries, clock),
        }
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        vec![
            self.live_stop.stats(),
            self.live_trip.stats(),
            self.route_search.stats(),
            self.stop_search.stats(),
            self.stop_by_id.stats(),
            self.trip_by_id.stats(),
            self.shape_by_id.stats(),
        ]
    }

    /// Drops expired entries from every cache; returns the total removed.
    pub fn sweep_expired(&self) -> usize {
        self.live_stop.sweep_expired()
            + self.live_trip.sweep_expired()
            + self.route_search.sweep_expired()
            + self.stop_search.sweep_expired()
            + self.stop_by_id.sweep_expired()
            + self.trip_by_id.sweep_expired()
            + self.shape_by_id.sweep_expired()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub origin: Arc<dyn LiveOrigin>,
    pub store: Arc<dyn ReferenceStore>,
    pub extractors: Arc<Extractors>,
    pub caches: Arc<EndpointCaches>,
    pub search_limit: usize,
}
