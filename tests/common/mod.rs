#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use transit_live::cache::ManualClock;
use transit_live::config::CacheTtls;
use transit_live::error::{OriginError, StoreError};
use transit_live::extract::Extractors;
use transit_live::gtfs_feed::GtfsFeed;
use transit_live::origin::LiveOrigin;
use transit_live::reference::{
    GtfsStore, ReferenceStore, RouteRecord, RouteSummary, Shape, ShapePoint, StopRow, StopVisit,
    TripDetail,
};
use transit_live::state::{AppState, EndpointCaches};

pub const ALLOWED_ORIGIN: &str = "https://buses.example";

pub const STOP_PAGE: &str = r#"
    <html><body><form id="form1">
      <div id="pnlStopTimetable">
        <table>
          <tr><th>Route</th><th>Destination</th><th>Due</th></tr>
          <tr>
            <td><a href="RealTimeFleetTrip.aspx?fleet=1234&amp;trip=8812">940</a></td>
            <td>City Centre</td>
            <td><span class="live">LIVE</span> 2 MIN</td>
          </tr>
          <tr><td>25</td><td>Airport</td><td>14:05</td></tr>
        </table>
      </div>
    </form></body></html>
"#;

pub const TRIP_PAGE: &str = r#"
    <html><body>
      <div id="serverSideRenderList">
        <div class="tripHeader">
          <span class="routeNumber">940</span>
          <span class="fleetNumber">1234</span>
        </div>
        <ul>
          <li class="tripStop"><span>Main Street</span><span>10001</span><span>10:31</span><span>Departed</span></li>
          <li class="tripStop"><span>Bus Station</span><span>10003</span><span>10:44</span><span>Predicted</span></li>
        </ul>
      </div>
    </body></html>
"#;

/// A page the operator has since redesigned: the expected panels are gone.
pub const REDESIGNED_PAGE: &str = "<html><body><main>New site!</main></body></html>";

#[derive(Clone)]
pub enum Page {
    Html(String),
    Status(u16),
    Down,
}

/// In-memory operator site. Unknown stops and vehicles answer 404.
#[derive(Default)]
pub struct FakeOrigin {
    stops: HashMap<String, Page>,
    fleets: HashMap<String, Page>,
    calls: AtomicUsize,
}

impl FakeOrigin {
    pub fn with_stop(mut self, stop: &str, page: Page) -> Self {
        self.stops.insert(stop.to_string(), page);
        self
    }

    pub fn with_fleet(mut self, fleet: &str, page: Page) -> Self {
        self.fleets.insert(fleet.to_string(), page);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn serve(&self, pages: &HashMap<String, Page>, key: &str) -> Result<String, OriginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = format!("fake://{}", key);
        match pages.get(key) {
            Some(Page::Html(html)) => Ok(html.clone()),
            Some(Page::Status(status)) => Err(OriginError::Http { status: *status, url }),
            Some(Page::Down) => Err(OriginError::Unreachable {
                url,
                reason: "connection refused".to_string(),
            }),
            None => Err(OriginError::Http { status: 404, url }),
        }
    }
}

#[async_trait]
impl LiveOrigin for FakeOrigin {
    async fn stop_results(&self, stop_number: &str) -> Result<String, OriginError> {
        self.serve(&self.stops, stop_number)
    }

    async fn fleet_trip(&self, fleet_number: &str) -> Result<String, OriginError> {
        self.serve(&self.fleets, fleet_number)
    }
}

/// Wraps a store and counts every query that reaches it.
pub struct CountingStore<S> {
    inner: S,
    calls: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        CountingStore {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: ReferenceStore> ReferenceStore for CountingStore<S> {
    async fn search_routes(&self, query: &str, limit: usize) -> Result<Vec<RouteSummary>, StoreError> {
        self.hit();
        self.inner.search_routes(query, limit).await
    }

    async fn search_stops(&self, query: &str, limit: usize) -> Result<Vec<StopRow>, StoreError> {
        self.hit();
        self.inner.search_stops(query, limit).await
    }

    async fn stop(&self, id: &str) -> Result<Option<StopRow>, StoreError> {
        self.hit();
        self.inner.stop(id).await
    }

    async fn trip(&self, id: &str) -> Result<Option<TripDetail>, StoreError> {
        self.hit();
        self.inner.trip(id).await
    }

    async fn shape(&self, id: &str) -> Result<Option<Shape>, StoreError> {
        self.hit();
        self.inner.shape(id).await
    }
}

/// A store whose backend is gone.
pub struct FailingStore;

fn unavailable() -> StoreError {
    StoreError::Query("database connection lost".to_string())
}

#[async_trait]
impl ReferenceStore for FailingStore {
    async fn search_routes(&self, _: &str, _: usize) -> Result<Vec<RouteSummary>, StoreError> {
        Err(unavailable())
    }

    async fn search_stops(&self, _: &str, _: usize) -> Result<Vec<StopRow>, StoreError> {
        Err(unavailable())
    }

    async fn stop(&self, _: &str) -> Result<Option<StopRow>, StoreError> {
        Err(unavailable())
    }

    async fn trip(&self, _: &str) -> Result<Option<TripDetail>, StoreError> {
        Err(unavailable())
    }

    async fn shape(&self, _: &str) -> Result<Option<Shape>, StoreError> {
        Err(unavailable())
    }
}

pub fn sample_feed() -> GtfsFeed {
    let route = |id: &str, short: &str, long: &str| RouteRecord {
        id: id.to_string(),
        short_name: short.to_string(),
        long_name: long.to_string(),
    };
    let stop = |id: &str, name: &str, lat: f64, lon: f64| StopRow {
        id: id.to_string(),
        name: name.to_string(),
        number: id.to_string(),
        lat,
        lon,
    };
    let visit = |stop_id: &str, sequence: u32, time: &str| StopVisit {
        stop_id: stop_id.to_string(),
        sequence,
        arrival_time: Some(time.to_string()),
        departure_time: Some(time.to_string()),
    };

    let trip = TripDetail {
        id: "501".to_string(),
        route_id: "1".to_string(),
        headsign: Some("City Centre".to_string()),
        shape_id: Some("77".to_string()),
        stops: vec![visit("10001", 1, "10:31:00"), visit("10003", 2, "10:44:00")],
    };
    let shape = Shape {
        id: "77".to_string(),
        points: vec![
            ShapePoint { latitude: 51.5, longitude: -0.12, sequence: 1 },
            ShapePoint { latitude: 51.51, longitude: -0.11, sequence: 2 },
        ],
    };

    GtfsFeed {
        routes: vec![
            route("1", "940", "Harbour - City Centre"),
            route("2", "25", "Airport Express"),
            route("3", "X94", "Night Service"),
        ],
        stops: vec![
            stop("10001", "Main Street", 51.5, -0.12),
            stop("10003", "Bus Station", 51.51, -0.11),
            stop("20040", "Airport Terminal", 51.47, -0.45),
        ],
        trips: HashMap::from([(trip.id.clone(), trip)]),
        shapes: HashMap::from([(shape.id.clone(), shape)]),
        cached_at: 0,
        source: "test".to_string(),
    }
}

pub fn sample_store() -> GtfsStore {
    GtfsStore::new(sample_feed())
}

pub fn ttls() -> CacheTtls {
    CacheTtls {
        live_stop: Duration::from_secs(30),
        live_trip: Duration::from_secs(10),
        search: Duration::from_secs(3600),
        entity: Duration::from_secs(30_000),
    }
}

pub fn app_state(
    origin: Arc<dyn LiveOrigin>,
    store: Arc<dyn ReferenceStore>,
    clock: Arc<ManualClock>,
) -> AppState {
    AppState {
        origin,
        store,
        extractors: Arc::new(Extractors::new().unwrap()),
        caches: Arc::new(EndpointCaches::with_clock(&ttls(), 1_000, clock)),
        search_limit: 25,
    }
}

/// Builds the service with the same middleware stack as the binary.
macro_rules! test_app {
    ($state:expr) => {{
        let policy = transit_live::cors::CorsPolicy::new(vec![
            $crate::common::ALLOWED_ORIGIN.to_string(),
        ]);
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($state))
                .app_data(actix_web::web::Data::new(policy.clone()))
                .wrap(policy.cors())
                .wrap(actix_web::middleware::from_fn(transit_live::cors::cors_gate))
                .configure(transit_live::api::configure),
        )
        .await
    }};
}
