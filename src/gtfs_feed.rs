// Static GTFS reference feed: download, parse, and snapshot persistence.
//
// The feed is loaded once at startup, before the HTTP server runs. A parsed
// snapshot of a downloaded feed is kept under the user cache directory so a
// restart does not download the archive again while it is still recent.

use bytes::Bytes;
use reqwest::blocking;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use zip::ZipArchive;

use crate::error::FeedError;
use crate::reference::{RouteRecord, Shape, ShapePoint, StopRow, StopVisit, TripDetail};

pub type Result<T> = std::result::Result<T, FeedError>;

const DOWNLOAD_TIMEOUT_SECS: u64 = 120;

// ============================================================================
// Raw GTFS rows
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawRoute {
    route_id: String,
    #[serde(default)]
    route_short_name: Option<String>,
    #[serde(default)]
    route_long_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStop {
    stop_id: String,
    #[serde(default)]
    stop_code: Option<String>,
    #[serde(default)]
    stop_name: Option<String>,
    #[serde(default)]
    stop_lat: Option<f64>,
    #[serde(default)]
    stop_lon: Option<f64>,
    #[serde(default)]
    location_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTrip {
    route_id: String,
    trip_id: String,
    #[serde(default)]
    trip_headsign: Option<String>,
    #[serde(default)]
    shape_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStopTime {
    trip_id: String,
    #[serde(default)]
    arrival_time: Option<String>,
    #[serde(default)]
    departure_time: Option<String>,
    stop_id: String,
    stop_sequence: u32,
}

#[derive(Debug, Deserialize)]
struct RawShapePoint {
    shape_id: String,
    shape_pt_lat: f64,
    shape_pt_lon: f64,
    shape_pt_sequence: u32,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Feed
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GtfsFeed {
    pub routes: Vec<RouteRecord>,
    pub stops: Vec<StopRow>,
    pub trips: HashMap<String, TripDetail>,
    pub shapes: HashMap<String, Shape>,
    pub cached_at: u64,
    pub source: String,
}

impl GtfsFeed {
    const SNAPSHOT_FILE: &'static str = "reference_feed.json";

    /// Parses a GTFS zip archive. `shapes.txt` is optional; the other tables
    /// are required.
    pub fn from_zip_bytes(bytes: Bytes, source: &str) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;

        let routes = Self::parse_routes(&mut archive)?;
        let stops = Self::parse_stops(&mut archive)?;
        let trips = Self::parse_trips(&mut archive)?;
        let shapes = Self::parse_shapes(&mut archive)?;

        info!(
            "✓ Parsed reference feed from {}: {} routes, {} stops, {} trips, {} shapes",
            source,
            routes.len(),
            stops.len(),
            trips.len(),
            shapes.len()
        );

        Ok(GtfsFeed {
            routes,
            stops,
            trips,
            shapes,
            cached_at: now_secs(),
            source: source.to_string(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_zip_bytes(Bytes::from(bytes), &path.display().to_string())
    }

    pub fn download(url: &str) -> Result<Self> {
        info!("📥 Downloading reference feed from {}...", url);

        let client = blocking::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| FeedError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| FeedError::Network(format!("Failed to download feed: {}", e)))?;

        if !response.status().is_success() {
            return Err(FeedError::Network(format!(
                "Download failed with status: {}",
                response.status()
            )));
        }

        let zip_bytes = response
            .bytes()
            .map_err(|e| FeedError::Network(format!("Failed to read feed zip: {}", e)))?;

        info!("✓ Downloaded {} KB, extracting...", zip_bytes.len() / 1024);
        Self::from_zip_bytes(zip_bytes, url)
    }

    fn read_table<T: DeserializeOwned>(
        archive: &mut ZipArchive<Cursor<Bytes>>,
        file: &'static str,
    ) -> Result<Option<Vec<T>>> {
        let mut entry = match archive.by_name(file) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut contents = String::new();
        entry.read_to_string(&mut contents)?;
        drop(entry);

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(contents.as_bytes());

        // Validate the header row up front so a wrong file fails loudly.
        rdr.headers().map_err(|source| FeedError::Csv { file, source })?;

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for record in rdr.deserialize::<T>() {
            match record {
                Ok(row) => rows.push(row),
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!("⚠️  Skipped {} malformed rows in {}", skipped, file);
        }

        Ok(Some(rows))
    }

    fn required_table<T: DeserializeOwned>(
        archive: &mut ZipArchive<Cursor<Bytes>>,
        file: &'static str,
    ) -> Result<Vec<T>> {
        Self::read_table(archive, file)?.ok_or(FeedError::MissingTable(file))
    }

    fn parse_routes(archive: &mut ZipArchive<Cursor<Bytes>>) -> Result<Vec<RouteRecord>> {
        let raw: Vec<RawRoute> = Self::required_table(archive, "routes.txt")?;

        Ok(raw
            .into_iter()
            .map(|r| RouteRecord {
                id: r.route_id,
                short_name: r.route_short_name.unwrap_or_default(),
                long_name: r.route_long_name.unwrap_or_default(),
            })
            .collect())
    }

    fn parse_stops(archive: &mut ZipArchive<Cursor<Bytes>>) -> Result<Vec<StopRow>> {
        let raw: Vec<RawStop> = Self::required_table(archive, "stops.txt")?;

        Ok(raw
            .into_iter()
            // Parent stations (location_type = 1) are not boardable stops
            .filter(|s| s.location_type.as_deref() != Some("1"))
            .filter_map(|s| {
                let (lat, lon) = (s.stop_lat?, s.stop_lon?);
                if lat == 0.0 && lon == 0.0 {
                    return None;
                }
                Some(StopRow {
                    number: non_empty(s.stop_code).unwrap_or_else(|| s.stop_id.clone()),
                    id: s.stop_id,
                    name: s.stop_name.unwrap_or_default(),
                    lat,
                    lon,
                })
            })
            .collect())
    }

    fn parse_trips(archive: &mut ZipArchive<Cursor<Bytes>>) -> Result<HashMap<String, TripDetail>> {
        let raw_trips: Vec<RawTrip> = Self::required_table(archive, "trips.txt")?;
        let raw_times: Vec<RawStopTime> = Self::required_table(archive, "stop_times.txt")?;

        let mut trips: HashMap<String, TripDetail> = raw_trips
            .into_iter()
            .map(|t| {
                let detail = TripDetail {
                    id: t.trip_id.clone(),
                    route_id: t.route_id,
                    headsign: non_empty(t.trip_headsign),
                    shape_id: non_empty(t.shape_id),
                    stops: Vec::new(),
                };
                (t.trip_id, detail)
            })
            .collect();

        for st in raw_times {
            if let Some(trip) = trips.get_mut(&st.trip_id) {
                trip.stops.push(StopVisit {
                    stop_id: st.stop_id,
                    sequence: st.stop_sequence,
                    arrival_time: non_empty(st.arrival_time),
                    departure_time: non_empty(st.departure_time),
                });
            }
        }

        for trip in trips.values_mut() {
            trip.stops.sort_by_key(|visit| visit.sequence);
        }

        Ok(trips)
    }

    fn parse_shapes(archive: &mut ZipArchive<Cursor<Bytes>>) -> Result<HashMap<String, Shape>> {
        let Some(raw) = Self::read_table::<RawShapePoint>(archive, "shapes.txt")? else {
            return Ok(HashMap::new());
        };

        let mut shapes: HashMap<String, Shape> = HashMap::new();
        for point in raw {
            shapes
                .entry(point.shape_id.clone())
                .or_insert_with(|| Shape {
                    id: point.shape_id.clone(),
                    points: Vec::new(),
                })
                .points
                .push(ShapePoint {
                    latitude: point.shape_pt_lat,
                    longitude: point.shape_pt_lon,
                    sequence: point.shape_pt_sequence,
                });
        }

        for shape in shapes.values_mut() {
            shape.points.sort_by_key(|p| p.sequence);
        }

        Ok(shapes)
    }

    // ------------------------------------------------------------------------
    // Snapshot persistence
    // ------------------------------------------------------------------------

    pub fn is_expired(&self, max_age_days: u64) -> bool {
        let age_days = now_secs().saturating_sub(self.cached_at) / 86400;
        age_days >= max_age_days
    }

    pub fn snapshot_path() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("transit_live");
        path.push(Self::SNAPSHOT_FILE);
        path
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_json::to_vec(self)?)?;
        info!("✓ Reference feed snapshot saved to: {:?}", path);
        Ok(())
    }

    /// Returns the snapshot at `path` if it was taken from `source` less than
    /// `max_age_days` ago.
    pub fn load_snapshot(path: &Path, source: &str, max_age_days: u64) -> Option<Self> {
        if !path.exists() {
            info!("ℹ️  No reference feed snapshot found, will load fresh data");
            return None;
        }

        let feed = match fs::read(path).map_err(FeedError::from).and_then(|raw| {
            serde_json::from_slice::<GtfsFeed>(&raw).map_err(FeedError::from)
        }) {
            Ok(feed) => feed,
            Err(e) => {
                warn!("⚠️  Failed to read reference feed snapshot ({}), will refresh", e);
                return None;
            }
        };

        if feed.source != source {
            info!("ℹ️  Reference feed snapshot is for {}, will refresh", feed.source);
            return None;
        }

        if feed.is_expired(max_age_days) {
            warn!("⚠️  Reference feed snapshot expired (>{} days old), refreshing...", max_age_days);
            return None;
        }

        info!(
            "✓ Reference feed snapshot loaded: {} routes, {} stops, {} trips, {} shapes",
            feed.routes.len(),
            feed.stops.len(),
            feed.trips.len(),
            feed.shapes.len()
        );
        Some(feed)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Loads the reference feed configured for this process: a local archive
/// wins over a URL, and a URL is served from the snapshot while it is fresh.
/// With neither configured the feed is empty.
pub fn load_reference_feed(
    path: Option<&Path>,
    url: Option<&str>,
    snapshot_max_age_days: u64,
) -> Result<GtfsFeed> {
    if let Some(path) = path {
        return GtfsFeed::from_path(path);
    }

    let Some(url) = url else {
        warn!("⚠️  No GTFS_PATH or GTFS_URL configured, reference endpoints will be empty");
        return Ok(GtfsFeed::default());
    };

    let snapshot = GtfsFeed::snapshot_path();
    if let Some(feed) = GtfsFeed::load_snapshot(&snapshot, url, snapshot_max_age_days) {
        return Ok(feed);
    }

    let feed = GtfsFeed::download(url)?;
    if let Err(e) = feed.save_snapshot(&snapshot) {
        warn!("⚠️  Could not save reference feed snapshot: {}", e);
    }
    Ok(feed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn sample_zip(include_shapes: bool) -> Bytes {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options = FileOptions::default();

            let mut files = vec![
                (
                    "routes.txt",
                    "route_id,agency_id,route_short_name,route_long_name,route_type\n\
                     R1,A,1A,City Hall - Glengormley,3\n\
                     R2,A,910,Airport Express,3\n",
                ),
                (
                    "stops.txt",
                    "stop_id,stop_code,stop_name,stop_lat,stop_lon,location_type\n\
                     100,10045,Donegall Square North,54.5975,-5.9301,0\n\
                     STN,,Central Station,54.5960,-5.9170,1\n\
                     101,,City Hall,54.5966,-5.9300,\n\
                     102,10047,Nowhere,0,0,0\n",
                ),
                (
                    "trips.txt",
                    "route_id,service_id,trip_id,trip_headsign,shape_id\n\
                     R1,WK,5001,Glengormley,S1\n\
                     R2,WK,5002,,\n",
                ),
                (
                    "stop_times.txt",
                    "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                     5001,08:05:00,08:05:00,101,2\n\
                     5001,08:00:00,08:00:00,100,1\n\
                     5001,bad,row,100,notanumber\n\
                     9999,08:00:00,08:00:00,100,1\n",
                ),
            ];
            if include_shapes {
                files.push((
                    "shapes.txt",
                    "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
                     S1,54.60,-5.93,2\n\
                     S1,54.59,-5.92,1\n",
                ));
            }

            for (name, contents) in files {
                zip.start_file(name, options).unwrap();
                zip.write_all(contents.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        Bytes::from(buffer.into_inner())
    }

    #[test]
    fn parses_tables_into_reference_entities() {
        let feed = GtfsFeed::from_zip_bytes(sample_zip(true), "test").unwrap();

        assert_eq!(feed.routes.len(), 2);
        assert_eq!(feed.routes[1].short_name, "910");

        let stop_ids: Vec<_> = feed.stops.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(stop_ids, vec!["100", "101"], "stations and null-island stops are dropped");
        assert_eq!(feed.stops[1].number, "101", "missing stop_code falls back to stop_id");

        let trip = &feed.trips["5001"];
        let order: Vec<_> = trip.stops.iter().map(|v| v.stop_id.as_str()).collect();
        assert_eq!(order, vec!["100", "101"]);
        assert_eq!(trip.shape_id.as_deref(), Some("S1"));
        assert_eq!(feed.trips["5002"].headsign, None);

        let shape = &feed.shapes["S1"];
        assert_eq!(shape.points[0].sequence, 1);
        assert_eq!(shape.points[1].latitude, 54.60);
    }

    #[test]
    fn shapes_table_is_optional() {
        let feed = GtfsFeed::from_zip_bytes(sample_zip(false), "test").unwrap();
        assert!(feed.shapes.is_empty());
        assert_eq!(feed.trips.len(), 2);
    }

    #[test]
    fn snapshot_round_trip_respects_source_and_age() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots").join("feed.json");
        let feed = GtfsFeed::from_zip_bytes(sample_zip(true), "https://feeds.example/gtfs.zip").unwrap();
        feed.save_snapshot(&path).unwrap();

        let loaded = GtfsFeed::load_snapshot(&path, "https://feeds.example/gtfs.zip", 7).unwrap();
        assert_eq!(loaded.stops, feed.stops);
        assert!(GtfsFeed::load_snapshot(&path, "https://other.example/gtfs.zip", 7).is_none());
        assert!(GtfsFeed::load_snapshot(&path, "https://feeds.example/gtfs.zip", 0).is_none());
    }

    #[test]
    fn no_configured_source_gives_empty_feed() {
        let feed = load_reference_feed(None, None, 7).unwrap();
        assert!(feed.routes.is_empty());
        assert!(feed.stops.is_empty());
    }
}
