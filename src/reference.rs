// Reference data (routes, stops, trips, shapes) behind a read-only store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::StoreError;
use crate::gtfs_feed::GtfsFeed;

pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRow {
    pub id: String,
    pub name: String,
    pub number: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopVisit {
    pub stop_id: String,
    pub sequence: u32,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripDetail {
    pub id: String,
    pub route_id: String,
    pub headsign: Option<String>,
    pub shape_id: Option<String>,
    pub stops: Vec<StopVisit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapePoint {
    pub latitude: f64,
    pub longitude: f64,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub id: String,
    pub points: Vec<ShapePoint>,
}

/// A route as loaded from the feed, kept with both names for matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub id: String,
    pub short_name: String,
    pub long_name: String,
}

impl RouteRecord {
    pub fn display_name(&self) -> String {
        match (self.short_name.is_empty(), self.long_name.is_empty()) {
            (false, false) => format!("{} - {}", self.short_name, self.long_name),
            (false, true) => self.short_name.clone(),
            _ => self.long_name.clone(),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Read-only access to reference data. Lookups by id are exact; searches are
/// case-insensitive substring matches.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn search_routes(&self, query: &str, limit: usize) -> Result<Vec<RouteSummary>>;

    async fn search_stops(&self, query: &str, limit: usize) -> Result<Vec<StopRow>>;

    async fn stop(&self, id: &str) -> Result<Option<StopRow>>;

    async fn trip(&self, id: &str) -> Result<Option<TripDetail>>;

    async fn shape(&self, id: &str) -> Result<Option<Shape>>;
}

/// Orders `matches` so that prefix hits come first, keeping feed order
/// within each group, and caps the result at `limit`.
fn rank_prefix_first<T>(matches: Vec<(bool, T)>, limit: usize) -> Vec<T> {
    let (mut prefixed, rest): (Vec<_>, Vec<_>) = matches.into_iter().partition(|(p, _)| *p);
    prefixed.extend(rest);
    prefixed.into_iter().take(limit).map(|(_, item)| item).collect()
}

/// Reference store backed by a GTFS feed held in memory.
pub struct GtfsStore {
    feed: GtfsFeed,
    stop_index: HashMap<String, usize>,
}

impl GtfsStore {
    pub fn new(feed: GtfsFeed) -> Self {
        let stop_index = feed
            .stops
            .iter()
            .enumerate()
            .map(|(i, stop)| (stop.id.clone(), i))
            .collect();

        GtfsStore { feed, stop_index }
    }

    pub fn empty() -> Self {
        Self::new(GtfsFeed::default())
    }

    pub fn feed(&self) -> &GtfsFeed {
        &self.feed
    }
}

#[async_trait]
impl ReferenceStore for GtfsStore {
    async fn search_routes(&self, query: &str, limit: usize) -> Result<Vec<RouteSummary>> {
        let query = query.trim().to_lowercase();

        let matches = self
            .feed
            .routes
            .iter()
            .filter_map(|route| {
                let short = route.short_name.to_lowercase();
                let long = route.long_name.to_lowercase();
                if !short.contains(&query) && !long.contains(&query) {
                    return None;
                }
                let summary = RouteSummary {
                    id: route.id.clone(),
                    name: route.display_name(),
                };
                Some((short.starts_with(&query), summary))
            })
            .collect();

        Ok(rank_prefix_first(matches, limit))
    }

    async fn search_stops(&self, query: &str, limit: usize) -> Result<Vec<StopRow>> {
        let query = query.trim().to_lowercase();

        let matches = self
            .feed
            .stops
            .iter()
            .filter_map(|stop| {
                let number_hit = stop.number.to_lowercase().starts_with(&query);
                if !number_hit && !stop.name.to_lowercase().contains(&query) {
                    return None;
                }
                Some((number_hit, stop.clone()))
            })
            .collect();

        Ok(rank_prefix_first(matches, limit))
    }

    async fn stop(&self, id: &str) -> Result<Option<StopRow>> {
        Ok(self
            .stop_index
            .get(id)
            .and_then(|&i| self.feed.stops.get(i))
            .cloned())
    }

    async fn trip(&self, id: &str) -> Result<Option<TripDetail>> {
        Ok(self.feed.trips.get(id).cloned())
    }

    async fn shape(&self, id: &str) -> Result<Option<Shape>> {
        Ok(self.feed.shapes.get(id).cloned())
    }
}
