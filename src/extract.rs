// HTML extraction for the operator's real-time pages.
//
// The operator renders ASP.NET pages with no stable data attributes, so every
// field is read by position inside a known container. Each page type has one
// layout table; when the site's markup moves, only the layout changes.

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::ExtractError;
use crate::live_models::{LiveTrip, LiveTripStop, StopArrival, TripStopStatus};

pub type Result<T> = std::result::Result<T, ExtractError>;

// Relative links on the operator's pages are resolved against this base
// purely to read their query strings.
const LINK_BASE: &str = "http://origin.invalid/RealTime/";

// ============================================================================
// Row Extraction
// ============================================================================

/// Maps one repeated row element of a page onto a record.
pub trait RowExtractor {
    type Record;

    /// Selector of the panel that must exist on a well-formed page.
    fn container(&self) -> &Selector;

    /// Human-readable form of `container`, for errors.
    fn container_name(&self) -> &str;

    fn row(&self) -> &Selector;

    /// Rows such as header lines that carry no data are skipped.
    fn accepts(&self, _row: ElementRef<'_>) -> bool {
        true
    }

    fn extract_row(&self, row: ElementRef<'_>) -> Self::Record;
}

/// Extracts every accepted row inside the extractor's container, in document
/// order. A missing container is an error; a container without rows is not.
pub fn extract_rows<E: RowExtractor>(document: &Html, extractor: &E) -> Result<Vec<E::Record>> {
    let container = find_container(document, extractor)?;

    Ok(container
        .select(extractor.row())
        .filter(|row| extractor.accepts(*row))
        .map(|row| extractor.extract_row(row))
        .collect())
}

fn find_container<'a, E: RowExtractor>(document: &'a Html, extractor: &E) -> Result<ElementRef<'a>> {
    document
        .select(extractor.container())
        .next()
        .ok_or_else(|| ExtractError::StructureMissing(extractor.container_name().to_string()))
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Element children of `row` with the given tag name, in order.
fn cells<'a>(row: ElementRef<'a>, tag: &str) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == tag)
        .collect()
}

/// Visible text with runs of whitespace collapsed to single spaces.
fn clean_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cell_text(cells: &[ElementRef<'_>], index: usize, field: &str) -> String {
    match cells.get(index) {
        Some(cell) => clean_text(*cell),
        None => {
            debug!("Row has no cell {} for {}, leaving it empty", index, field);
            String::new()
        }
    }
}

fn query_param(href: &str, name: &str) -> Option<String> {
    let base = Url::parse(LINK_BASE).ok()?;
    let url = base.join(href).ok()?;
    url.query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// ============================================================================
// Stop Timetable
// ============================================================================

/// Where each field lives in a row of `RealTimeStopResults.aspx`.
#[derive(Debug, Clone)]
pub struct StopTimetableLayout {
    pub container: String,
    pub row: String,
    pub cell_tag: String,
    pub bus_cell: usize,
    pub destination_cell: usize,
    pub time_cell: usize,
    pub live_marker: String,
    pub trip_link: String,
    pub fleet_param: String,
    pub trip_param: String,
}

impl Default for StopTimetableLayout {
    fn default() -> Self {
        StopTimetableLayout {
            container: "#pnlStopTimetable".to_string(),
            row: "table tr".to_string(),
            cell_tag: "td".to_string(),
            bus_cell: 0,
            destination_cell: 1,
            time_cell: 2,
            live_marker: ".live".to_string(),
            trip_link: "a[href]".to_string(),
            fleet_param: "fleet".to_string(),
            trip_param: "trip".to_string(),
        }
    }
}

pub struct StopTimetableExtractor {
    layout: StopTimetableLayout,
    container: Selector,
    row: Selector,
    live_marker: Selector,
    trip_link: Selector,
}

impl StopTimetableExtractor {
    pub fn new(layout: StopTimetableLayout) -> Result<Self> {
        Ok(StopTimetableExtractor {
            container: parse_selector(&layout.container)?,
            row: parse_selector(&layout.row)?,
            live_marker: parse_selector(&layout.live_marker)?,
            trip_link: parse_selector(&layout.trip_link)?,
            layout,
        })
    }

    pub fn extract(&self, html: &str) -> Result<Vec<StopArrival>> {
        let document = Html::parse_document(html);
        extract_rows(&document, self)
    }

    /// Returns the live flag and the arrival estimate with the marker removed.
    fn read_time_cell(&self, cell: Option<&ElementRef<'_>>) -> (bool, String) {
        let Some(cell) = cell else {
            debug!("Timetable row has no time cell");
            return (false, String::new());
        };

        let mut text = clean_text(*cell);
        let mut live = false;

        for marker in cell.select(&self.live_marker) {
            live = true;
            let marker_text = clean_text(marker);
            if !marker_text.is_empty() {
                text = text.replacen(&marker_text, "", 1);
            }
        }

        // Some rows only carry the word itself, without the styled marker.
        let mut words: Vec<&str> = text.split_whitespace().collect();
        if words.first().is_some_and(|w| w.eq_ignore_ascii_case("live")) {
            live = true;
            words.remove(0);
        }

        (live, words.join(" "))
    }
}

impl RowExtractor for StopTimetableExtractor {
    type Record = StopArrival;

    fn container(&self) -> &Selector {
        &self.container
    }

    fn container_name(&self) -> &str {
        &self.layout.container
    }

    fn row(&self) -> &Selector {
        &self.row
    }

    fn accepts(&self, row: ElementRef<'_>) -> bool {
        !cells(row, &self.layout.cell_tag).is_empty()
    }

    fn extract_row(&self, row: ElementRef<'_>) -> StopArrival {
        let cells = cells(row, &self.layout.cell_tag);
        let (live_status, time_until_arrival) = self.read_time_cell(cells.get(self.layout.time_cell));

        let href = cells
            .get(self.layout.bus_cell)
            .and_then(|cell| cell.select(&self.trip_link).next())
            .and_then(|link| link.value().attr("href"));

        let (trip_id, fleet_id) = match href {
            Some(href) => (
                query_param(href, &self.layout.trip_param),
                query_param(href, &self.layout.fleet_param),
            ),
            None => (None, None),
        };

        StopArrival {
            live_status,
            bus_number: cell_text(&cells, self.layout.bus_cell, "bus number"),
            time_until_arrival,
            destination: cell_text(&cells, self.layout.destination_cell, "destination"),
            trip_id,
            fleet_id,
        }
    }
}

// ============================================================================
// Fleet Trip
// ============================================================================

/// Where each field lives on `RealTimeFleetTrip.aspx`.
#[derive(Debug, Clone)]
pub struct FleetTripLayout {
    pub container: String,
    pub route_number: String,
    pub fleet_number: String,
    pub service_alert: String,
    pub row: String,
    pub cell_tag: String,
    pub stop_name_cell: usize,
    pub stop_number_cell: usize,
    pub time_cell: usize,
    pub status_cell: usize,
}

impl Default for FleetTripLayout {
    fn default() -> Self {
        FleetTripLayout {
            container: "#serverSideRenderList".to_string(),
            route_number: ".tripHeader .routeNumber".to_string(),
            fleet_number: ".tripHeader .fleetNumber".to_string(),
            service_alert: ".serviceAlert".to_string(),
            row: "li.tripStop".to_string(),
            cell_tag: "span".to_string(),
            stop_name_cell: 0,
            stop_number_cell: 1,
            time_cell: 2,
            status_cell: 3,
        }
    }
}

pub struct FleetTripExtractor {
    layout: FleetTripLayout,
    container: Selector,
    route_number: Selector,
    fleet_number: Selector,
    service_alert: Selector,
    row: Selector,
}

impl FleetTripExtractor {
    pub fn new(layout: FleetTripLayout) -> Result<Self> {
        Ok(FleetTripExtractor {
            container: parse_selector(&layout.container)?,
            route_number: parse_selector(&layout.route_number)?,
            fleet_number: parse_selector(&layout.fleet_number)?,
            service_alert: parse_selector(&layout.service_alert)?,
            row: parse_selector(&layout.row)?,
            layout,
        })
    }

    pub fn extract(&self, html: &str) -> Result<LiveTrip> {
        let document = Html::parse_document(html);
        let container = find_container(&document, self)?;

        let first_text = |selector: &Selector| {
            container
                .select(selector)
                .next()
                .map(clean_text)
                .filter(|text| !text.is_empty())
        };

        Ok(LiveTrip {
            route_number: first_text(&self.route_number).unwrap_or_default(),
            associated_fleet_number: first_text(&self.fleet_number).unwrap_or_default(),
            service_alert: first_text(&self.service_alert),
            stops: extract_rows(&document, self)?,
        })
    }
}

impl RowExtractor for FleetTripExtractor {
    type Record = LiveTripStop;

    fn container(&self) -> &Selector {
        &self.container
    }

    fn container_name(&self) -> &str {
        &self.layout.container
    }

    fn row(&self) -> &Selector {
        &self.row
    }

    fn extract_row(&self, row: ElementRef<'_>) -> LiveTripStop {
        let cells = cells(row, &self.layout.cell_tag);

        let mut status = TripStopStatus::from_label(&cell_text(&cells, self.layout.status_cell, "status"));
        if status == TripStopStatus::Unknown {
            // Older renders put the status on the row's class instead.
            status = row
                .value()
                .classes()
                .map(TripStopStatus::from_label)
                .find(|s| *s != TripStopStatus::Unknown)
                .unwrap_or(TripStopStatus::Unknown);
        }

        LiveTripStop {
            stop_name: cell_text(&cells, self.layout.stop_name_cell, "stop name"),
            stop_number: cell_text(&cells, self.layout.stop_number_cell, "stop number"),
            time: cell_text(&cells, self.layout.time_cell, "time"),
            status,
        }
    }
}

/// Both page extractors, built once at startup.
pub struct Extractors {
    pub stop_timetable: StopTimetableExtractor,
    pub fleet_trip: FleetTripExtractor,
}

impl Extractors {
    pub fn new() -> Result<Self> {
        Ok(Extractors {
            stop_timetable: StopTimetableExtractor::new(StopTimetableLayout::default())?,
            fleet_trip: FleetTripExtractor::new(FleetTripLayout::default())?,
        })
    }
}
