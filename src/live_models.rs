// Live records scraped from the operator's real-time pages.

use serde::{Deserialize, Serialize};

/// One row of a stop's real-time timetable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopArrival {
    pub live_status: bool,
    pub bus_number: String,
    pub time_until_arrival: String,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
    pub fleet_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripStopStatus {
    Departed,
    Predicted,
    Unknown,
}

impl TripStopStatus {
    /// Classifies the status label shown next to a stop on a fleet-trip page.
    /// Only the leading word counts, so "Departed 10:31" is a departure but
    /// "Not departed" is not.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        let word = label
            .split(|c: char| !c.is_alphanumeric())
            .next()
            .unwrap_or_default();

        match word {
            "departed" | "depart" => TripStopStatus::Departed,
            "predicted" | "predict" | "expected" | "due" => TripStopStatus::Predicted,
            _ => TripStopStatus::Unknown,
        }
    }
}

/// One stop along a vehicle's current trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTripStop {
    pub stop_name: String,
    pub stop_number: String,
    pub time: String,
    pub status: TripStopStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTrip {
    pub route_number: String,
    pub associated_fleet_number: String,
    pub service_alert: Option<String>,
    pub stops: Vec<LiveTripStop>,
}
