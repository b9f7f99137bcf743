// Outbound fetches against the transit operator's real-time pages.
//
// Stop timetable: {base}/RealTime/RealTimeStopResults.aspx?SN={stop}
// Fleet trip:     {base}/RealTime/RealTimeFleetTrip.aspx?fleet={fleet}

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::OriginError;

pub type Result<T> = std::result::Result<T, OriginError>;

/// Raw page source for live data. Implementations return the body of a
/// successful response untouched and never retry.
#[async_trait]
pub trait LiveOrigin: Send + Sync {
    async fn stop_results(&self, stop_number: &str) -> Result<String>;

    async fn fleet_trip(&self, fleet_number: &str) -> Result<String>;
}

pub struct HttpOrigin {
    client: Client,
    base_url: String,
}

impl HttpOrigin {
    const STOP_RESULTS_PATH: &'static str = "RealTime/RealTimeStopResults.aspx";
    const FLEET_TRIP_PATH: &'static str = "RealTime/RealTimeFleetTrip.aspx";
    const USER_AGENT: &'static str = concat!("transit-live/", env!("CARGO_PKG_VERSION"));

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(Self::USER_AGENT)
            .build()
            .map_err(|e| OriginError::Unreachable {
                url: base_url.to_string(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(HttpOrigin {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn stop_results_url(&self, stop_number: &str) -> String {
        format!("{}/{}?SN={}", self.base_url, Self::STOP_RESULTS_PATH, stop_number)
    }

    pub fn fleet_trip_url(&self, fleet_number: &str) -> String {
        format!("{}/{}?fleet={}", self.base_url, Self::FLEET_TRIP_PATH, fleet_number)
    }

    async fn fetch(&self, url: String) -> Result<String> {
        debug!("🌐 GET {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!("⚠️  Origin request failed for {}: {}", url, e);
            OriginError::Unreachable {
                url: url.clone(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("⚠️  Origin returned {} for {}", status, url);
            return Err(OriginError::Http {
                status: status.as_u16(),
                url,
            });
        }

        response.text().await.map_err(|e| OriginError::Unreachable {
            url,
            reason: format!("Failed to read response: {}", e),
        })
    }
}

#[async_trait]
impl LiveOrigin for HttpOrigin {
    async fn stop_results(&self, stop_number: &str) -> Result<String> {
        self.fetch(self.stop_results_url(stop_number)).await
    }

    async fn fleet_trip(&self, fleet_number: &str) -> Result<String> {
        self.fetch(self.fleet_trip_url(fleet_number)).await
    }
}
