use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// One observed connection attempt against an emulated service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Instant the connection was accepted (UTC)
    pub timestamp: DateTime<Utc>,

    pub source_address: IpAddr,
    pub source_port: u16,

    /// Which emulated service port was hit
    pub destination_port: u16,

    /// Banner sent to the client, trimmed
    pub banner: String,

    /// Received payload, permissively decoded and truncated for storage
    pub payload: String,

    /// Raw received length before truncation
    pub byte_count: u64,

    /// Wall-clock seconds from accept to close
    #[serde(rename = "duration")]
    pub duration_secs: f64,

    /// Coarse geolocation: a place string, "Local", or "Unknown"
    #[serde(default)]
    pub location: Option<String>,
}

impl Event {
    /// True when the stored location is usable for reporting
    pub fn has_location(&self) -> bool {
        match self.location.as_deref() {
            Some("") | Some("Unknown") | None => false,
            Some(_) => true,
        }
    }
}

/// Optional constraints for store queries
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events from this source address
    pub source: Option<IpAddr>,

    /// Only events at or after this instant
    pub since: Option<DateTime<Utc>>,
}
