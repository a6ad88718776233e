//! Data models for usage-event ingest

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::hierarchy::SubjectType;

/// Geographic location information derived from the client IP address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO country code (e.g., "US", "GB")
    pub country_code: Option<String>,

    /// Country name
    pub country_name: Option<String>,

    /// City name
    pub city: Option<String>,

    /// IP version (4 or 6)
    pub ip_version: u8,
}

impl Default for GeoLocation {
    fn default() -> Self {
        Self {
            country_code: None,
            country_name: None,
            city: None,
            ip_version: 4,
        }
    }
}

/// A fully resolved view/download occurrence, as stored in the usage index.
/// Append-only; never mutated after ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewEvent {
    pub subject_type: SubjectType,
    pub subject_id: Uuid,

    /// Timestamp of the visit (Unix timestamp)
    pub timestamp: i64,

    pub geo: GeoLocation,

    /// Client IP (possibly anonymized, possibly omitted)
    pub client_ip: Option<IpAddr>,

    /// True for bitstream views that count as downloads
    pub is_download: bool,
}

/// Lightweight event for hot-path recording.
/// GeoIP lookup is deferred until flush time.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub subject_type: SubjectType,
    pub subject_id: Uuid,
    pub timestamp: i64,
    pub client_ip: Option<IpAddr>,
    pub is_download: bool,
}
