//! Usage-event ingest
//!
//! Records raw view/download occurrences with client metadata. Recording is
//! fire-and-forget: handlers push a lightweight event onto a channel and a
//! background task resolves geolocation and writes batches to the usage
//! index.

pub mod geoip;
pub mod ip_extractor;
pub mod models;
pub mod recorder;

pub use geoip::GeoIpService;
pub use ip_extractor::{anonymize_ip, extract_client_ip};
pub use models::{GeoLocation, PendingEvent, ViewEvent};
pub use recorder::{resolve_event, EventRecorder};
