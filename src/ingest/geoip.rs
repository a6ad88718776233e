//! GeoIP lookup service using MaxMind GeoLite2/GeoIP2 MMDB
//!
//! Thread-safe IP geolocation over a memory-mapped MaxMind City database.
//! Only the dimensions the reports group by (country, city) are extracted.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use crate::ingest::models::GeoLocation;

/// GeoIP lookup service backed by an optional City database
pub struct GeoIpService {
    city_reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    /// Create a new GeoIP service from an MMDB file path
    ///
    /// With no path configured, every lookup returns an unknown location;
    /// events are still recorded, just without geo dimensions.
    pub fn new(city_path: Option<&str>) -> Result<Self> {
        let city_reader = if let Some(path) = city_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self { city_reader })
    }

    /// Lookup geographic location for an IP address
    pub fn lookup(&self, ip: IpAddr) -> GeoLocation {
        let ip_version = match ip {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        };

        let mut geo = GeoLocation {
            ip_version,
            ..Default::default()
        };

        if let Some(ref reader) = self.city_reader {
            if let Ok(result) = reader.lookup(ip) {
                let mut extracted = false;

                if let Ok(Some(city)) = result.decode::<geoip2::City>() {
                    geo.country_code = city.country.iso_code.map(|s| s.to_string());
                    geo.country_name = city.country.names.english.map(|s| s.to_string());
                    geo.city = city.city.names.english.map(|s| s.to_string());
                    extracted = true;
                }

                // Country-only databases still answer the country fields.
                if !extracted {
                    if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
                        geo.country_code = country.country.iso_code.map(|s| s.to_string());
                        geo.country_name = country.country.names.english.map(|s| s.to_string());
                    }
                }
            }
        }

        geo
    }
}

impl Clone for GeoIpService {
    fn clone(&self) -> Self {
        Self {
            city_reader: self.city_reader.clone(),
        }
    }
}
