use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub ingest: IngestConfig,

    /// Facet set used when no scope node configures one
    pub default_facet_set: String,

    /// Path to a JSON site-structure file describing the content hierarchy
    pub site_structure: Option<String>,

    /// Interval for the scheduled metric update pipeline; None disables it
    pub metrics_update_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Capacity of the hot-path event channel
    pub buffer_size: usize,

    /// Actor fast-flush interval (Layer 1 → Layer 2)
    pub fast_flush_interval_ms: u64,

    /// Interval of the index flush task (Layer 2 → usage index)
    pub flush_interval_secs: u64,

    /// Path to a MaxMind City .mmdb file; None records events without geo
    pub geoip_city_db_path: Option<String>,

    /// Truncate stored client IPs to /24 (v4) / /48 (v6)
    pub ip_anonymization: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./tally.db".to_string());
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u32>()?;

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let buffer_size = std::env::var("INGEST_BUFFER_SIZE")
            .unwrap_or_else(|_| "100000".to_string())
            .parse::<usize>()?;
        let fast_flush_interval_ms = std::env::var("INGEST_FAST_FLUSH_MS")
            .unwrap_or_else(|_| "100".to_string())
            .parse::<u64>()?;
        let flush_interval_secs = std::env::var("INGEST_FLUSH_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()?;

        let geoip_city_db_path = std::env::var("GEOIP_CITY_DB").ok();

        let ip_anonymization = std::env::var("IP_ANONYMIZATION")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let default_facet_set = std::env::var("DEFAULT_FACET_SET")
            .unwrap_or_else(|_| "defaultConfiguration".to_string());

        let site_structure = std::env::var("SITE_STRUCTURE").ok();

        let metrics_update_interval_secs = match std::env::var("METRICS_UPDATE_INTERVAL_SECS") {
            Ok(v) => match v.parse::<u64>() {
                Ok(secs) => Some(secs),
                Err(_) => {
                    tracing::warn!(
                        "Invalid METRICS_UPDATE_INTERVAL_SECS '{v}', disabling scheduled updates"
                    );
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            ingest: IngestConfig {
                buffer_size,
                fast_flush_interval_ms,
                flush_interval_secs,
                geoip_city_db_path,
                ip_anonymization,
            },
            default_facet_set,
            site_structure,
            metrics_update_interval_secs,
        })
    }
}
