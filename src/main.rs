use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::{debug, info, warn};

use tally::api::{self, AppState};
use tally::auth::AllowAll;
use tally::config::Config;
use tally::hierarchy::ContentArena;
use tally::index::{SqliteUsageIndex, UsageIndex};
use tally::ingest::{EventRecorder, GeoIpService};
use tally::metrics::{MetricUpdatePipeline, SnapshotStore, SqliteSnapshotStore};
use tally::scope::ScopeResolver;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // One pool shared by the usage index and the snapshot store
    let pool = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await?,
    );
    let index: Arc<dyn UsageIndex> = Arc::new(SqliteUsageIndex::with_pool(Arc::clone(&pool)));
    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::with_pool(Arc::clone(&pool)));

    info!("Initializing database...");
    index.init().await?;
    store.init().await?;
    info!("Database initialized successfully");

    // Content hierarchy
    let arena = match config.site_structure.as_deref() {
        Some(path) => {
            let arena = ContentArena::from_json_file(path)?;
            info!("Loaded site structure from {path} ({} nodes)", arena.len());
            arena
        }
        None => {
            warn!("No SITE_STRUCTURE configured - starting with an empty hierarchy");
            ContentArena::new()
        }
    };
    let arena = Arc::new(arena);

    // GeoIP service for ingest-time geolocation
    let geoip = match config.ingest.geoip_city_db_path.as_deref() {
        Some(path) => {
            info!("🌍 GeoIP lookups enabled ({path})");
            Some(Arc::new(GeoIpService::new(Some(path))?))
        }
        None => {
            info!("GeoIP database not configured - events recorded without geo dimensions");
            None
        }
    };

    // Event recorder + background flush into the usage index
    let recorder = Arc::new(EventRecorder::new_with_config(
        config.ingest.buffer_size,
        config.ingest.fast_flush_interval_ms,
    ));
    let _flush_task = recorder.start_flush_task(
        config.ingest.flush_interval_secs,
        geoip,
        config.ingest.ip_anonymization,
        Arc::clone(&index),
    );

    let resolver = Arc::new(ScopeResolver::new(
        Arc::clone(&arena),
        &config.default_facet_set,
    ));

    let pipeline = Arc::new(MetricUpdatePipeline::new(
        Arc::clone(&index),
        Arc::clone(&store),
        Arc::clone(&arena),
    ));

    // Scheduled metric updates (the nightly batch, when configured)
    if let Some(secs) = config.metrics_update_interval_secs {
        info!("⏱ Scheduled metric updates every {secs}s");
        let scheduled = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(secs));
            interval.tick().await; // skip the immediate first tick
            loop {
                interval.tick().await;
                let summary = scheduled.run(chrono::Utc::now().timestamp()).await;
                debug!(?summary, "scheduled metric update finished");
            }
        });
    }

    let state = Arc::new(AppState {
        arena,
        index,
        store,
        recorder,
        resolver,
        policy: Arc::new(AllowAll),
        pipeline,
    });
    let app = api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Usage statistics server listening on http://{addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
