use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use uuid::Uuid;

use tally::config::Config;
use tally::hierarchy::ContentArena;
use tally::index::{SqliteUsageIndex, UsageIndex};
use tally::metrics::{MetricUpdatePipeline, SnapshotStore, SqliteSnapshotStore};
use tally::scope::ScopeResolver;

#[derive(Parser)]
#[command(name = "tally-admin")]
#[command(about = "Tally usage-statistics admin CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one metric update pipeline pass over the whole hierarchy
    UpdateMetrics,
    /// Show the snapshot history for one subject
    ShowMetrics {
        /// Subject UUID
        subject_id: Uuid,
        /// Metric type (defaults to both "view" and "download")
        metric_type: Option<String>,
    },
    /// Resolve the facet configuration a scope node inherits
    ResolveScope {
        /// Scope node UUID
        node_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await?,
    );
    let index: Arc<dyn UsageIndex> = Arc::new(SqliteUsageIndex::with_pool(Arc::clone(&pool)));
    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::with_pool(Arc::clone(&pool)));
    index.init().await?;
    store.init().await?;

    let arena = match config.site_structure.as_deref() {
        Some(path) => ContentArena::from_json_file(path)
            .with_context(|| format!("failed to load site structure from {path}"))?,
        None => ContentArena::new(),
    };
    let arena = Arc::new(arena);

    match cli.command {
        Commands::UpdateMetrics => {
            let pipeline = MetricUpdatePipeline::new(index, store, Arc::clone(&arena));
            let summary = pipeline.run(chrono::Utc::now().timestamp()).await;
            println!(
                "✓ Metric update finished: {} recorded, {} unchanged, {} skipped, {} failed",
                summary.recorded, summary.unchanged, summary.skipped, summary.failed
            );
        }
        Commands::ShowMetrics {
            subject_id,
            metric_type,
        } => {
            let metric_types = match metric_type {
                Some(m) => vec![m],
                None => vec!["view".to_string(), "download".to_string()],
            };
            for metric in &metric_types {
                let history = store.history(subject_id, metric).await?;
                if history.is_empty() {
                    println!("No '{metric}' snapshots for {subject_id}");
                    continue;
                }
                println!("'{metric}' snapshots for {subject_id}:");
                println!(
                    "{:<12} {:<10} {:<6} {:<10} {:<10} {}",
                    "Date", "Count", "Last", "Δ week", "Δ month", "Remark"
                );
                println!("{}", "-".repeat(64));
                for s in history {
                    let date = chrono::DateTime::from_timestamp(s.acquisition_date, 0)
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| s.acquisition_date.to_string());
                    println!(
                        "{:<12} {:<10} {:<6} {:<10} {:<10} {}",
                        date,
                        s.count,
                        if s.is_last { "yes" } else { "no" },
                        s.delta_period1.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
                        s.delta_period2.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
                        s.remark.unwrap_or_default()
                    );
                }
            }
        }
        Commands::ResolveScope { node_id } => {
            let resolver = ScopeResolver::new(arena, &config.default_facet_set);
            let scope = resolver.resolve(node_id)?;
            match scope.source_node {
                Some(source) => println!(
                    "✓ Node {node_id} inherits facet set '{}' from {source}",
                    scope.facet_set
                ),
                None => println!(
                    "✓ Node {node_id} uses the site default facet set '{}'",
                    scope.facet_set
                ),
            }
        }
    }

    Ok(())
}
