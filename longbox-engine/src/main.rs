//! longbox-reconcile - one reconcile pass over a comic library folder
//!
//! Opens (or creates) the SQLite registry, registers the library root if it
//! is not known yet, runs scan → apply → resolve → link and prints a summary.
//! With `--match-series`, every series is then looked up in the configured
//! metadata sources and the sitemap index.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use longbox_common::config::TomlConfig;
use longbox_common::events::{EventBus, LongboxEvent};
use longbox_engine::config::MatchingServices;
use longbox_engine::models::{Library, MetadataSource, Series, SeriesProfile};
use longbox_engine::providers::JsonSeriesOverrideProvider;
use longbox_engine::services::SitemapQuery;
use longbox_engine::{EngineConfig, ReconcileControl, ReconcileOrchestrator, SqliteStore, Store};

#[derive(Debug, Parser)]
#[command(name = "longbox-reconcile", version, about = "Reconcile a comic library folder")]
struct Args {
    /// SQLite database file (defaults to the configured data folder)
    #[arg(long, env = "LONGBOX_DATABASE")]
    database: Option<PathBuf>,

    /// Library root folder to reconcile
    #[arg(long)]
    library_root: PathBuf,

    /// Config file (overrides LONGBOX_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Match every series against external metadata sources after the pass
    #[arg(long)]
    match_series: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let shared: TomlConfig = longbox_common::config::load_or_default(args.config.as_deref())?;
    longbox_common::logging::init_tracing(&shared.logging.level)?;
    let engine = EngineConfig::load(args.config.as_deref())?;

    info!(
        "Starting longbox-reconcile {} ({}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE")
    );

    let db_path = args.database.clone().unwrap_or_else(|| shared.database_path());
    info!("Database: {}", db_path.display());
    let store = Arc::new(SqliteStore::open(&db_path).await?);

    let root = args
        .library_root
        .canonicalize()
        .with_context(|| format!("Library root {} not accessible", args.library_root.display()))?;
    let root_str = root.to_string_lossy().to_string();

    let library = match store.find_library_by_root(&root_str).await? {
        Some(library) => library,
        None => {
            let name = root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| root_str.clone());
            let library = Library::new(name, root_str.clone());
            store.create_library(&library).await?;
            info!(library_id = %library.id, root = %root_str, "Registered library");
            library
        }
    };

    // Ctrl-C stops the pass at the next batch boundary
    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let event_bus = EventBus::new(100);
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let LongboxEvent::ReconcileProgress { phase, processed, total, .. } = event {
                info!(phase = phase.as_str(), processed, total, "Progress");
            }
        }
    });

    let orchestrator = ReconcileOrchestrator::from_config(
        store.clone(),
        Arc::new(JsonSeriesOverrideProvider::new()),
        &engine,
    )
    .with_events(event_bus);

    let summary = orchestrator
        .run(library.id, ReconcileControl::new().with_cancellation_token(token))
        .await?;

    println!("Library:         {} ({})", library.name, library.root_path);
    println!(
        "Scan:            {} new, {} moved, {} changed, {} restored, {} orphaned, {} unchanged",
        summary.scan.new_files,
        summary.scan.moved,
        summary.scan.changed,
        summary.scan.restored,
        summary.scan.orphaned,
        summary.scan.unchanged
    );
    println!(
        "Series:          {} created, {} existing",
        summary.series_created(),
        summary.resolve.existing
    );
    println!(
        "Files linked:    {} ({} unresolved)",
        summary.files_linked(),
        summary.link.unresolved
    );
    println!("Errors:          {}", summary.errors());
    println!("Duration:        {:.2}s", summary.duration.as_secs_f64());
    if summary.cancelled {
        println!("Cancelled before completion");
        return Ok(());
    }

    if args.match_series {
        let services = engine.build_matching().context("Failed to build HTTP client")?;
        match_series(&services, &store.list_series().await?).await;
    }

    Ok(())
}

fn profile(series: &Series) -> SeriesProfile {
    let mut profile = SeriesProfile::new(MetadataSource::Local, series.id.to_string(), series.name.clone());
    profile.publisher = series.publisher.clone();
    profile.start_year = series.start_year;
    profile.issue_count = series.issue_count;
    profile.aliases = series.aliases.clone();
    profile
}

async fn match_series(services: &MatchingServices, series: &[Series]) {
    println!();
    for s in series {
        let primary = profile(s);
        match services.matcher.find_matches(&primary).await {
            Ok(matches) => {
                for m in matches {
                    let auto = if m.is_auto_match_candidate { " (auto)" } else { "" };
                    println!("{:<30} {} {} {:.2}{}", s.name, m.source, m.source_id, m.confidence, auto);
                }
            }
            Err(e) => warn!(series = %s.name, error = %e, "Cross-source matching failed"),
        }

        let mut query = SitemapQuery::new(s.name.clone());
        if let Some(publisher) = &s.publisher {
            query = query.with_publisher(publisher.clone());
        }
        if let Some(hit) = services.sitemap.search(&query).await {
            println!(
                "{:<30} {} {} {:.2}",
                s.name,
                MetadataSource::ComicBookRoundup,
                hit.entry.source_id,
                hit.confidence
            );
        }
    }
}
