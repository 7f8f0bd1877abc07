use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stalewatch::config;
use stalewatch::notify::LogNotifier;
use stalewatch::provider;
use stalewatch::registry::{
    cache::VersionCache, go_proxy, maven, npm, GoProxyRegistry, MavenRegistry, NpmRegistry,
    RegistryRouter,
};
use stalewatch::scan::{ScanEngine, ScanScheduler};
use stalewatch::store::{
    DependencyStore, ProviderKind, RepoStore, ScanJobStore, ScanStatus, Source, SourceStore,
    SqliteStore,
};
use stalewatch::transport::HttpClient;

#[derive(Parser)]
#[command(name = "stalewatch", version, about = "Dependency staleness scanner")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run scheduled scans until interrupted
    Serve {
        /// Five-field cron expression for scheduled scans
        #[arg(long, default_value = config::DEFAULT_CRON)]
        cron: String,
    },
    /// Run one scan and exit
    Scan {
        /// Scan only this source id instead of all sources
        #[arg(long)]
        source: Option<i64>,
    },
    /// Register a provider account to scan
    AddSource {
        /// Provider kind: github or gitlab
        #[arg(long)]
        provider: String,
        /// Display name, unique per database
        #[arg(long)]
        name: String,
        /// API token
        #[arg(long)]
        token: String,
        /// Organization (GitHub) or group path (GitLab)
        #[arg(long)]
        org: Option<String>,
        /// Base URL for self-hosted instances
        #[arg(long)]
        base_url: Option<String>,
        /// Accept invalid TLS certificates
        #[arg(long)]
        insecure_tls: bool,
        /// Restrict listing to owned / member repositories
        #[arg(long)]
        owned_only: bool,
        /// Repository allow-list entries (repeatable); empty scans everything
        #[arg(long = "repo")]
        repos: Vec<String>,
    },
    /// Check that a source's token authenticates
    ValidateSource {
        /// Source id
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let store = open_store(cli.db)?;

    match cli.command {
        Command::Serve { cron } => serve(store, &cron).await,
        Command::Scan { source } => scan_once(store, source).await,
        Command::AddSource {
            provider,
            name,
            token,
            org,
            base_url,
            insecure_tls,
            owned_only,
            repos,
        } => {
            let provider = ProviderKind::from_str(&provider)
                .map_err(|_| anyhow::anyhow!("unknown provider {provider:?}, expected github or gitlab"))?;
            let id = store.add_source(&Source {
                id: 0,
                provider,
                name,
                token,
                organization: org,
                base_url,
                insecure_tls,
                owned_only,
                repositories: repos,
                last_scan: None,
            })?;
            println!("Added source {id}");
            Ok(())
        }
        Command::ValidateSource { id } => {
            let source = store
                .get_by_id(id)?
                .with_context(|| format!("no source with id {id}"))?;
            let provider = provider::for_source(&source)?;
            provider.validate_token().await?;
            println!("Source {} ({}) authenticated", source.name, id);
            Ok(())
        }
    }
}

fn open_store(db: Option<PathBuf>) -> anyhow::Result<Arc<SqliteStore>> {
    let path = match db {
        Some(path) => path,
        None => {
            let dir = config::data_dir();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create data directory {dir:?}"))?;
            config::db_path()
        }
    };
    Ok(Arc::new(SqliteStore::new(&path)?))
}

/// Wires the registry clients around one shared cache so the purge task can
/// be spawned against it.
fn build_router(cache: Arc<VersionCache>) -> RegistryRouter {
    let http = HttpClient::default();
    let ttl = config::VERSION_CACHE_TTL;
    RegistryRouter::new(
        NpmRegistry::new(npm::DEFAULT_BASE_URL, http.clone(), cache.clone(), ttl),
        MavenRegistry::new(maven::DEFAULT_BASE_URL, http.clone(), cache.clone(), ttl),
        GoProxyRegistry::new(go_proxy::DEFAULT_BASE_URL, http, cache, ttl),
    )
}

fn build_scheduler(store: &Arc<SqliteStore>, cache: Arc<VersionCache>) -> Arc<ScanScheduler> {
    let engine = ScanEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(build_router(cache)),
    );
    Arc::new(
        ScanScheduler::new(Arc::new(engine), store.clone(), store.clone())
            .with_notifier(Arc::new(LogNotifier)),
    )
}

async fn serve(store: Arc<SqliteStore>, cron: &str) -> anyhow::Result<()> {
    let cache = Arc::new(VersionCache::new());
    let scheduler = build_scheduler(&store, cache.clone());

    let swept = scheduler.recover()?;
    if swept > 0 {
        info!(swept, "recovered from interrupted scans");
    }

    scheduler.set_schedule(cron)?;
    let purge = cache.spawn_purge_task(config::CACHE_PURGE_INTERVAL);

    info!(cron, "serving");
    tokio::select! {
        _ = scheduler.clone().run_cron() => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    purge.abort();
    Ok(())
}

async fn scan_once(store: Arc<SqliteStore>, source: Option<i64>) -> anyhow::Result<()> {
    let cache = Arc::new(VersionCache::new());
    let scheduler = build_scheduler(&store, cache);
    scheduler.recover()?;

    let done = Arc::new(tokio::sync::Notify::new());
    let signal = done.clone();
    scheduler.on_scan_complete(Arc::new(move |_| signal.notify_one()));

    let job = scheduler.trigger_scan(source)?;
    done.notified().await;

    let finished = store
        .get(job.id)?
        .with_context(|| format!("scan job {} disappeared", job.id))?;
    match finished.status {
        ScanStatus::Completed => {
            println!(
                "Scan {} completed: {} repositories, {} dependencies ({} tracked in total, {} repositories known)",
                finished.id,
                finished.repos_scanned,
                finished.deps_scanned,
                DependencyStore::count(store.as_ref())?,
                RepoStore::count(store.as_ref())?,
            );
            Ok(())
        }
        status => {
            bail!(
                "scan {} ended as {}: {}",
                finished.id,
                status.as_str(),
                finished.error.unwrap_or_default()
            )
        }
    }
}
