use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use callcoach::cache::AnalysisCache;
use callcoach::config::Config;
use callcoach::db::{CacheBackend, Database, DatabaseBackend, LibSqlBackend};
use callcoach::llm::LlmProvider;
use callcoach::models::{
    AnalyzeOptions, Dimension, ImportCallRequest, PublishRubricRequest, RoleVariant, TimeWindow,
};
use callcoach::services::{CacheJanitor, CoachingService, ComparisonEngine};

#[derive(Parser)]
#[command(name = "callcoach")]
#[command(about = "Rubric-driven coaching analysis of sales call transcripts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a stored call and print the coaching evaluation as JSON
    Analyze {
        call_id: String,
        /// Ignore stored evaluations and cached chunk results
        #[arg(long)]
        force: bool,
        /// Evaluate as this role (ae, se, csm, support)
        #[arg(long)]
        role: Option<RoleVariant>,
        /// Restrict to these dimensions; repeatable
        #[arg(long = "dimension")]
        dimensions: Vec<String>,
    },
    /// Compare a rep against same-role peers
    Compare {
        rep_email: String,
        /// Compare one dimension instead of the overall score
        #[arg(long)]
        dimension: Option<Dimension>,
        /// Role to compare within; defaults to the rep's latest evaluated role
        #[arg(long)]
        role: Option<RoleVariant>,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Import a call transcript with participants from a JSON file
    ImportCall { file: PathBuf },
    /// Publish a rubric version from a JSON file and make it active
    PublishRubric { file: PathBuf },
    /// Delete expired analysis cache entries
    PurgeCache {
        /// Drop every cached entry, not just expired ones
        #[arg(long)]
        all: bool,
    },
    /// Purge expired cache entries periodically until interrupted
    Janitor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env();

    tracing::debug!("Initializing database...");
    let db = Arc::new(LibSqlBackend::new(Database::new(&config.database).await?));

    match cli.command {
        Command::Analyze {
            call_id,
            force,
            role,
            dimensions,
        } => {
            if let Some(llm_config) = &config.llm {
                tracing::info!("Initializing LLM provider: {}...", llm_config.model);
            }
            let llm = LlmProvider::new(config.llm.as_ref());
            if !llm.is_available() {
                tracing::warn!("LLM unavailable - only cached results can be used");
            }

            let service = CoachingService::new(db.clone(), Arc::new(llm), &config);
            let cancel_token = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel_token.clone()));

            let options = AnalyzeOptions {
                force_reanalysis: force,
                role_override: role,
                dimensions: (!dimensions.is_empty()).then_some(dimensions),
            };
            let evaluation = service
                .analyze_call_with_cancel(&call_id, options, &cancel_token)
                .await?;
            sync(db.as_ref()).await;
            print_json(&evaluation)?;
        }
        Command::Compare {
            rep_email,
            dimension,
            role,
            days,
        } => {
            let engine = ComparisonEngine::new(db.clone());
            let window = TimeWindow::last_days(days);
            let comparison = match role {
                Some(role) => engine.compare_peers(&rep_email, dimension, role, window).await?,
                None => {
                    engine
                        .compare_peers_for_rep(&rep_email, dimension, window)
                        .await?
                }
            };
            print_json(&comparison)?;
        }
        Command::ImportCall { file } => {
            let request: ImportCallRequest = read_json(&file)?;
            let service = CoachingService::new(
                db.clone(),
                Arc::new(LlmProvider::unavailable("not needed for import")),
                &config,
            );
            let metadata = service.import_call(request).await?;
            sync(db.as_ref()).await;
            print_json(&metadata)?;
        }
        Command::PublishRubric { file } => {
            let request: PublishRubricRequest = read_json(&file)?;
            let service = CoachingService::new(
                db.clone(),
                Arc::new(LlmProvider::unavailable("not needed for publishing")),
                &config,
            );
            let rubric = service.publish_rubric(request).await?;
            sync(db.as_ref()).await;
            print_json(&rubric)?;
        }
        Command::PurgeCache { all } => {
            let backend: Arc<dyn CacheBackend> = db.clone();
            let cache = AnalysisCache::new(backend, &config.cache);
            let removed = if all {
                cache.clear().await?
            } else {
                CacheJanitor::new(cache, config.cache.purge_interval_secs)
                    .run_once()
                    .await?
            };
            sync(db.as_ref()).await;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Command::Janitor => {
            let backend: Arc<dyn CacheBackend> = db.clone();
            let janitor = CacheJanitor::new(
                AnalysisCache::new(backend, &config.cache),
                config.cache.purge_interval_secs,
            );
            tracing::info!(
                "Starting cache janitor... (interval={}s)",
                janitor.interval_secs()
            );
            let cancel_token = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel_token.clone()));
            janitor.run(cancel_token).await;
        }
    }

    Ok(())
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "callcoach=info".into()))
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Remote replicas push local writes; local databases make this a no-op.
async fn sync(db: &dyn DatabaseBackend) {
    if let Err(e) = db.sync().await {
        tracing::warn!("Database sync failed: {}", e);
    }
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling...");
    cancel_token.cancel();
}
