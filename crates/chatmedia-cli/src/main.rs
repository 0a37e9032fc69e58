//! chatmedia - download chat attachments into a local media root

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chatmedia_core::defaults;
use chatmedia_fetch::{AuthConfig, AuthContext, FetchConfig, HttpFetcher};
use chatmedia_jobs::{BatchOrchestrator, OrchestratorConfig, RunSummary};
use chatmedia_store::{JsonDirectoryStore, MediaDirectory};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "chatmedia")]
#[command(author, version, about = "Resolve and download chat message attachments")]
struct Cli {
    /// Directory downloaded media is written to [env: CHATMEDIA_MEDIA_ROOT]
    #[arg(short, long)]
    media_root: Option<PathBuf>,

    /// Directory of owning-record JSON files [env: CHATMEDIA_RECORDS_DIR]
    #[arg(short, long)]
    records_dir: Option<PathBuf>,

    /// Reprocess attachments that already completed
    #[arg(short, long)]
    force: bool,

    /// Per-host delay between network operations, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Owning records processed concurrently
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Shell command that prints a bearer token
    #[arg(long)]
    token_command: Option<String>,

    /// Never fall back to thumbnail sources
    #[arg(long)]
    no_thumbnails: bool,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

/// Everything a run needs, after merging env defaults with flags.
#[derive(Debug)]
struct Settings {
    media_root: PathBuf,
    records_dir: PathBuf,
    fetch: FetchConfig,
    auth: AuthConfig,
    orchestrator: OrchestratorConfig,
}

impl Settings {
    fn resolve(cli: &Cli) -> Self {
        let env_path = |name: &str, fallback: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(fallback))
        };

        let mut auth = AuthConfig::from_env();
        if let Some(command) = &cli.token_command {
            auth = auth.with_token_command(command.clone());
        }

        let mut orchestrator = OrchestratorConfig::from_env();
        if cli.force {
            orchestrator = orchestrator.with_force(true);
        }
        if let Some(ms) = cli.delay_ms {
            orchestrator = orchestrator.with_delay_ms(ms);
        }
        if let Some(n) = cli.concurrency {
            orchestrator = orchestrator.with_max_concurrent_records(n);
        }
        if cli.no_thumbnails {
            let chain = orchestrator.chain.clone().with_thumbnail_fallback(false);
            orchestrator = orchestrator.with_chain_config(chain);
        }

        Self {
            media_root: cli
                .media_root
                .clone()
                .unwrap_or_else(|| env_path(defaults::ENV_MEDIA_ROOT, defaults::MEDIA_ROOT)),
            records_dir: cli
                .records_dir
                .clone()
                .unwrap_or_else(|| env_path(defaults::ENV_RECORDS_DIR, defaults::RECORDS_DIR)),
            fetch: FetchConfig::from_env(),
            auth,
            orchestrator,
        }
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "chatmedia=info")
///
/// Logs go to stderr so a JSON summary on stdout stays parseable.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "chatmedia=info,chatmedia_core=info,chatmedia_fetch=info,chatmedia_store=info,chatmedia_jobs=info"
            .into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("chatmedia.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
        None
    } else {
        let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        if let Some(ansi) = log_ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).init();
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = init_tracing();
    let settings = Settings::resolve(&cli);

    info!(
        media_root = %settings.media_root.display(),
        records_dir = %settings.records_dir.display(),
        delay_ms = settings.orchestrator.delay_ms,
        max_concurrent_records = settings.orchestrator.max_concurrent_records,
        force = settings.orchestrator.force,
        authenticated = settings.auth.is_configured(),
        "Starting attachment run"
    );

    let media = MediaDirectory::new(&settings.media_root);
    if let Err(e) = media.validate().await {
        error!(media_root = %settings.media_root.display(), error = %e, "Media root is not writable");
        anyhow::bail!("media root {} is not usable: {}", settings.media_root.display(), e);
    }

    let fetcher = HttpFetcher::new(settings.fetch.clone()).context("failed to build HTTP client")?;
    let auth = AuthContext::from_config(&settings.auth);

    let orchestrator = BatchOrchestrator::new(
        Arc::new(JsonDirectoryStore::new(&settings.records_dir)),
        Arc::new(media),
        Arc::new(fetcher),
        Arc::new(auth),
        settings.orchestrator.clone(),
    );

    // Ctrl-C lets in-flight attachments finish and their records save
    let shutdown = orchestrator.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight attachments");
            shutdown.trigger();
        }
    });

    let summary = match orchestrator.run().await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Attachment run aborted");
            return Err(e).context("attachment run aborted");
        }
    };

    print_summary(&summary, cli.json)?;
    Ok(())
}
