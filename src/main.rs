use anyhow::{bail, Context, Result};
use catalog_pipeline::backoff::{BackoffLedger, SystemClock};
use catalog_pipeline::config::{AppConfig, CliConfig, FileConfig};
use catalog_pipeline::console::{kill_backoff, run_console, Console};
use catalog_pipeline::fingerprint::FpcalcExtractor;
use catalog_pipeline::media::{FfprobeProber, HttpImageFetcher, MediaStore, YtDlpDownloader};
use catalog_pipeline::metrics;
use catalog_pipeline::pipeline::{
    create_pipeline, default_pipeline, Collaborators, RunOutcome, TaskContext,
};
use catalog_pipeline::runner::BarProgress;
use catalog_pipeline::sources::{HttpPageFetcher, WeakClassifier};
use catalog_pipeline::store::CatalogStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser, Debug)]
#[command(version = VERSION)]
struct CliArgs {
    /// Path to the SQLite catalog database file.
    #[clap(long, value_parser = parse_path)]
    pub db: Option<PathBuf>,

    /// Root of the content-addressed media store. Downloads and fingerprinting are
    /// disabled without it.
    #[clap(long, value_parser = parse_path)]
    pub media_dir: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// fpcalc binary.
    #[clap(long)]
    pub fpcalc: Option<PathBuf>,

    /// ffprobe binary.
    #[clap(long)]
    pub ffprobe: Option<PathBuf>,

    /// yt-dlp binary.
    #[clap(long)]
    pub yt_dlp: Option<PathBuf>,

    /// In-flight limit for fan-out inside a task.
    #[clap(long)]
    pub concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the pipeline until it converges, then exits.
    Run,

    /// Interactive console to drive the pipeline.
    Console,

    /// Clears backoff records of an ident.
    KillBackoff {
        ident: String,
        /// Only clear the record of this task.
        #[arg(long)]
        task: Option<String>,
    },
}

fn build_context(
    config: &AppConfig,
    store: &CatalogStore,
    ledger: &BackoffLedger,
    shutdown_token: &CancellationToken,
    interactive: bool,
) -> TaskContext {
    let ctx = TaskContext::new(store.clone(), ledger.clone())
        .with_concurrency(config.concurrency)
        .with_retry_base(config.retry_base)
        .with_cancellation_token(shutdown_token.clone());
    // bars would fight with the prompt
    if interactive {
        ctx
    } else {
        ctx.with_progress_sink(Arc::new(BarProgress::default()))
    }
}

async fn collaborators(config: &AppConfig) -> Result<Collaborators> {
    let mut collab = Collaborators {
        classifier: Some(Box::new(WeakClassifier)),
        pages: Some(Arc::new(HttpPageFetcher::new(config.http_timeout)?)),
        extract_concurrency: Some(config.extract_concurrency),
        ..Default::default()
    };

    let Some(media_dir) = &config.media_dir else {
        warn!("No media dir configured, downloads and fingerprinting are disabled");
        return Ok(collab);
    };
    let media = MediaStore::new(media_dir);
    media
        .init()
        .await
        .with_context(|| format!("Failed to create media dir {:?}", media_dir))?;
    info!("Media store at {:?}", media.root());

    collab.downloaders.push(Arc::new(YtDlpDownloader::new(&config.yt_dlp_path)));
    collab.prober = Some(Arc::new(FfprobeProber::new(&config.ffprobe_path)));
    collab.images = Some(Arc::new(HttpImageFetcher::new(config.http_timeout)?));
    collab.extractor = Some(Arc::new(FpcalcExtractor::new(
        &config.fpcalc_path,
        config.matcher.min_frames(),
    )));
    collab.media = Some(media);
    Ok(collab)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialise logging")?;
    info!("catalog-pipeline {}", VERSION);

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db.clone(),
        media_dir: cli_args.media_dir.clone(),
        fpcalc_path: cli_args.fpcalc.clone(),
        ffprobe_path: cli_args.ffprobe.clone(),
        yt_dlp_path: cli_args.yt_dlp.clone(),
        concurrency: cli_args.concurrency,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening SQLite catalog database at {:?}...", config.db_path);
    let store = CatalogStore::open(&config.db_path)?;
    let ledger = BackoffLedger::new(&store, Arc::new(SystemClock));

    let interactive = match &cli_args.command {
        Command::KillBackoff { ident, task } => {
            let removed = kill_backoff(&ledger, ident, task.as_deref())?;
            info!("Removed {} backoff records for {}", removed, ident);
            return Ok(());
        }
        Command::Console => true,
        Command::Run => false,
    };

    metrics::init_metrics();
    let shutdown_token = CancellationToken::new();
    let ctx = build_context(&config, &store, &ledger, &shutdown_token, interactive);
    let tasks = default_pipeline(collaborators(&config).await?, config.matcher);
    let (mut scheduler, handle) = create_pipeline(tasks, shutdown_token.clone(), ctx);
    info!("Pipeline has {} tasks", scheduler.task_count());

    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    if interactive {
        let console = Console {
            runtime: tokio::runtime::Handle::current(),
            pipeline: handle.clone(),
            store: store.clone(),
            ledger: ledger.clone(),
        };
        tokio::task::spawn_blocking(move || run_console(console)).await??;
        handle.stop().await;
    } else {
        let token = shutdown_token.clone();
        ctrlc::set_handler(move || {
            info!("Interrupted, stopping at the next task boundary...");
            token.cancel();
        })
        .context("Failed to install Ctrl-C handler")?;

        let outcome = handle.run().await?;
        info!("Pipeline run ended: {}", outcome);
        if let RunOutcome::TaskFailed { task, error, .. } = &outcome {
            error!("Task {} failed: {}", task, error);
            shutdown_token.cancel();
            let _ = scheduler_task.await;
            bail!("pipeline stopped on a failed task");
        }
    }

    shutdown_token.cancel();
    let _ = scheduler_task.await;
    Ok(())
}
