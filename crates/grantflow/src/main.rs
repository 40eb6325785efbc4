use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};

use grantflow::config::{load_config, Config};
use grantflow::conversion::Converter;
use grantflow::db::{JobRepository, SqliteRepository};
use grantflow::error::{Result, WorkerError};
use grantflow::pipeline::{JobStateMachine, PipelineConfig};
use grantflow::processor::AttachmentTextExtractor;
use grantflow::sanitize::redact_url;
use grantflow::source::HttpSource;
use grantflow::worker::{Job, Poller, WorkerPool};
use grantflow::{logging, Classifier};

#[derive(Parser, Debug)]
#[command(name = "grantflow", version, about = "Funding announcement ingestion pipeline")]
struct Cli {
    /// Config file. Defaults to `<config dir>/grantflow/config.json`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Claim and process pending jobs until interrupted.
    Work {
        /// Only claim jobs carrying this batch tag.
        #[arg(long)]
        batch: Option<String>,

        /// Exit once no claimable job is left.
        #[arg(long)]
        once: bool,

        /// Number of worker threads.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Queue an announcement detail page.
    Enqueue {
        url: String,

        #[arg(long)]
        batch: Option<String>,
    },
    /// Put jobs back to PENDING with a fresh retry budget.
    Reset(ResetArgs),
    /// Print job counts per status.
    Status,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ResetArgs {
    /// Job ids to reset.
    ids: Vec<String>,

    /// Reset every job in this batch.
    #[arg(long)]
    batch: Option<String>,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("grantflow").join("config.json"))
}

/// An explicit `--config` must exist. The default location is optional and
/// falls back to built-in defaults.
fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Ok(load_config(path)?);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            Ok(load_config(&path)?)
        }
        _ => {
            info!("No configuration file found, using defaults");
            Ok(Config::default())
        }
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("grantflow-io")
        .build()
        .map_err(|e| WorkerError::Runtime(e.to_string()).into())
}

#[cfg(feature = "browser")]
fn build_converter(config: &Config) -> Result<Option<Arc<Converter>>> {
    use grantflow::conversion::{BrowserConversionService, BrowserSettings, ConversionSettings};

    if !config.conversion.enabled {
        return Ok(None);
    }

    let browser = BrowserSettings::from_config(&config.conversion)?;
    let service = Arc::new(BrowserConversionService::new(browser));
    let settings = ConversionSettings::from(&config.conversion);
    info!(
        "Conversion fallback enabled via {}",
        redact_url(&config.conversion.converter_url)
    );
    Ok(Some(Arc::new(Converter::new(service, settings))))
}

#[cfg(not(feature = "browser"))]
fn build_converter(config: &Config) -> Result<Option<Arc<Converter>>> {
    if config.conversion.enabled {
        warn!(
            "Conversion is enabled in the config but this build lacks the 'browser' feature; \
             only native parsers will be used"
        );
    }
    Ok(None)
}

fn worker_id(config: &Config) -> String {
    config
        .worker
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("worker-{}", std::process::id()))
}

fn build_machine(
    config: &Config,
    repo: Arc<dyn JobRepository>,
    converter: Option<Arc<Converter>>,
) -> Result<JobStateMachine> {
    let pipeline = PipelineConfig::from_config(config);
    let source = Arc::new(HttpSource::new(&config.source)?);
    let classifier = Classifier::from_config(&config.classification)?;
    let extractor = AttachmentTextExtractor::new(converter, pipeline.min_text_length);

    Ok(JobStateMachine::new(
        repo,
        source,
        extractor,
        classifier,
        pipeline,
        worker_id(config),
    ))
}

fn work(
    config: &Config,
    repo: Arc<dyn JobRepository>,
    batch: Option<String>,
    once: bool,
    workers: Option<usize>,
) -> Result<()> {
    let runtime = build_runtime()?;
    let converter = build_converter(config)?;
    let machine = Arc::new(build_machine(config, repo, converter.clone())?);

    let worker_count = workers.unwrap_or(config.worker.count);
    let pool = WorkerPool::new(Arc::clone(&machine), runtime.handle().clone(), worker_count)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, finishing running jobs");
        flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let poller = Poller::new(
        machine,
        pool,
        batch.or_else(|| config.worker.batch.clone()),
        config.worker.batch_size,
        Duration::from_secs(config.worker.poll_interval_secs),
        shutdown,
    );
    let summary = poller.run(once)?;

    if let Some(converter) = converter {
        runtime.block_on(converter.close());
    }

    println!(
        "completed={} skipped={} failed={} retried={} reclaimed={} errors={}",
        summary.completed,
        summary.skipped,
        summary.failed,
        summary.retried,
        summary.reclaimed,
        summary.errors + summary.ownership_lost
    );
    Ok(())
}

fn enqueue(repo: &dyn JobRepository, url: &str, batch: Option<String>) -> Result<()> {
    let job = match batch {
        Some(tag) => Job::new_in_batch(url, tag),
        None => Job::new(url),
    };
    repo.insert_job(&job)?;
    info!("Queued {} as {}", redact_url(url), job.id);
    println!("{}", job.id);
    Ok(())
}

fn reset(config: &Config, repo: Arc<dyn JobRepository>, args: ResetArgs) -> Result<()> {
    let machine = build_machine(config, repo, None)?;

    let jobs = match args.batch {
        Some(batch) => machine.reset_batch(&batch)?,
        None => args
            .ids
            .iter()
            .map(|id| machine.reset(id))
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    for job in &jobs {
        println!("{} {}", job.id, job.status);
    }
    info!("Reset {} jobs", jobs.len());
    Ok(())
}

fn status(repo: &dyn JobRepository) -> Result<()> {
    let counts = repo.count_by_status()?;
    let total: u64 = counts.iter().map(|(_, n)| n).sum();
    for (status, count) in counts {
        println!("{:<12}{:>8}", status.as_str(), count);
    }
    println!("{:<12}{:>8}", "total", total);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref())?;
    let repo: Arc<dyn JobRepository> =
        Arc::new(SqliteRepository::open(Path::new(&config.database.path))?);

    match cli.command {
        Command::Work {
            batch,
            once,
            workers,
        } => work(&config, repo, batch, once, workers),
        Command::Enqueue { url, batch } => enqueue(repo.as_ref(), &url, batch),
        Command::Reset(args) => reset(&config, repo, args),
        Command::Status => status(repo.as_ref()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    info!("Starting grantflow v{}", env!("CARGO_PKG_VERSION"));

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
