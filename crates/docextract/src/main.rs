//! docextract: command-line front end for the extraction pipeline.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;

use docextract::config::{default_config_path, load_config, Config};
use docextract::db::job_repo::JobFilter;
use docextract::extractor::pdf_info;
use docextract::model::JobStatus;
use docextract::worker::AttemptReport;
use docextract::{DocExtractError, ExtractError, ExtractionService};

#[derive(Parser)]
#[command(name = "docextract")]
#[command(author, version, about = "Asynchronous document text extraction")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: ~/.docextract/config.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines (stderr)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a file as a document and queue it for extraction
    Register {
        path: PathBuf,

        /// Only register, do not submit
        #[arg(long)]
        no_submit: bool,
    },

    /// Queue one or more registered documents for extraction
    Submit {
        #[arg(required = true, num_args = 1..)]
        document_ids: Vec<String>,
    },

    /// Run the worker pool until Ctrl-C
    Run {
        /// Exit once the queue is empty
        #[arg(long)]
        drain: bool,

        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show the status of a submission handle or job id
    Status {
        id: String,

        /// List every attempt made under the handle
        #[arg(long)]
        history: bool,
    },

    /// Show extraction state of one or more documents
    Document {
        #[arg(required = true, num_args = 1..)]
        document_ids: Vec<String>,
    },

    /// Print the extracted text of a completed document
    Text { document_id: String },

    /// List jobs, newest first
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: u64,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        #[arg(long)]
        status: Option<JobStatus>,

        #[arg(long)]
        document: Option<String>,

        /// Only the newest attempt of each submission
        #[arg(long)]
        latest: bool,
    },

    /// Queue every pending or failed document
    ResubmitPending,

    /// Flag a document as used (or clear the flag)
    MarkUsed {
        document_id: String,

        #[arg(long)]
        clear: bool,
    },

    /// Show page count and encryption flag of a PDF file
    Info { path: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
    };
    if let Err(e) = installed {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }

    // Library code logs through the `log` facade.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records into tracing: {}", e);
    }
}

fn load(cli_config: Option<PathBuf>) -> Result<Config, DocExtractError> {
    match cli_config {
        Some(path) => Ok(load_config(path)?),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                log::debug!("Loading config from {}", path.display());
                Ok(load_config(path)?)
            }
            None => Ok(Config::default()),
        },
    }
}

fn run(cli: Cli) -> Result<(), DocExtractError> {
    let mut config = load(cli.config)?;

    if let Commands::Info { path } = &cli.command {
        let bytes = std::fs::read(path).map_err(|e| ExtractError::SourceUnreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        print_json(&pdf_info(&bytes)?);
        return Ok(());
    }

    if let Commands::Run {
        workers: Some(n), ..
    } = &cli.command
    {
        config.worker_count = *n;
        docextract::config::validate_config(&config)?;
    }

    let service = ExtractionService::open(config)?;

    match cli.command {
        Commands::Register { path, no_submit } => {
            let doc = service.register_document(&path)?;
            if no_submit {
                print_json(&doc);
            } else {
                let submission = service.submit(&doc.id)?;
                print_json(&serde_json::json!({
                    "document": doc,
                    "submission": submission,
                }));
            }
        }
        Commands::Submit { document_ids } => {
            if let [single] = document_ids.as_slice() {
                print_json(&service.submit(single)?);
            } else {
                print_json(&service.submit_batch(&document_ids)?);
            }
        }
        Commands::Run { drain, .. } => run_workers(&service, drain)?,
        Commands::Status { id, history } => {
            if history {
                print_json(&service.job_history(&id)?);
            } else {
                print_json(&service.job_status(&id)?);
            }
        }
        Commands::Document { document_ids } => {
            if let [single] = document_ids.as_slice() {
                print_json(&service.document_state(single)?);
            } else {
                print_json(&service.batch_status(&document_ids)?);
            }
        }
        Commands::Text { document_id } => {
            let extracted = service.read_text(&document_id)?;
            println!("{}", extracted.text);
        }
        Commands::Jobs {
            limit,
            offset,
            status,
            document,
            latest,
        } => {
            let filter = JobFilter {
                job_type: None,
                status,
                document_id: document,
                latest_only: latest,
                limit: Some(limit),
                offset: Some(offset),
            };
            let (jobs, total) = service.list_jobs(&filter)?;
            print_json(&serde_json::json!({
                "total": total,
                "jobs": jobs,
            }));
        }
        Commands::ResubmitPending => print_json(&service.resubmit_pending()?),
        Commands::MarkUsed { document_id, clear } => {
            service.set_used(&document_id, !clear)?;
            print_json(&service.document_state(&document_id)?);
        }
        Commands::Info { .. } => {}
    }

    Ok(())
}

fn run_workers(service: &ExtractionService, drain: bool) -> Result<(), DocExtractError> {
    let pool = service.start_workers(service.default_extractor())?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst)) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    log::info!(
        "{} deliveries ready to run",
        service.queue().ready(chrono::Utc::now())?
    );

    let poll_interval = service.config().poll_interval();
    while running.load(Ordering::SeqCst) {
        if let Some(report) = pool.recv_report_timeout(poll_interval) {
            log_report(&report);
        }
        if drain && service.queue().is_empty()? {
            log::info!("Queue drained");
            break;
        }
    }

    pool.shutdown();
    pool.wait();
    Ok(())
}

fn log_report(report: &AttemptReport) {
    match report {
        AttemptReport::Idle => {}
        AttemptReport::Completed {
            document_id,
            method,
            text_length,
            ..
        } => log::info!(
            "Document {} completed: {} chars via {}",
            document_id,
            text_length,
            method
        ),
        AttemptReport::Requeued {
            document_id,
            next_retry,
            delay,
            ..
        } => log::info!(
            "Document {} requeued for retry {} in {}s",
            document_id,
            next_retry,
            delay.as_secs()
        ),
        AttemptReport::Failed {
            document_id,
            message,
            ..
        } => log::warn!("Document {} failed: {}", document_id, message),
        AttemptReport::Superseded {
            document_id,
            delivery_id,
            ..
        } => log::warn!(
            "Document {} attempt lost its claim on delivery {}",
            document_id,
            delivery_id
        ),
        AttemptReport::Abandoned {
            document_id, error, ..
        } => log::error!("Document {} left for redelivery: {}", document_id, error),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}
