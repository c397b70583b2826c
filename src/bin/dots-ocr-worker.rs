//! CLI binary for dots-ocr-worker.
//!
//! A thin shim over the library crate: `serve` runs the queue worker,
//! `run` handles a single job payload and prints its envelope.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dots_ocr_worker::{
    ConfigDefaults, HttpFetcher, ImageFetcher, JobAdapter, PythonParserFactory, Worker,
    WorkerSettings,
};
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Local payload file picked up by `run` when no input is given.
const DEFAULT_TEST_INPUT: &str = "test_input.json";

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve jobs from the queue (endpoints usually injected by the platform)
  dots-ocr-worker serve

  # Run one job from an inline payload
  dots-ocr-worker run --input '{"input": {"image": "https://example.com/page.jpg"}}'

  # Grounding OCR on a region of a local image
  dots-ocr-worker run --input '{"input": {"image": "page.jpg",
      "prompt_mode": "prompt_grounding_ocr", "bbox": [100, 200, 600, 400]}}'

  # Run the payload in ./test_input.json
  dots-ocr-worker run

JOB INPUT FIELDS:
  image        data:image/...;base64,<data> | http(s) URL | local path (required)
  prompt_mode  prompt_layout_all_en (default), prompt_layout_only_en,
               prompt_ocr, prompt_grounding_ocr
  bbox         [x1, y1, x2, y2], required for prompt_grounding_ocr
  temperature, max_tokens, top_p, num_threads, dpi, use_hf,
  min_pixels, max_pixels

ENVIRONMENT VARIABLES (job-level defaults, read once at startup):
  PROMPT_MODE  TEMPERATURE  MAX_TOKENS  TOP_P  NUM_THREADS
  DPI  USE_HF  MIN_PIXELS  MAX_PIXELS

  RUST_LOG                    Override log filter (e.g. dots_ocr_worker=debug)
"#;

/// Serverless worker that runs dots.ocr document parsing jobs.
#[derive(Parser, Debug)]
#[command(
    name = "dots-ocr-worker",
    version,
    about = "Serverless worker that runs dots.ocr document parsing jobs",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Python interpreter with the `dots_ocr` package installed.
    #[arg(long, env = "DOTS_OCR_PYTHON", default_value = "python3", global = true)]
    python: PathBuf,

    /// Directory for temporary image files (default: system temp dir).
    #[arg(long, env = "DOTS_OCR_TMPDIR", global = true)]
    temp_dir: Option<PathBuf>,

    /// Timeout in seconds for image downloads (default: none).
    #[arg(long, env = "DOTS_OCR_DOWNLOAD_TIMEOUT", global = true)]
    download_timeout: Option<u64>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOTS_OCR_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, env = "DOTS_OCR_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the job queue and process jobs until interrupted.
    Serve {
        /// Job polling URL; `$ID` is replaced with the worker id.
        #[arg(long, env = "RUNPOD_WEBHOOK_GET_JOB")]
        job_url: String,

        /// Result URL; `$ID` is replaced with the job id.
        #[arg(long, env = "RUNPOD_WEBHOOK_POST_OUTPUT")]
        result_url: String,

        /// API key sent in the Authorization header.
        #[arg(long, env = "RUNPOD_AI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Identifier of this worker.
        #[arg(long, env = "RUNPOD_POD_ID", default_value = "local")]
        worker_id: String,

        /// Delay between polls when the queue is empty, in milliseconds.
        #[arg(long, env = "DOTS_OCR_POLL_INTERVAL_MS", default_value_t = 1000)]
        poll_interval_ms: u64,
    },

    /// Handle one job payload and print the response envelope.
    Run {
        /// Job payload as JSON: `{"input": {...}}`.
        #[arg(long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Read the job payload from a file.
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Print compact JSON instead of pretty-printed.
        #[arg(long)]
        compact: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Logs go to stderr; stdout is reserved for the JSON envelope.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let adapter = build_adapter(&cli)?;
    debug!("Job defaults from environment: {:?}", adapter.defaults());

    match cli.command {
        Command::Serve {
            job_url,
            result_url,
            api_key,
            worker_id,
            poll_interval_ms,
        } => {
            let mut settings = WorkerSettings::new(job_url, result_url)
                .worker_id(worker_id)
                .idle_backoff(Duration::from_millis(poll_interval_ms.max(1)));
            if let Some(key) = api_key {
                settings = settings.api_key(key);
            }

            let worker = Worker::new(adapter, settings).context("Failed to start worker")?;
            worker
                .run(async {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Interrupt received; finishing up");
                    }
                })
                .await
                .context("Worker loop failed")?;
        }
        Command::Run {
            input,
            input_file,
            compact,
        } => {
            let payload = load_payload(input, input_file).await?;
            let envelope = adapter.handle_payload(payload).await;

            let rendered = if compact {
                serde_json::to_string(&envelope)
            } else {
                serde_json::to_string_pretty(&envelope)
            }
            .context("Failed to serialise envelope")?;
            println!("{rendered}");

            if !envelope.is_success() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Wire the adapter from CLI flags and the process environment.
fn build_adapter(cli: &Cli) -> Result<JobAdapter> {
    let fetcher: Arc<dyn ImageFetcher> = match cli.download_timeout {
        Some(secs) => Arc::new(HttpFetcher::with_timeout(secs)?),
        None => Arc::new(HttpFetcher::new()?),
    };

    let mut adapter = JobAdapter::new(
        ConfigDefaults::from_env(),
        Arc::new(PythonParserFactory::new(&cli.python)),
        fetcher,
    );
    if let Some(ref dir) = cli.temp_dir {
        adapter = adapter.with_temp_dir(dir);
    }
    Ok(adapter)
}

/// Read the job payload from `--input`, `--input-file`, or `test_input.json`.
async fn load_payload(input: Option<String>, input_file: Option<PathBuf>) -> Result<Value> {
    let raw = match (input, input_file) {
        (Some(json), _) => json,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read job payload from {:?}", path))?,
        (None, None) => {
            let path = PathBuf::from(DEFAULT_TEST_INPUT);
            if !path.exists() {
                bail!("No job payload: pass --input, --input-file, or create {DEFAULT_TEST_INPUT}");
            }
            info!("Using job payload from {}", DEFAULT_TEST_INPUT);
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read job payload from {:?}", path))?
        }
    };

    serde_json::from_str(&raw).context("Job payload is not valid JSON")
}
