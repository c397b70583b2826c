//! The job adapter: one job in, one envelope out.
//!
//! ```text
//! validate image ─▶ resolve config ─▶ validate bbox ─▶ resolve image
//!        ─▶ create parser ─▶ parse (spawn_blocking) ─▶ release temp ─▶ envelope
//! ```
//!
//! The bounding box is checked before the image is resolved, so a grounding
//! job with a bad box is rejected without downloading or decoding anything.
//!
//! Failures never escape [`JobAdapter::handle`]; they become error envelopes.
//! A temp file the adapter created is removed on every exit path. If removal
//! fails after a successful parse the job is still reported as a success and
//! the leak is logged.

use crate::config::{ConfigDefaults, ResolvedConfig};
use crate::error::WorkerError;
use crate::job::{BoundingBox, Job, JobRequest};
use crate::output::ResponseEnvelope;
use crate::parser::{ParserFactory, PythonParserFactory};
use crate::pipeline::fetch::{HttpFetcher, ImageFetcher};
use crate::pipeline::input::resolve_image;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Which parser operation a job needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParseTarget {
    Whole,
    Grounded(BoundingBox),
}

/// Adapts serverless jobs onto a [`ParserFactory`].
#[derive(Clone)]
pub struct JobAdapter {
    defaults: ConfigDefaults,
    parsers: Arc<dyn ParserFactory>,
    fetcher: Arc<dyn ImageFetcher>,
    temp_dir: Option<PathBuf>,
}

impl std::fmt::Debug for JobAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobAdapter")
            .field("defaults", &self.defaults)
            .field("parsers", &"<dyn ParserFactory>")
            .field("fetcher", &"<dyn ImageFetcher>")
            .field("temp_dir", &self.temp_dir)
            .finish()
    }
}

impl JobAdapter {
    pub fn new(
        defaults: ConfigDefaults,
        parsers: Arc<dyn ParserFactory>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        Self {
            defaults,
            parsers,
            fetcher,
            temp_dir: None,
        }
    }

    /// Production wiring: environment defaults, the Python bridge and an
    /// HTTP fetcher.
    pub fn from_env(python_exe: impl Into<PathBuf>) -> Result<Self, WorkerError> {
        Ok(Self::new(
            ConfigDefaults::from_env(),
            Arc::new(PythonParserFactory::new(python_exe)),
            Arc::new(HttpFetcher::new()?),
        ))
    }

    /// Create temp images in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn defaults(&self) -> &ConfigDefaults {
        &self.defaults
    }

    /// Handle a raw `{ "input": { ... } }` payload.
    pub async fn handle_payload(&self, payload: Value) -> ResponseEnvelope {
        match Job::from_value(payload) {
            Ok(job) => self.handle(&job.input).await,
            Err(e) => {
                warn!("Rejected job payload: {}", e);
                ResponseEnvelope::from_error(&e)
            }
        }
    }

    /// Handle one job's `input` object.
    pub async fn handle(&self, request: &JobRequest) -> ResponseEnvelope {
        let start = Instant::now();
        match self.process(request).await {
            Ok((result, config)) => {
                info!(
                    "Job complete: mode={} in {}ms",
                    config.prompt_mode,
                    start.elapsed().as_millis()
                );
                ResponseEnvelope::success(result, &config)
            }
            Err(e) => {
                warn!("Job failed after {}ms: {}", start.elapsed().as_millis(), e);
                ResponseEnvelope::from_error(&e)
            }
        }
    }

    async fn process(&self, request: &JobRequest) -> Result<(Value, ResolvedConfig), WorkerError> {
        // ── Step 1: Validate and resolve settings ────────────────────────
        let image = request.image().ok_or(WorkerError::MissingInput)?;
        let config = ResolvedConfig::resolve(request, &self.defaults)?;
        let target = if config.prompt_mode.is_grounding() {
            ParseTarget::Grounded(BoundingBox::from_value(request.bbox.as_ref())?)
        } else {
            ParseTarget::Whole
        };
        debug!("Resolved config: {:?}", config);

        // ── Step 2: Resolve image ────────────────────────────────────────
        let source = resolve_image(image, self.fetcher.as_ref(), self.temp_dir.as_deref()).await?;
        if let Some(url) = source.url() {
            debug!("Fetched {} into {}", url, source.path().display());
        }
        info!(
            "Parsing {} image {} with {}",
            source.kind(),
            source.path().display(),
            config.prompt_mode
        );

        // ── Step 3: Parse, then release the temp file either way ─────────
        let outcome = self.run_parser(&config, target, source.path()).await;
        match outcome {
            Ok(result) => {
                if let Err(e) = source.release() {
                    warn!("{}; reporting success anyway", e);
                }
                Ok((result, config))
            }
            Err(e) => {
                if let Err(cleanup) = source.release() {
                    debug!("Ignoring cleanup failure after parse error: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    async fn run_parser(
        &self,
        config: &ResolvedConfig,
        target: ParseTarget,
        image: &Path,
    ) -> Result<Value, WorkerError> {
        let parser = self.parsers.create(&config.parser_options())?;
        let path = image.to_path_buf();
        let mode = config.prompt_mode;

        tokio::task::spawn_blocking(move || match target {
            ParseTarget::Whole => parser.parse(&path, mode),
            ParseTarget::Grounded(bbox) => parser.parse_grounded(&path, bbox, mode),
        })
        .await
        .map_err(|e| WorkerError::Internal(format!("Parser task panicked: {}", e)))?
    }
}

/// Synchronous wrapper around [`JobAdapter::handle_payload`].
///
/// Creates a temporary tokio runtime internally.
pub fn handle_payload_sync(adapter: &JobAdapter, payload: Value) -> ResponseEnvelope {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(adapter.handle_payload(payload)),
        Err(e) => ResponseEnvelope::from_error(&WorkerError::Internal(format!(
            "Failed to create tokio runtime: {}",
            e
        ))),
    }
}
