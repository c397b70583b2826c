//! Error type for the dots-ocr-worker library.
//!
//! Every failure a job can hit is a [`WorkerError`] variant. The handler
//! never lets one escape: [`crate::handler::JobAdapter::handle`] turns each
//! into a [`crate::output::ResponseEnvelope`].
//!
//! Two variants are *pre-flight* rejections ([`WorkerError::MissingInput`]
//! and [`WorkerError::MissingBBox`]). They are reported with the bare
//! `{"error": ...}` shape; everything else is wrapped as
//! `{"status": "error", "error": "Processing failed: ..."}`.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced while handling a single job.
#[derive(Debug, Error)]
pub enum WorkerError {
    // ── Pre-flight validation ─────────────────────────────────────────────
    /// The job carried no `image` field, or it was empty.
    #[error("No image provided in input")]
    MissingInput,

    /// Grounding mode was requested without a usable `[x1, y1, x2, y2]` box.
    #[error("bbox required for grounding OCR mode. Format: [x1, y1, x2, y2]")]
    MissingBBox,

    // ── Payload shape ─────────────────────────────────────────────────────
    /// The job payload could not be read as `{ "input": { ... } }`.
    #[error("invalid job payload: {0}")]
    InvalidJob(String),

    // ── Configuration ─────────────────────────────────────────────────────
    /// A numeric or boolean setting could not be parsed from its source.
    #[error("invalid value for {field}: {value:?} is not a valid {expected}")]
    Coercion {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// `prompt_mode` named a mode the parser does not know.
    #[error("unknown prompt_mode '{0}' (expected one of: prompt_layout_all_en, prompt_layout_only_en, prompt_ocr, prompt_grounding_ocr)")]
    UnknownPromptMode(String),

    // ── Image source ──────────────────────────────────────────────────────
    /// Remote image download failed (transport error or non-2xx status).
    #[error("failed to download '{url}': {reason}")]
    Fetch { url: String, reason: String },

    /// Inline `data:image/...` payload was malformed.
    #[error("invalid inline image data: {0}")]
    Decode(String),

    /// Creating or writing the temporary image file failed.
    #[error("temporary image file: {0}")]
    TempFile(#[source] std::io::Error),

    /// Removing an owned temporary image file failed.
    #[error("failed to remove temporary image '{path}': {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Parser ────────────────────────────────────────────────────────────
    /// The external parser failed.
    #[error("{0}")]
    Parse(String),

    // ── Worker loop ───────────────────────────────────────────────────────
    /// Talking to the job queue failed (polling or posting a result).
    #[error("job queue: {0}")]
    Queue(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    /// `true` for the validation failures reported with the bare
    /// `{"error": ...}` envelope.
    pub fn is_preflight(&self) -> bool {
        matches!(self, WorkerError::MissingInput | WorkerError::MissingBBox)
    }
}
