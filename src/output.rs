//! Job response envelopes.
//!
//! A job always produces exactly one JSON object, in one of three shapes:
//!
//! ```text
//! {"status": "success", "result": …, "prompt_mode": "…", "config": {…}}
//! {"status": "error",   "error": "Processing failed: …"}
//! {"error": "…"}                     // pre-flight validation
//! ```
//!
//! Consumers that only look for an `error` key handle both failure shapes.

use crate::config::{PromptMode, ResolvedConfig};
use crate::error::WorkerError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// The settings echoed back in a success envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeConfig {
    pub temperature: f64,
    pub max_tokens: u32,
    pub dpi: u32,
    pub use_hf: bool,
}

impl From<&ResolvedConfig> for EnvelopeConfig {
    fn from(cfg: &ResolvedConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            dpi: cfg.dpi,
            use_hf: cfg.use_hf,
        }
    }
}

/// The single response a job produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    Success {
        status: Status,
        result: Value,
        prompt_mode: PromptMode,
        config: EnvelopeConfig,
    },
    Failed {
        status: Status,
        error: String,
    },
    Rejected {
        error: String,
    },
}

impl ResponseEnvelope {
    pub fn success(result: Value, config: &ResolvedConfig) -> Self {
        ResponseEnvelope::Success {
            status: Status::Success,
            result,
            prompt_mode: config.prompt_mode,
            config: EnvelopeConfig::from(config),
        }
    }

    /// Envelope for a failed job: bare for pre-flight rejections, wrapped
    /// with `Processing failed:` for everything else.
    pub fn from_error(err: &WorkerError) -> Self {
        if err.is_preflight() {
            ResponseEnvelope::Rejected {
                error: err.to_string(),
            }
        } else {
            ResponseEnvelope::Failed {
                status: Status::Error,
                error: format!("Processing failed: {err}"),
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseEnvelope::Success { .. })
    }

    /// The error message, if this is a failure envelope.
    pub fn error(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Success { .. } => None,
            ResponseEnvelope::Failed { error, .. } | ResponseEnvelope::Rejected { error } => Some(error),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "status": "error", "error": format!("Processing failed: {e}") })
        })
    }
}
