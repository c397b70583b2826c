//! The external document parser, seen from the adapter.
//!
//! Layout detection and OCR happen elsewhere. The adapter only needs two
//! operations, general parsing and grounded parsing, behind the
//! [`DocumentParser`] trait, plus a [`ParserFactory`] that builds a parser
//! from one job's [`ParserOptions`].
//!
//! Parser calls are blocking. [`crate::handler`] runs them on
//! `tokio::task::spawn_blocking` so a slow inference never stalls the
//! runtime's worker threads.

pub mod python;

use crate::config::PromptMode;
use crate::error::WorkerError;
use crate::job::BoundingBox;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub use python::{PythonParser, PythonParserFactory};

/// Construction parameters forwarded to the parser.
///
/// Serialised with the parser's own keyword names so the bridge can pass the
/// object straight through as keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParserOptions {
    pub temperature: f64,
    pub top_p: f64,
    #[serde(rename = "max_completion_tokens")]
    pub max_tokens: u32,
    #[serde(rename = "num_thread")]
    pub num_threads: u32,
    pub dpi: u32,
    pub min_pixels: Option<u64>,
    pub max_pixels: Option<u64>,
    pub use_hf: bool,
}

/// A parser instance bound to one job's options.
pub trait DocumentParser: Send + Sync {
    /// Parse the whole image.
    fn parse(&self, image: &Path, prompt_mode: PromptMode) -> Result<Value, WorkerError>;

    /// Parse only the region inside `bbox`.
    fn parse_grounded(
        &self,
        image: &Path,
        bbox: BoundingBox,
        prompt_mode: PromptMode,
    ) -> Result<Value, WorkerError>;
}

/// Builds a [`DocumentParser`] per job.
pub trait ParserFactory: Send + Sync {
    fn create(&self, options: &ParserOptions) -> Result<Arc<dyn DocumentParser>, WorkerError>;
}
