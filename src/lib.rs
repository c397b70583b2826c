//! # dots-ocr-worker
//!
//! Serverless job adapter for dots.ocr document parsing.
//!
//! A job names an image (inline `data:image/...;base64,` URI, `http(s)` URL,
//! or local path) plus optional parser settings. The adapter resolves the
//! settings, materialises the image as a local file, hands it to an external
//! parser and wraps whatever comes back in a uniform JSON envelope. Layout
//! detection and OCR are entirely the parser's business.
//!
//! ## Pipeline Overview
//!
//! ```text
//! job
//!  │
//!  ├─ 1. Validate  image present, settings coerced, bbox for grounding mode
//!  ├─ 2. Input     decode inline data / download URL / pass local path through
//!  ├─ 3. Parse     external parser (blocking, spawn_blocking)
//!  ├─ 4. Release   delete the temp file if the adapter created one
//!  └─ 5. Envelope  {"status": "success", ...} or an error envelope
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dots_ocr_worker::JobAdapter;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Defaults from PROMPT_MODE / TEMPERATURE / DPI / ..., parser via python3
//!     let adapter = JobAdapter::from_env("python3")?;
//!     let envelope = adapter
//!         .handle_payload(json!({"input": {"image": "page.jpg"}}))
//!         .await;
//!     println!("{}", serde_json::to_string_pretty(&envelope)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `dots-ocr-worker` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod handler;
pub mod job;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod worker;

#[cfg(test)]
mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConfigDefaults, PromptMode, ResolvedConfig};
pub use error::WorkerError;
pub use handler::{handle_payload_sync, JobAdapter, ParseTarget};
pub use job::{BoundingBox, ConfigValue, Job, JobRequest};
pub use output::{EnvelopeConfig, ResponseEnvelope, Status};
pub use parser::{DocumentParser, ParserFactory, ParserOptions, PythonParserFactory};
pub use pipeline::fetch::{HttpFetcher, ImageFetcher};
pub use pipeline::input::{ImageRef, ImageSource};
pub use worker::{Worker, WorkerSettings};
