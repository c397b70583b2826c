//! Stages that turn a job's `image` reference into a local file.
//!
//! ```text
//! image ──▶ classify ──▶ decode / fetch / pass-through ──▶ ImageSource
//!          (prefix)       (base64)  (HTTP)                  (path + ownership)
//! ```
//!
//! 1. [`input`]: classify the reference once and materialise it
//! 2. [`decode`]: inline `data:image/...;base64,` payloads
//! 3. [`fetch`]: remote downloads behind the [`fetch::ImageFetcher`] seam

pub mod decode;
pub mod fetch;
pub mod input;
