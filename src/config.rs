//! Configuration: environment defaults and per-job resolution.
//!
//! Settings come from three layers, most specific first:
//!
//! 1. the job's `input` object,
//! 2. process environment (`TEMPERATURE`, `DPI`, …),
//! 3. built-in defaults.
//!
//! The environment is read exactly once, into [`ConfigDefaults`], when the
//! process starts. The adapter holds that object and never touches
//! `std::env` while serving jobs, so tests can inject any environment they
//! like without mutating process state.
//!
//! Environment values are stored as raw strings and coerced per job. A
//! malformed `MAX_TOKENS=abc` therefore fails each job that relies on it with
//! a readable error instead of taking the whole worker down at boot.

use crate::error::WorkerError;
use crate::job::{ConfigValue, JobRequest};
use crate::parser::ParserOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TEMPERATURE: f64 = 0.1;
pub const DEFAULT_MAX_TOKENS: u32 = 16384;
pub const DEFAULT_TOP_P: f64 = 1.0;
pub const DEFAULT_NUM_THREADS: u32 = 64;
pub const DEFAULT_DPI: u32 = 200;

/// Prompt template the parser should use.
///
/// | Mode | Output |
/// |------|--------|
/// | `prompt_layout_all_en` | layout boxes, categories and text (default) |
/// | `prompt_layout_only_en` | layout boxes and categories only |
/// | `prompt_ocr` | plain text, no layout |
/// | `prompt_grounding_ocr` | text inside one caller-supplied bounding box |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    #[default]
    PromptLayoutAllEn,
    PromptLayoutOnlyEn,
    PromptOcr,
    PromptGroundingOcr,
}

impl PromptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptMode::PromptLayoutAllEn => "prompt_layout_all_en",
            PromptMode::PromptLayoutOnlyEn => "prompt_layout_only_en",
            PromptMode::PromptOcr => "prompt_ocr",
            PromptMode::PromptGroundingOcr => "prompt_grounding_ocr",
        }
    }

    /// Grounding mode needs a bounding box and a different parser call.
    pub fn is_grounding(&self) -> bool {
        matches!(self, PromptMode::PromptGroundingOcr)
    }
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptMode {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "prompt_layout_all_en" => Ok(PromptMode::PromptLayoutAllEn),
            "prompt_layout_only_en" => Ok(PromptMode::PromptLayoutOnlyEn),
            "prompt_ocr" => Ok(PromptMode::PromptOcr),
            "prompt_grounding_ocr" => Ok(PromptMode::PromptGroundingOcr),
            other => Err(WorkerError::UnknownPromptMode(other.to_string())),
        }
    }
}

/// Environment-sourced defaults, captured once at startup.
///
/// Each field holds the raw variable value, or `None` when unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDefaults {
    pub prompt_mode: Option<String>,
    pub temperature: Option<String>,
    pub max_tokens: Option<String>,
    pub top_p: Option<String>,
    pub num_threads: Option<String>,
    pub dpi: Option<String>,
    pub use_hf: Option<String>,
    pub min_pixels: Option<String>,
    pub max_pixels: Option<String>,
}

impl ConfigDefaults {
    /// Snapshot the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build defaults from any `name → value` lookup.
    ///
    /// ```rust
    /// use dots_ocr_worker::ConfigDefaults;
    /// use std::collections::HashMap;
    ///
    /// let env = HashMap::from([("DPI", "300")]);
    /// let defaults = ConfigDefaults::from_lookup(|k| env.get(k).map(|v| v.to_string()));
    /// assert_eq!(defaults.dpi.as_deref(), Some("300"));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            prompt_mode: lookup("PROMPT_MODE"),
            temperature: lookup("TEMPERATURE"),
            max_tokens: lookup("MAX_TOKENS"),
            top_p: lookup("TOP_P"),
            num_threads: lookup("NUM_THREADS"),
            dpi: lookup("DPI"),
            use_hf: lookup("USE_HF"),
            min_pixels: lookup("MIN_PIXELS"),
            max_pixels: lookup("MAX_PIXELS"),
        }
    }
}

/// Fully typed settings for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub prompt_mode: PromptMode,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub num_threads: u32,
    pub dpi: u32,
    pub use_hf: bool,
    pub min_pixels: Option<u64>,
    pub max_pixels: Option<u64>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            prompt_mode: PromptMode::default(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            top_p: DEFAULT_TOP_P,
            num_threads: DEFAULT_NUM_THREADS,
            dpi: DEFAULT_DPI,
            use_hf: false,
            min_pixels: None,
            max_pixels: None,
        }
    }
}

impl ResolvedConfig {
    /// Merge a job's settings over the environment defaults.
    pub fn resolve(request: &JobRequest, defaults: &ConfigDefaults) -> Result<Self, WorkerError> {
        let base = Self::default();

        let prompt_mode = match pick_text(request.prompt_mode.as_ref(), defaults.prompt_mode.as_deref())? {
            Some(mode) => mode.parse()?,
            None => base.prompt_mode,
        };

        let temperature = match pick(request.temperature.as_ref(), defaults.temperature.as_deref()) {
            Some(v) => v.as_f64("temperature")?,
            None => base.temperature,
        };
        let max_tokens = match pick(request.max_tokens.as_ref(), defaults.max_tokens.as_deref()) {
            Some(v) => v.as_u32("max_tokens")?,
            None => base.max_tokens,
        };
        let top_p = match pick(request.top_p.as_ref(), defaults.top_p.as_deref()) {
            Some(v) => v.as_f64("top_p")?,
            None => base.top_p,
        };
        let num_threads = match pick(request.num_threads.as_ref(), defaults.num_threads.as_deref()) {
            Some(v) => v.as_u32("num_threads")?,
            None => base.num_threads,
        };
        let dpi = match pick(request.dpi.as_ref(), defaults.dpi.as_deref()) {
            Some(v) => v.as_u32("dpi")?,
            None => base.dpi,
        };
        let use_hf = match pick(request.use_hf.as_ref(), defaults.use_hf.as_deref()) {
            Some(v) => v.as_bool("use_hf")?,
            None => base.use_hf,
        };

        let min_pixels = optional_u64(
            pick(request.min_pixels.as_ref(), defaults.min_pixels.as_deref()),
            "min_pixels",
        )?;
        let max_pixels = optional_u64(
            pick(request.max_pixels.as_ref(), defaults.max_pixels.as_deref()),
            "max_pixels",
        )?;

        Ok(Self {
            prompt_mode,
            temperature,
            max_tokens,
            top_p,
            num_threads,
            dpi,
            use_hf,
            min_pixels,
            max_pixels,
        })
    }

    /// The subset of settings the parser is constructed from.
    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            num_threads: self.num_threads,
            dpi: self.dpi,
            min_pixels: self.min_pixels,
            max_pixels: self.max_pixels,
            use_hf: self.use_hf,
        }
    }
}

/// Job value if present, else the environment value.
fn pick(request: Option<&ConfigValue>, env: Option<&str>) -> Option<ConfigValue> {
    request.cloned().or_else(|| env.map(ConfigValue::from))
}

/// Like [`pick`] for string settings, where a blank value falls through.
fn pick_text(request: Option<&ConfigValue>, env: Option<&str>) -> Result<Option<String>, WorkerError> {
    if let Some(value) = request {
        match value {
            ConfigValue::Text(s) if !s.trim().is_empty() => return Ok(Some(s.clone())),
            ConfigValue::Text(_) => {}
            other => {
                return Err(WorkerError::Coercion {
                    field: "prompt_mode",
                    value: serde_json::to_string(other).unwrap_or_default(),
                    expected: "string",
                })
            }
        }
    }
    Ok(env.filter(|s| !s.trim().is_empty()).map(str::to_string))
}

fn optional_u64(value: Option<ConfigValue>, field: &'static str) -> Result<Option<u64>, WorkerError> {
    match value {
        Some(v) if v.is_blank() => Ok(None),
        Some(v) => v.as_u64(field).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> ConfigDefaults {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigDefaults::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn builtin_defaults() {
        let cfg = ResolvedConfig::resolve(&JobRequest::default(), &ConfigDefaults::default()).unwrap();
        assert_eq!(cfg, ResolvedConfig::default());
        assert_eq!(cfg.prompt_mode, PromptMode::PromptLayoutAllEn);
        assert_eq!(cfg.temperature, 0.1);
        assert_eq!(cfg.max_tokens, 16384);
        assert_eq!(cfg.top_p, 1.0);
        assert_eq!(cfg.num_threads, 64);
        assert_eq!(cfg.dpi, 200);
        assert!(!cfg.use_hf);
        assert_eq!(cfg.min_pixels, None);
    }

    #[test]
    fn env_values_are_coerced() {
        let defaults = env(&[
            ("TEMPERATURE", "0.2"),
            ("MAX_TOKENS", "2048"),
            ("USE_HF", "True"),
            ("MIN_PIXELS", "3136"),
            ("MAX_PIXELS", ""),
            ("PROMPT_MODE", "prompt_ocr"),
        ]);
        let cfg = ResolvedConfig::resolve(&JobRequest::default(), &defaults).unwrap();
        assert_eq!(cfg.temperature, 0.2);
        assert_eq!(cfg.max_tokens, 2048);
        assert!(cfg.use_hf);
        assert_eq!(cfg.min_pixels, Some(3136));
        assert_eq!(cfg.max_pixels, None);
        assert_eq!(cfg.prompt_mode, PromptMode::PromptOcr);
    }

    #[test]
    fn request_beats_env() {
        let defaults = env(&[("TEMPERATURE", "0.7"), ("DPI", "150")]);
        let request = JobRequest {
            temperature: Some(ConfigValue::Number(serde_json::Number::from_f64(0.7).unwrap())),
            dpi: Some(ConfigValue::from("300")),
            ..Default::default()
        };
        let cfg = ResolvedConfig::resolve(&request, &defaults).unwrap();
        assert_eq!(cfg.temperature, 0.7);
        assert_eq!(cfg.dpi, 300);

        let request = JobRequest {
            temperature: Some(ConfigValue::from("0.3")),
            ..Default::default()
        };
        let cfg = ResolvedConfig::resolve(&request, &defaults).unwrap();
        assert_eq!(cfg.temperature, 0.3);
    }

    #[test]
    fn malformed_env_fails_with_field_name() {
        let defaults = env(&[("MAX_TOKENS", "abc")]);
        let err = ResolvedConfig::resolve(&JobRequest::default(), &defaults).unwrap_err();
        match err {
            WorkerError::Coercion { field, value, .. } => {
                assert_eq!(field, "max_tokens");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_prompt_mode() {
        let request = JobRequest {
            prompt_mode: Some(ConfigValue::from("prompt_poetry")),
            ..Default::default()
        };
        let err = ResolvedConfig::resolve(&request, &ConfigDefaults::default()).unwrap_err();
        assert!(matches!(err, WorkerError::UnknownPromptMode(ref m) if m == "prompt_poetry"));
    }

    #[test]
    fn blank_prompt_mode_falls_through() {
        let request = JobRequest {
            prompt_mode: Some(ConfigValue::from("")),
            ..Default::default()
        };
        let defaults = env(&[("PROMPT_MODE", "prompt_layout_only_en")]);
        let cfg = ResolvedConfig::resolve(&request, &defaults).unwrap();
        assert_eq!(cfg.prompt_mode, PromptMode::PromptLayoutOnlyEn);
    }

    #[test]
    fn prompt_mode_round_trips_through_str() {
        for mode in [
            PromptMode::PromptLayoutAllEn,
            PromptMode::PromptLayoutOnlyEn,
            PromptMode::PromptOcr,
            PromptMode::PromptGroundingOcr,
        ] {
            assert_eq!(mode.as_str().parse::<PromptMode>().unwrap(), mode);
            assert_eq!(
                serde_json::to_value(mode).unwrap(),
                serde_json::Value::String(mode.to_string())
            );
        }
        assert!(PromptMode::PromptGroundingOcr.is_grounding());
        assert!(!PromptMode::PromptOcr.is_grounding());
    }

    #[test]
    fn parser_options_mirror_config() {
        let cfg = ResolvedConfig {
            min_pixels: Some(100),
            use_hf: true,
            ..Default::default()
        };
        let opts = cfg.parser_options();
        assert_eq!(opts.max_tokens, cfg.max_tokens);
        assert_eq!(opts.num_threads, cfg.num_threads);
        assert_eq!(opts.min_pixels, Some(100));
        assert!(opts.use_hf);
    }
}
