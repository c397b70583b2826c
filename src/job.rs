//! Inbound job payloads.
//!
//! A serverless job arrives as `{ "id": ..., "input": { ... } }`. Only the
//! `input` object matters to the adapter; `id` is kept for logging and for
//! the worker loop that posts the result back.
//!
//! Optional scalar settings are deliberately loose: callers send
//! `"temperature": 0.2` as often as `"temperature": "0.2"`, so each one is a
//! [`ConfigValue`] that is coerced to its real type during config resolution.

use crate::error::WorkerError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One unit of work as delivered by the job queue.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Job {
    /// Queue-assigned job id, absent in local one-shot runs. Numeric ids are
    /// kept as their decimal text; any other shape is ignored.
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub input: JobRequest,
}

impl Job {
    /// Read a raw payload, rejecting anything without an `input` object.
    pub fn from_value(payload: Value) -> Result<Self, WorkerError> {
        match payload.get("input") {
            Some(Value::Object(_)) => {}
            Some(_) => return Err(WorkerError::InvalidJob("`input` must be an object".into())),
            None => return Err(WorkerError::InvalidJob("missing `input` object".into())),
        }
        serde_json::from_value(payload).map_err(|e| WorkerError::InvalidJob(e.to_string()))
    }

    /// The `id` of a raw payload, read the same way as [`Job::id`].
    pub fn id_of(payload: &Value) -> Option<String> {
        scalar_id(payload.get("id"))
    }
}

fn scalar_id(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(scalar_id(raw.as_ref()))
}

/// The `input` object of a job.
///
/// Every field is optional at the type level; `image` is checked by the
/// adapter so a missing image produces the dedicated pre-flight error rather
/// than a deserialisation failure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobRequest {
    /// Inline `data:image/...;base64,` URI, `http(s)` URL, or local path.
    pub image: Option<String>,
    pub prompt_mode: Option<ConfigValue>,
    /// Kept raw: shape problems are a [`WorkerError::MissingBBox`], not a
    /// payload error.
    pub bbox: Option<Value>,
    pub temperature: Option<ConfigValue>,
    pub max_tokens: Option<ConfigValue>,
    pub top_p: Option<ConfigValue>,
    pub num_threads: Option<ConfigValue>,
    pub dpi: Option<ConfigValue>,
    pub use_hf: Option<ConfigValue>,
    pub min_pixels: Option<ConfigValue>,
    pub max_pixels: Option<ConfigValue>,
}

impl JobRequest {
    /// The image reference, treating an empty string as absent.
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref().filter(|s| !s.is_empty())
    }
}

/// A scalar setting as it appeared in the payload or the environment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl ConfigValue {
    pub fn as_f64(&self, field: &'static str) -> Result<f64, WorkerError> {
        let parsed = match self {
            ConfigValue::Number(n) => n.as_f64(),
            ConfigValue::Text(s) => s.trim().parse::<f64>().ok(),
            ConfigValue::Bool(_) => None,
        };
        parsed
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.coercion_error(field, "number"))
    }

    pub fn as_u64(&self, field: &'static str) -> Result<u64, WorkerError> {
        let parsed = match self {
            ConfigValue::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|v| *v >= 0.0 && v.fract() == 0.0 && *v <= u64::MAX as f64)
                    .map(|v| v as u64)
            }),
            ConfigValue::Text(s) => s.trim().parse::<u64>().ok(),
            ConfigValue::Bool(_) => None,
        };
        parsed.ok_or_else(|| self.coercion_error(field, "non-negative integer"))
    }

    pub fn as_u32(&self, field: &'static str) -> Result<u32, WorkerError> {
        let wide = self.as_u64(field)?;
        u32::try_from(wide).map_err(|_| self.coercion_error(field, "32-bit integer"))
    }

    pub fn as_bool(&self, field: &'static str) -> Result<bool, WorkerError> {
        match self {
            ConfigValue::Bool(b) => Ok(*b),
            ConfigValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(self.coercion_error(field, "boolean")),
            },
            ConfigValue::Number(_) => Err(self.coercion_error(field, "boolean")),
        }
    }

    /// `true` for a blank text value, which the pixel bounds read as "unset".
    pub fn is_blank(&self) -> bool {
        matches!(self, ConfigValue::Text(s) if s.trim().is_empty())
    }

    fn coercion_error(&self, field: &'static str, expected: &'static str) -> WorkerError {
        let value = match self {
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Number(n) => n.to_string(),
            ConfigValue::Text(s) => s.clone(),
        };
        WorkerError::Coercion {
            field,
            value,
            expected,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Text(s.to_string())
    }
}

/// Region for grounding OCR: `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox(pub [f64; 4]);

impl BoundingBox {
    /// Read a box from the raw `bbox` field.
    ///
    /// Anything other than an array of exactly four numbers is a
    /// [`WorkerError::MissingBBox`].
    pub fn from_value(raw: Option<&Value>) -> Result<Self, WorkerError> {
        let items = raw
            .and_then(Value::as_array)
            .filter(|items| items.len() == 4)
            .ok_or(WorkerError::MissingBBox)?;

        let mut coords = [0.0; 4];
        for (slot, item) in coords.iter_mut().zip(items) {
            *slot = item.as_f64().ok_or(WorkerError::MissingBBox)?;
        }
        Ok(Self(coords))
    }
}
