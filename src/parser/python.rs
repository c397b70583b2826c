//! Subprocess bridge to the `dots_ocr` Python package.
//!
//! Each parse spawns `python -c <bridge>`, writes one JSON request to the
//! child's stdin and reads one JSON reply from its stdout. The bridge script
//! is compiled into the binary, so the only runtime requirement is a Python
//! interpreter with `dots_ocr` importable.
//!
//! Anything the parser prints is redirected to stderr inside the bridge;
//! stdout carries the reply and nothing else.

use super::{DocumentParser, ParserFactory, ParserOptions};
use crate::config::PromptMode;
use crate::error::WorkerError;
use crate::job::BoundingBox;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use tracing::debug;

const BRIDGE_SCRIPT: &str = include_str!("dots_ocr_bridge.py");

/// Creates [`PythonParser`]s that all use the same interpreter.
#[derive(Debug, Clone)]
pub struct PythonParserFactory {
    python_exe: PathBuf,
    python_path: Option<PathBuf>,
}

impl PythonParserFactory {
    pub fn new(python_exe: impl Into<PathBuf>) -> Self {
        Self {
            python_exe: python_exe.into(),
            python_path: None,
        }
    }

    /// Set `PYTHONPATH` for the interpreter, e.g. to a checkout of `dots_ocr`.
    pub fn with_python_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.python_path = Some(dir.into());
        self
    }

    pub fn python_exe(&self) -> &Path {
        &self.python_exe
    }
}

impl Default for PythonParserFactory {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl ParserFactory for PythonParserFactory {
    fn create(&self, options: &ParserOptions) -> Result<Arc<dyn DocumentParser>, WorkerError> {
        Ok(Arc::new(PythonParser {
            python_exe: self.python_exe.clone(),
            python_path: self.python_path.clone(),
            options: options.clone(),
        }))
    }
}

/// One job's parser: an interpreter path plus the options it was built with.
#[derive(Debug, Clone)]
pub struct PythonParser {
    python_exe: PathBuf,
    python_path: Option<PathBuf>,
    options: ParserOptions,
}

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    op: &'static str,
    image: &'a Path,
    prompt_mode: PromptMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    bbox: Option<BoundingBox>,
    options: &'a ParserOptions,
}

#[derive(Debug, Deserialize)]
struct BridgeReply {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl PythonParser {
    fn call(&self, request: &BridgeRequest<'_>) -> Result<Value, WorkerError> {
        debug!(
            "dots_ocr bridge: op={} image={} mode={}",
            request.op,
            request.image.display(),
            request.prompt_mode
        );
        let payload = serde_json::to_vec(request)
            .map_err(|e| WorkerError::Internal(format!("encode bridge request: {e}")))?;

        let mut command = Command::new(&self.python_exe);
        command
            .arg("-c")
            .arg(BRIDGE_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.python_path {
            command.env("PYTHONPATH", dir);
        }

        let mut child = command.spawn().map_err(|e| {
            WorkerError::Parse(format!(
                "could not start parser interpreter '{}': {e}",
                self.python_exe.display()
            ))
        })?;

        // The child is always reaped, even when it stopped reading early.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&payload),
            None => Err(io::Error::other("parser stdin unavailable")),
        };

        let output = child
            .wait_with_output()
            .map_err(|e| WorkerError::Parse(format!("waiting for parser: {e}")))?;
        if let Err(e) = written {
            return Err(WorkerError::Parse(format!(
                "writing parser request: {e}; parser exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        interpret_output(&output)
    }
}

impl DocumentParser for PythonParser {
    fn parse(&self, image: &Path, prompt_mode: PromptMode) -> Result<Value, WorkerError> {
        self.call(&BridgeRequest {
            op: "parse",
            image,
            prompt_mode,
            bbox: None,
            options: &self.options,
        })
    }

    fn parse_grounded(
        &self,
        image: &Path,
        bbox: BoundingBox,
        prompt_mode: PromptMode,
    ) -> Result<Value, WorkerError> {
        self.call(&BridgeRequest {
            op: "parse_grounding",
            image,
            prompt_mode,
            bbox: Some(bbox),
            options: &self.options,
        })
    }
}

/// Turn the child's exit status and stdout into a result.
fn interpret_output(output: &Output) -> Result<Value, WorkerError> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(WorkerError::Parse(format!(
            "parser exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    if !stderr.trim().is_empty() {
        debug!("parser stderr: {}", stderr.trim());
    }
    interpret_reply(&output.stdout)
}

/// Read the bridge reply. If something else leaked onto stdout, the reply
/// is the last non-empty line.
fn interpret_reply(stdout: &[u8]) -> Result<Value, WorkerError> {
    let reply: BridgeReply = match serde_json::from_slice(stdout) {
        Ok(reply) => reply,
        Err(e) => last_line_reply(stdout)
            .ok_or_else(|| WorkerError::Parse(format!("unreadable parser reply: {e}")))?,
    };
    if reply.ok {
        Ok(reply.result)
    } else {
        Err(WorkerError::Parse(
            reply.error.unwrap_or_else(|| "parser failed without a message".into()),
        ))
    }
}

fn last_line_reply(stdout: &[u8]) -> Option<BridgeReply> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolvedConfig;
    use serde_json::json;

    #[test]
    fn request_shape_for_grounding() {
        let options = ResolvedConfig::default().parser_options();
        let request = BridgeRequest {
            op: "parse_grounding",
            image: Path::new("/tmp/page.jpg"),
            prompt_mode: PromptMode::PromptGroundingOcr,
            bbox: Some(BoundingBox([1.0, 2.0, 3.0, 4.0])),
            options: &options,
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["op"], "parse_grounding");
        assert_eq!(v["image"], "/tmp/page.jpg");
        assert_eq!(v["prompt_mode"], "prompt_grounding_ocr");
        assert_eq!(v["bbox"], json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(v["options"]["dpi"], 200);
    }

    #[test]
    fn request_shape_omits_bbox_for_general_parse() {
        let options = ResolvedConfig::default().parser_options();
        let request = BridgeRequest {
            op: "parse",
            image: Path::new("a.jpg"),
            prompt_mode: PromptMode::PromptOcr,
            bbox: None,
            options: &options,
        };
        let v = serde_json::to_value(&request).unwrap();
        assert!(v.get("bbox").is_none());
    }

    #[test]
    fn reply_success_passes_result_through() {
        let result = interpret_reply(br#"{"ok": true, "result": [{"page_no": 0}]}"#).unwrap();
        assert_eq!(result, json!([{"page_no": 0}]));
    }

    #[test]
    fn reply_failure_becomes_parse_error() {
        let err = interpret_reply(br#"{"ok": false, "error": "CUDA out of memory"}"#).unwrap_err();
        assert!(matches!(err, WorkerError::Parse(ref m) if m == "CUDA out of memory"));
    }

    #[test]
    fn garbage_reply_is_parse_error() {
        let err = interpret_reply(b"Loading weights...\n").unwrap_err();
        assert!(matches!(err, WorkerError::Parse(_)));
    }

    #[test]
    fn reply_after_stray_output_is_recovered() {
        let stdout = b"loading model weights\n{\"ok\": true, \"result\": {\"text\": \"hi\"}}";
        assert_eq!(interpret_reply(stdout).unwrap(), json!({"text": "hi"}));
    }

    const FAKE_PARSER: &str = r#"
import os
import sys


class DotsOCRParser:
    def __init__(self, **options):
        self.options = options

    def parse_one_image(self, image_file, prompt_mode):
        if image_file == "broken.jpg":
            raise ValueError("cannot identify image file")
        os.system("echo loading model weights")
        print("inference: 100%")
        return [{"image": image_file, "prompt_mode": prompt_mode, "dpi": self.options["dpi"]}]

    def parse_one_image_grounding(self, image_file, bbox, prompt_mode):
        sys.stdout.write("cropping\n")
        return {"bbox": bbox, "prompt_mode": prompt_mode}
"#;

    fn python3_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// A parser backed by a stand-in `dots_ocr` package in a temp dir.
    fn fake_dots_ocr() -> (tempfile::TempDir, Arc<dyn DocumentParser>) {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("dots_ocr");
        std::fs::create_dir(&package).unwrap();
        std::fs::write(package.join("__init__.py"), "").unwrap();
        std::fs::write(package.join("parser.py"), FAKE_PARSER).unwrap();

        let parser = PythonParserFactory::new("python3")
            .with_python_path(dir.path())
            .create(&ResolvedConfig::default().parser_options())
            .unwrap();
        (dir, parser)
    }

    #[test]
    fn bridge_keeps_reply_clean_when_parser_writes_to_stdout() {
        if !python3_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let (_dir, parser) = fake_dots_ocr();

        let result = parser
            .parse(Path::new("/tmp/page.jpg"), PromptMode::PromptLayoutAllEn)
            .unwrap();
        assert_eq!(
            result,
            json!([{"image": "/tmp/page.jpg", "prompt_mode": "prompt_layout_all_en", "dpi": 200}])
        );

        let grounded = parser
            .parse_grounded(
                Path::new("/tmp/page.jpg"),
                BoundingBox([1.0, 2.0, 3.0, 4.0]),
                PromptMode::PromptGroundingOcr,
            )
            .unwrap();
        assert_eq!(grounded["bbox"], json!([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn bridge_reports_parser_exception() {
        if !python3_available() {
            eprintln!("python3 not found; skipping");
            return;
        }
        let (_dir, parser) = fake_dots_ocr();

        let err = parser
            .parse(Path::new("broken.jpg"), PromptMode::PromptOcr)
            .unwrap_err();
        match err {
            WorkerError::Parse(msg) => {
                assert_eq!(msg, "ValueError: cannot identify image file")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn interpreter_that_ignores_stdin_is_reaped_with_error() {
        // `true` exits without reading, so a large request hits a closed pipe.
        let parser = PythonParserFactory::new("true")
            .create(&ResolvedConfig::default().parser_options())
            .unwrap();
        let huge = "x".repeat(1 << 20);

        let err = parser
            .parse(Path::new(&huge), PromptMode::PromptOcr)
            .unwrap_err();
        match err {
            WorkerError::Parse(msg) => {
                assert!(msg.starts_with("writing parser request:"), "got: {msg}");
                assert!(msg.contains("parser exited with"), "got: {msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_interpreter_is_parse_error() {
        let factory = PythonParserFactory::new("/definitely/not/a/python");
        let parser = factory
            .create(&ResolvedConfig::default().parser_options())
            .unwrap();
        let err = parser
            .parse(Path::new("/tmp/a.jpg"), PromptMode::PromptOcr)
            .unwrap_err();
        match err {
            WorkerError::Parse(msg) => assert!(msg.contains("/definitely/not/a/python"), "got: {msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bridge_script_is_embedded() {
        assert!(BRIDGE_SCRIPT.contains("DotsOCRParser"));
        assert!(BRIDGE_SCRIPT.contains("parse_one_image_grounding"));
    }
}
