//! Serverless worker loop: poll the job queue, run the adapter, post the
//! envelope back.
//!
//! The queue speaks the RunPod worker webhook protocol:
//!
//! * `GET  $RUNPOD_WEBHOOK_GET_JOB` (with `$ID` → worker id) returns `204`
//!   when idle, or `200` with `{"id": "...", "input": {...}}`.
//! * `POST $RUNPOD_WEBHOOK_POST_OUTPUT` (with `$ID` → job id) receives
//!   `{"output": <envelope>}` for a success. For an error envelope the
//!   message moves to a top-level `"error"` so the platform marks the job
//!   failed: `{"output": {"status": "error"}, "error": "..."}`, with
//!   `output` left out when nothing else remains.
//!
//! Both requests carry the API key in the `Authorization` header.
//!
//! Jobs run strictly one at a time. Shutdown is only observed while polling
//! or sleeping, never in the middle of a job.
//!
//! ## Backoff
//!
//! Empty polls sleep for `idle_backoff`. Transport failures back off
//! exponentially (`idle_backoff * 2^(failures-1)`), capped at `max_backoff`,
//! and reset after the next successful poll.

use crate::error::WorkerError;
use crate::handler::JobAdapter;
use crate::job::Job;
use crate::output::ResponseEnvelope;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Queue endpoints and pacing for [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Job polling URL; `$ID` is replaced with `worker_id`.
    pub job_url: String,
    /// Result URL; `$ID` is replaced with the job id.
    pub result_url: String,
    pub api_key: Option<String>,
    pub worker_id: String,
    pub idle_backoff: Duration,
    pub max_backoff: Duration,
}

impl WorkerSettings {
    pub fn new(job_url: impl Into<String>, result_url: impl Into<String>) -> Self {
        Self {
            job_url: job_url.into(),
            result_url: result_url.into(),
            api_key: None,
            worker_id: "local".to_string(),
            idle_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn job_endpoint(&self) -> String {
        self.job_url.replace("$ID", &self.worker_id)
    }

    pub fn result_endpoint(&self, job_id: &str) -> String {
        self.result_url.replace("$ID", job_id)
    }

    /// Delay before the next poll after `failures` consecutive errors.
    pub fn failure_backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        self.idle_backoff
            .saturating_mul(2u32.pow(exp))
            .min(self.max_backoff)
    }
}

/// Body posted to the result endpoint for one envelope.
pub fn result_body(envelope: &ResponseEnvelope) -> Value {
    let mut body = Map::new();
    match envelope.to_value() {
        Value::Object(mut output) => {
            if let Some(message) = output.remove("error") {
                body.insert("error".to_string(), message);
            }
            if !output.is_empty() {
                body.insert("output".to_string(), Value::Object(output));
            }
        }
        other => {
            body.insert("output".to_string(), other);
        }
    }
    Value::Object(body)
}

/// Polls for jobs and feeds them to a [`JobAdapter`].
#[derive(Debug)]
pub struct Worker {
    adapter: JobAdapter,
    settings: WorkerSettings,
    client: reqwest::Client,
}

impl Worker {
    pub fn new(adapter: JobAdapter, settings: WorkerSettings) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| WorkerError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            adapter,
            settings,
            client,
        })
    }

    /// Ask the queue for a job. `Ok(None)` means nothing is waiting.
    pub async fn next_job(&self) -> Result<Option<Value>, WorkerError> {
        let url = self.settings.job_endpoint();
        let mut request = self.client.get(&url);
        if let Some(ref key) = self.settings.api_key {
            request = request.header(reqwest::header::AUTHORIZATION, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WorkerError::Queue(format!("polling {url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(WorkerError::Queue(format!("polling {url}: HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| WorkerError::Queue(format!("reading job: {e}")))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let payload: Value = serde_json::from_slice(&body)
            .map_err(|e| WorkerError::Queue(format!("job is not JSON: {e}")))?;
        match &payload {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            _ => Ok(Some(payload)),
        }
    }

    /// Report a job's envelope to the queue.
    pub async fn post_result(&self, job_id: &str, envelope: &ResponseEnvelope) -> Result<(), WorkerError> {
        let url = self.settings.result_endpoint(job_id);
        let mut request = self.client.post(&url).json(&result_body(envelope));
        if let Some(ref key) = self.settings.api_key {
            request = request.header(reqwest::header::AUTHORIZATION, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WorkerError::Queue(format!("posting result for {job_id}: {e}")))?;
        if !response.status().is_success() {
            return Err(WorkerError::Queue(format!(
                "posting result for {job_id}: HTTP {}",
                response.status()
            )));
        }
        debug!("Posted result for job {}", job_id);
        Ok(())
    }

    /// Run one job payload end to end and report it.
    pub async fn process(&self, payload: Value) -> ResponseEnvelope {
        let job_id = Job::id_of(&payload);
        info!("Received job {}", job_id.as_deref().unwrap_or("<no id>"));

        let envelope = self.adapter.handle_payload(payload).await;

        match job_id {
            Some(id) => {
                if let Err(e) = self.post_result(&id, &envelope).await {
                    error!("{}", e);
                }
            }
            None => warn!("Job has no id; result not reported"),
        }
        envelope
    }

    /// Poll and process jobs until `shutdown` resolves.
    pub async fn run<S>(&self, shutdown: S) -> Result<(), WorkerError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Worker {} polling {}", self.settings.worker_id, self.settings.job_endpoint());
        let mut failures: u32 = 0;

        loop {
            let polled = tokio::select! {
                _ = &mut shutdown => break,
                polled = self.next_job() => polled,
            };

            let delay = match polled {
                Ok(Some(payload)) => {
                    failures = 0;
                    self.process(payload).await;
                    continue;
                }
                Ok(None) => {
                    failures = 0;
                    self.settings.idle_backoff
                }
                Err(e) => {
                    failures += 1;
                    let backoff = self.settings.failure_backoff(failures);
                    warn!("{} (retry {} in {}ms)", e, failures, backoff.as_millis());
                    backoff
                }
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(delay) => {}
            }
        }

        info!("Worker stopped");
        Ok(())
    }
}
