//! Client for the long-running configuration-space analysis engine: job
//! submission, status polling under a wall-clock budget, and the one-shot
//! summary request.

pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info};

use pricely_core::config::AnalysisConfig;

pub use transport::{AnalysisTransport, HttpAnalysisTransport, JobStatusPayload};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis job failed: {0}")]
    JobFailed(String),
    #[error("timed out waiting for analysis result")]
    Timeout,
    #[error("analysis request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not encode job filters: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("analysis response was malformed: {0}")]
    MalformedResponse(String),
}

/// Inputs for one analysis job submission.
#[derive(Clone, Debug)]
pub struct AnalysisJobOptions {
    pub yaml_content: String,
    pub operation: String,
    pub solver: String,
    pub filters: Option<Map<String, Value>>,
    pub objective: Option<String>,
}

/// Drives the submit-then-poll protocol. The client owns the wait budget so
/// a hung remote job cannot block the caller indefinitely.
pub struct AnalysisClient {
    transport: Arc<dyn AnalysisTransport>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl AnalysisClient {
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let transport = Arc::new(HttpAnalysisTransport::new(config)?);
        Ok(Self::with_transport(
            transport,
            Duration::from_secs(config.poll_interval_secs),
            Duration::from_secs(config.max_wait_secs),
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn AnalysisTransport>,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Self {
        Self { transport, poll_interval, max_wait }
    }

    /// Submits a job and polls until it reaches a terminal status or the
    /// wait budget is exceeded. Returns the embedded result payload.
    pub async fn submit_job(&self, options: &AnalysisJobOptions) -> Result<Value, AnalysisError> {
        info!(
            operation = %options.operation,
            solver = %options.solver,
            "submitting analysis job"
        );
        let job_id = self.transport.submit(options).await?;
        info!(job_id = %job_id, "analysis job accepted");
        self.poll_job(&job_id).await
    }

    async fn poll_job(&self, job_id: &str) -> Result<Value, AnalysisError> {
        let mut elapsed = Duration::ZERO;

        while elapsed < self.max_wait {
            let payload = self.transport.status(job_id).await?;
            match payload.status.as_str() {
                "COMPLETED" => {
                    info!(job_id = %job_id, "analysis job completed");
                    return Ok(payload.result.unwrap_or_else(|| Value::Object(Map::new())));
                }
                "FAILED" => {
                    let description =
                        payload.error.unwrap_or_else(|| "no error description".to_string());
                    error!(job_id = %job_id, error = %description, "analysis job failed");
                    return Err(AnalysisError::JobFailed(description));
                }
                _ => {
                    tokio::time::sleep(self.poll_interval).await;
                    elapsed += self.poll_interval;
                }
            }
        }

        error!(job_id = %job_id, "analysis job timed out");
        Err(AnalysisError::Timeout)
    }

    /// Single synchronous summary request, no polling.
    pub async fn get_summary(&self, yaml_content: &str) -> Result<Value, AnalysisError> {
        self.transport.summary(yaml_content).await
    }
}
