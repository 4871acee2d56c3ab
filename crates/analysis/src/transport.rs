//! Wire-level access to the analysis engine's job API, behind a trait so
//! the polling protocol can run against scripted responses in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;

use pricely_core::config::AnalysisConfig;

use crate::{AnalysisError, AnalysisJobOptions};

/// Status payload returned for a submitted job.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct JobStatusPayload {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    /// Submits a job, returning the remote job identifier.
    async fn submit(&self, options: &AnalysisJobOptions) -> Result<String, AnalysisError>;
    async fn status(&self, job_id: &str) -> Result<JobStatusPayload, AnalysisError>;
    async fn summary(&self, yaml_content: &str) -> Result<Value, AnalysisError>;
}

/// Production transport: multipart submit, status GET, summary POST, bearer
/// auth when an API key is configured.
pub struct HttpAnalysisTransport {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpAnalysisTransport {
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.api_key.as_ref().map(|key| key.expose_secret().to_string()),
        })
    }

    fn pricing_file_part(yaml_content: &str) -> Result<multipart::Part, AnalysisError> {
        let part = multipart::Part::text(yaml_content.to_string())
            .file_name("pricing.yaml")
            .mime_str("application/x-yaml")?;
        Ok(part)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobAccepted {
    #[serde(rename = "jobId")]
    job_id: String,
}

#[async_trait]
impl AnalysisTransport for HttpAnalysisTransport {
    async fn submit(&self, options: &AnalysisJobOptions) -> Result<String, AnalysisError> {
        let mut form = multipart::Form::new()
            .part("pricingFile", Self::pricing_file_part(&options.yaml_content)?)
            .text("operation", options.operation.clone())
            .text("solver", options.solver.clone());
        if let Some(filters) = &options.filters {
            form = form.text("filters", serde_json::to_string(filters)?);
        }
        if let Some(objective) = &options.objective {
            form = form.text("objective", objective.clone());
        }

        let url = format!("{}/api/v1/pricing/analysis", self.base_url);
        let response =
            self.authorized(self.client.post(&url)).multipart(form).send().await?.error_for_status()?;
        let accepted: JobAccepted = response.json().await?;
        Ok(accepted.job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatusPayload, AnalysisError> {
        let url = format!("{}/api/v1/pricing/analysis/{job_id}", self.base_url);
        let response = self.authorized(self.client.get(&url)).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn summary(&self, yaml_content: &str) -> Result<Value, AnalysisError> {
        let form = multipart::Form::new()
            .part("pricingFile", Self::pricing_file_part(yaml_content)?);

        let url = format!("{}/api/v1/pricing/summary", self.base_url);
        let response =
            self.authorized(self.client.post(&url)).multipart(form).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
