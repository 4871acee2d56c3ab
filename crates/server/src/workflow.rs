//! Production pricing workflow: resolves a Pricing2Yaml document from an
//! upload, the cache, or a remote fetch, then drives the analysis engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use pricely_agent::workflow::{PricingWorkflow, WorkflowError};
use pricely_analysis::{AnalysisClient, AnalysisJobOptions};
use pricely_core::cache::Cache;
use pricely_core::plan::{Objective, Solver, UPLOADED_DOCUMENT_REFERENCE};

const DOCUMENT_CACHE_PREFIX: &str = "pricing-document:";

/// Seam for the remote document download, so cache behavior can be
/// exercised against scripted documents.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, WorkflowError>;
}

pub struct HttpDocumentFetcher {
    client: reqwest::Client,
}

impl HttpDocumentFetcher {
    pub fn new(timeout: Duration) -> Result<Self, WorkflowError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| WorkflowError::Fetch(error.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &str) -> Result<String, WorkflowError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| WorkflowError::Fetch(error.to_string()))?;
        response.text().await.map_err(|error| WorkflowError::Fetch(error.to_string()))
    }
}

/// Workflow backed by the remote analysis engine. Fetched documents are
/// memoized in the cache under their URL; uploads bypass the cache.
pub struct AnalysisBackedWorkflow {
    analysis: AnalysisClient,
    cache: Arc<dyn Cache>,
    fetcher: Arc<dyn DocumentFetcher>,
    document_ttl: Duration,
}

impl AnalysisBackedWorkflow {
    pub fn new(
        analysis: AnalysisClient,
        cache: Arc<dyn Cache>,
        fetcher: Arc<dyn DocumentFetcher>,
        document_ttl: Duration,
    ) -> Self {
        Self { analysis, cache, fetcher, document_ttl }
    }

    /// Resolves the document content an action will run against. A fresh
    /// fetch replaces whatever the cache held for that URL.
    async fn resolve_document(
        &self,
        url: Option<&str>,
        yaml_content: Option<&str>,
        refresh: bool,
    ) -> Result<String, WorkflowError> {
        if let Some(yaml) = yaml_content {
            return Ok(yaml.to_string());
        }

        let url = url.ok_or_else(|| {
            WorkflowError::MissingContext(
                "no pricing URL or uploaded document available".to_string(),
            )
        })?;
        if url == UPLOADED_DOCUMENT_REFERENCE {
            return Err(WorkflowError::MissingContext(
                "uploaded document reference without document content".to_string(),
            ));
        }

        let key = format!("{DOCUMENT_CACHE_PREFIX}{url}");
        if !refresh {
            if let Some(cached) = self.cache.get(&key).await? {
                debug!(url = %url, "pricing document served from cache");
                return Ok(cached);
            }
        }

        let document = self.fetcher.fetch(url).await?;
        self.cache.set(&key, document.clone(), self.document_ttl).await?;
        info!(url = %url, refresh, bytes = document.len(), "pricing document fetched");
        Ok(document)
    }

    async fn run_analysis(
        &self,
        operation: &str,
        document: String,
        filters: Option<&Map<String, Value>>,
        solver: Solver,
        objective: Option<Objective>,
    ) -> Result<Value, WorkflowError> {
        let options = AnalysisJobOptions {
            yaml_content: document,
            operation: operation.to_string(),
            solver: solver.as_str().to_string(),
            filters: filters.cloned(),
            objective: objective.map(|objective| objective.as_str().to_string()),
        };
        Ok(self.analysis.submit_job(&options).await?)
    }
}

#[async_trait]
impl PricingWorkflow for AnalysisBackedWorkflow {
    async fn run_summary(
        &self,
        url: Option<&str>,
        yaml_content: Option<&str>,
        refresh: bool,
    ) -> Result<Value, WorkflowError> {
        let document = self.resolve_document(url, yaml_content, refresh).await?;
        Ok(self.analysis.get_summary(&document).await?)
    }

    async fn run_subscriptions(
        &self,
        url: &str,
        filters: Option<&Map<String, Value>>,
        solver: Solver,
        refresh: bool,
        yaml_content: Option<&str>,
    ) -> Result<Value, WorkflowError> {
        let document = self.resolve_document(non_empty(url), yaml_content, refresh).await?;
        self.run_analysis("subscriptions", document, filters, solver, None).await
    }

    async fn run_optimal(
        &self,
        url: &str,
        filters: Option<&Map<String, Value>>,
        solver: Solver,
        objective: Objective,
        refresh: bool,
        yaml_content: Option<&str>,
    ) -> Result<Value, WorkflowError> {
        let document = self.resolve_document(non_empty(url), yaml_content, refresh).await?;
        self.run_analysis("optimal", document, filters, solver, Some(objective)).await
    }
}

fn non_empty(url: &str) -> Option<&str> {
    if url.is_empty() {
        None
    } else {
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use pricely_agent::workflow::{PricingWorkflow, WorkflowError};
    use pricely_analysis::{
        AnalysisClient, AnalysisError, AnalysisJobOptions, AnalysisTransport, JobStatusPayload,
    };
    use pricely_core::cache::{Cache, MemoryCache};
    use pricely_core::plan::{Objective, Solver, UPLOADED_DOCUMENT_REFERENCE};

    use super::{AnalysisBackedWorkflow, DocumentFetcher};

    struct ScriptedFetcher {
        document: String,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(document: &str) -> Arc<Self> {
            Arc::new(Self { document: document.to_string(), calls: Mutex::new(Vec::new()) })
        }

        fn fetch_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DocumentFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<String, WorkflowError> {
            self.calls.lock().unwrap().push(url.to_string());
            Ok(self.document.clone())
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        submitted: Mutex<Vec<AnalysisJobOptions>>,
        summarized: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnalysisTransport for RecordingTransport {
        async fn submit(&self, options: &AnalysisJobOptions) -> Result<String, AnalysisError> {
            self.submitted.lock().unwrap().push(options.clone());
            Ok("job-1".to_string())
        }

        async fn status(&self, _job_id: &str) -> Result<JobStatusPayload, AnalysisError> {
            Ok(JobStatusPayload {
                status: "COMPLETED".to_string(),
                result: Some(json!({"cardinality": 3})),
                error: None,
            })
        }

        async fn summary(&self, yaml_content: &str) -> Result<Value, AnalysisError> {
            self.summarized.lock().unwrap().push(yaml_content.to_string());
            Ok(json!({"synopsis": "ok"}))
        }
    }

    fn workflow(
        transport: Arc<RecordingTransport>,
        cache: Arc<MemoryCache>,
        fetcher: Arc<ScriptedFetcher>,
    ) -> AnalysisBackedWorkflow {
        let analysis = AnalysisClient::with_transport(
            transport,
            Duration::from_millis(1),
            Duration::from_millis(50),
        );
        AnalysisBackedWorkflow::new(analysis, cache, fetcher, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn uploaded_document_bypasses_cache_and_fetch() {
        let transport = Arc::new(RecordingTransport::default());
        let fetcher = ScriptedFetcher::new("fetched: true");
        let subject = workflow(transport.clone(), Arc::new(MemoryCache::new()), fetcher.clone());

        subject
            .run_summary(Some(UPLOADED_DOCUMENT_REFERENCE), Some("plans: [basic]"), false)
            .await
            .expect("summary should succeed");

        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(transport.summarized.lock().unwrap()[0], "plans: [basic]");
    }

    #[tokio::test]
    async fn fetched_document_is_memoized_under_its_url() {
        let transport = Arc::new(RecordingTransport::default());
        let fetcher = ScriptedFetcher::new("plans: [pro]");
        let cache = Arc::new(MemoryCache::new());
        let subject = workflow(transport.clone(), cache.clone(), fetcher.clone());

        for _ in 0..2 {
            subject
                .run_subscriptions("https://e.example/p.yml", None, Solver::Minizinc, false, None)
                .await
                .expect("subscriptions should succeed");
        }

        assert_eq!(fetcher.fetch_count(), 1, "second request must hit the cache");
        let submitted = transport.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[1].yaml_content, "plans: [pro]");
        assert_eq!(submitted[1].operation, "subscriptions");
    }

    #[tokio::test]
    async fn refresh_bypasses_and_overwrites_the_cached_document() {
        let transport = Arc::new(RecordingTransport::default());
        let fetcher = ScriptedFetcher::new("plans: [v2]");
        let cache = Arc::new(MemoryCache::new());
        cache
            .set("pricing-document:https://e.example/p.yml", "plans: [v1]".to_string(), Duration::from_secs(60))
            .await
            .expect("seed cache");
        let subject = workflow(transport.clone(), cache.clone(), fetcher.clone());

        subject
            .run_optimal(
                "https://e.example/p.yml",
                None,
                Solver::Minizinc,
                Objective::Minimize,
                true,
                None,
            )
            .await
            .expect("optimal should succeed");

        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(transport.submitted.lock().unwrap()[0].yaml_content, "plans: [v2]");
        assert_eq!(
            cache.get("pricing-document:https://e.example/p.yml").await.expect("cache read"),
            Some("plans: [v2]".to_string()),
            "refresh must replace the stale cache entry"
        );
    }

    #[tokio::test]
    async fn optimal_carries_objective_and_solver() {
        let transport = Arc::new(RecordingTransport::default());
        let fetcher = ScriptedFetcher::new("plans: [pro]");
        let subject = workflow(transport.clone(), Arc::new(MemoryCache::new()), fetcher);

        subject
            .run_optimal(
                "https://e.example/p.yml",
                None,
                Solver::Choco,
                Objective::Maximize,
                false,
                None,
            )
            .await
            .expect("optimal should succeed");

        let submitted = transport.submitted.lock().unwrap();
        assert_eq!(submitted[0].operation, "optimal");
        assert_eq!(submitted[0].solver, "choco");
        assert_eq!(submitted[0].objective.as_deref(), Some("maximize"));
    }

    #[tokio::test]
    async fn missing_context_is_rejected_before_analysis() {
        let transport = Arc::new(RecordingTransport::default());
        let fetcher = ScriptedFetcher::new("unused");
        let subject = workflow(transport.clone(), Arc::new(MemoryCache::new()), fetcher);

        let result = subject.run_summary(None, None, false).await;

        assert!(matches!(result, Err(WorkflowError::MissingContext(_))));
        assert!(transport.summarized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sentinel_reference_without_content_is_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        let fetcher = ScriptedFetcher::new("unused");
        let subject = workflow(transport, Arc::new(MemoryCache::new()), fetcher.clone());

        let result = subject.run_summary(Some(UPLOADED_DOCUMENT_REFERENCE), None, false).await;

        assert!(matches!(result, Err(WorkflowError::MissingContext(_))));
        assert_eq!(fetcher.fetch_count(), 0);
    }
}
