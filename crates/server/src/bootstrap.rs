use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use pricely_agent::{PricingAgent, SpecExcerpt};
use pricely_analysis::{AnalysisClient, AnalysisError};
use pricely_core::cache::{create_cache, Cache, CacheError};
use pricely_core::config::{AppConfig, ConfigError};
use pricely_llm::{CompletionClient, LlmError};

use crate::workflow::{AnalysisBackedWorkflow, HttpDocumentFetcher};

/// Wired service graph for one server process. The cache handle is kept
/// alongside the agent so shutdown can release backend connections.
pub struct ServiceContainer {
    pub config: AppConfig,
    pub cache: Arc<dyn Cache>,
    pub agent: Arc<PricingAgent>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cache backend initialization failed: {0}")]
    Cache(#[from] CacheError),
    #[error("analysis client initialization failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("completion client initialization failed: {0}")]
    Llm(#[from] LlmError),
    #[error("document fetcher initialization failed: {0}")]
    Fetcher(#[from] pricely_agent::WorkflowError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<ServiceContainer, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let cache = create_cache(&config.cache).await?;
    info!(
        event_name = "system.bootstrap.cache_ready",
        backend = ?config.cache.backend,
        ttl_secs = config.cache.ttl_secs,
        "cache backend initialized"
    );

    let analysis = AnalysisClient::from_config(&config.analysis)?;
    let fetcher = Arc::new(HttpDocumentFetcher::new(Duration::from_secs(
        config.analysis.timeout_secs,
    ))?);
    let workflow = Arc::new(AnalysisBackedWorkflow::new(
        analysis,
        cache.clone(),
        fetcher,
        Duration::from_secs(config.cache.ttl_secs),
    ));

    let llm = CompletionClient::from_config(&config.llm)?;
    let spec_excerpt = SpecExcerpt::load(&config.agent);
    let agent =
        Arc::new(PricingAgent::new(llm, workflow, spec_excerpt, config.llm.max_attempts));

    info!(
        event_name = "system.bootstrap.complete",
        model = %config.llm.model,
        analysis_base_url = %config.analysis.base_url,
        "service container wired"
    );

    Ok(ServiceContainer { config, cache, agent })
}

impl ServiceContainer {
    /// Releases backend connections. Must run on every exit path.
    pub async fn shutdown(&self) {
        if let Err(error) = self.cache.close().await {
            tracing::warn!(
                event_name = "system.shutdown.cache_close_failed",
                error = %error,
                "cache backend did not close cleanly"
            );
        }
    }
}
