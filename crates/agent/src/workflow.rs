//! Interface the agent needs from the pricing workflow collaborator, which
//! owns document transformation and the analysis engine behind it.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use pricely_analysis::AnalysisError;
use pricely_core::cache::CacheError;
use pricely_core::plan::{Objective, Solver};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("pricing context unavailable: {0}")]
    MissingContext(String),
    #[error("pricing document fetch failed: {0}")]
    Fetch(String),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[async_trait]
pub trait PricingWorkflow: Send + Sync {
    async fn run_summary(
        &self,
        url: Option<&str>,
        yaml_content: Option<&str>,
        refresh: bool,
    ) -> Result<Value, WorkflowError>;

    async fn run_subscriptions(
        &self,
        url: &str,
        filters: Option<&Map<String, Value>>,
        solver: Solver,
        refresh: bool,
        yaml_content: Option<&str>,
    ) -> Result<Value, WorkflowError>;

    #[allow(clippy::too_many_arguments)]
    async fn run_optimal(
        &self,
        url: &str,
        filters: Option<&Map<String, Value>>,
        solver: Solver,
        objective: Objective,
        refresh: bool,
        yaml_content: Option<&str>,
    ) -> Result<Value, WorkflowError>;
}
