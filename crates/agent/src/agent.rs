//! The orchestration agent: turns a natural-language pricing question into
//! a validated plan, executes the plan's actions in order, and synthesizes
//! a final answer from the aggregated results.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use pricely_core::plan::{
    resolve_pricing_reference, ActionInputs, ActionName, Plan, PlannedAction,
};
use pricely_llm::{CompletionClient, LlmError};

use crate::prompts::{build_answer_prompt, build_plan_prompt, question_mentions_spec};
use crate::spec_excerpt::SpecExcerpt;
use crate::workflow::{PricingWorkflow, WorkflowError};

const FALLBACK_ANSWER: &str = "No answer could be generated.";

#[derive(Debug, Error)]
pub enum AgentError {
    /// Caller-correctable problem; surfaced with a human-readable message
    /// and never retried automatically.
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Generation(#[from] LlmError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("could not serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

/// Outcome of one handled question.
#[derive(Clone, Debug)]
pub struct AgentResponse {
    pub plan: Value,
    pub result: Value,
    pub answer: String,
}

/// Result of running one planned action.
#[derive(Clone, Debug)]
struct ExecutionStepRecord {
    index: usize,
    action: ActionName,
    objective: Option<&'static str>,
    url: Option<String>,
    payload: Value,
}

impl ExecutionStepRecord {
    fn to_value(&self) -> Value {
        let mut record = Map::new();
        record.insert("index".to_string(), json!(self.index));
        record.insert("action".to_string(), json!(self.action.as_str()));
        record.insert("payload".to_string(), self.payload.clone());
        if let Some(objective) = self.objective {
            record.insert("objective".to_string(), json!(objective));
        }
        if let Some(url) = &self.url {
            record.insert("url".to_string(), json!(url));
        }
        Value::Object(record)
    }
}

pub struct PricingAgent {
    llm: CompletionClient,
    workflow: Arc<dyn PricingWorkflow>,
    spec_excerpt: SpecExcerpt,
    max_attempts: u32,
}

impl PricingAgent {
    pub fn new(
        llm: CompletionClient,
        workflow: Arc<dyn PricingWorkflow>,
        spec_excerpt: SpecExcerpt,
        max_attempts: u32,
    ) -> Self {
        Self { llm, workflow, spec_excerpt, max_attempts }
    }

    pub async fn handle_question(
        &self,
        question: &str,
        pricing_url: Option<&str>,
        yaml_content: Option<&str>,
    ) -> Result<AgentResponse, AgentError> {
        let plan = self.generate_plan(question, pricing_url, yaml_content).await?;

        if plan.requires_uploaded_yaml && yaml_content.is_none() {
            return Err(AgentError::InvalidRequest(
                "The assistant needs a YAML pricing file to proceed. Please upload one and retry."
                    .to_string(),
            ));
        }

        let url = resolve_pricing_reference(
            plan.pricing_url.as_deref(),
            pricing_url,
            yaml_content.is_some(),
        );

        let steps = self.execute_actions(&plan, url.as_deref(), yaml_content).await?;
        let (payload_for_answer, result) = compose_results_payload(&plan.actions, &steps);
        let answer = self.generate_answer(question, &plan, &payload_for_answer).await?;

        Ok(AgentResponse { plan: serde_json::to_value(&plan)?, result, answer })
    }

    async fn generate_plan(
        &self,
        question: &str,
        pricing_url: Option<&str>,
        yaml_content: Option<&str>,
    ) -> Result<Plan, AgentError> {
        let spec_excerpt =
            if question_mentions_spec(question) { self.spec_excerpt.get() } else { None };
        let prompt = build_plan_prompt(question, pricing_url, yaml_content, spec_excerpt);

        let text = self.llm.complete(&prompt, self.max_attempts, true).await?;
        let raw: Value = serde_json::from_str(&text).map_err(|error| {
            warn!(raw = %text, error = %error, "planner response was not valid JSON");
            invalid_plan_error()
        })?;

        let plan = Plan::from_value(&raw).map_err(|error| {
            warn!(raw = %text, error = %error, "planner response was not a plan object");
            invalid_plan_error()
        })?;

        info!(
            actions = plan.actions.len(),
            refresh = plan.refresh,
            solver = plan.solver.as_str(),
            "plan generated"
        );
        Ok(plan)
    }

    async fn execute_actions(
        &self,
        plan: &Plan,
        url: Option<&str>,
        yaml_content: Option<&str>,
    ) -> Result<Vec<ExecutionStepRecord>, AgentError> {
        if plan.actions.is_empty() {
            return Ok(Vec::new());
        }

        ensure_pricing_context(&plan.actions, url, yaml_content)?;

        let mut steps = Vec::with_capacity(plan.actions.len());
        let mut refreshed_urls: HashSet<String> = HashSet::new();

        for (index, action) in plan.actions.iter().enumerate() {
            let inputs = ActionInputs::derive(action, url, plan.refresh, &refreshed_urls);
            let action_yaml = if inputs.forward_document { yaml_content } else { None };

            let payload = self.run_single_action(plan, action, &inputs, action_yaml).await?;

            if inputs.refresh {
                if let Some(action_url) = &inputs.url {
                    refreshed_urls.insert(action_url.clone());
                }
            }

            let objective = (action.name == ActionName::Optimal)
                .then(|| action.objective.unwrap_or(plan.objective).as_str());
            steps.push(ExecutionStepRecord {
                index,
                action: action.name,
                objective,
                url: inputs.url,
                payload,
            });
        }

        Ok(steps)
    }

    async fn run_single_action(
        &self,
        plan: &Plan,
        action: &PlannedAction,
        inputs: &ActionInputs,
        yaml_content: Option<&str>,
    ) -> Result<Value, AgentError> {
        let url = inputs.url.as_deref();
        let payload = match action.name {
            ActionName::Summary => {
                self.workflow.run_summary(url, yaml_content, inputs.refresh).await?
            }
            ActionName::Subscriptions => {
                self.workflow
                    .run_subscriptions(
                        url.unwrap_or(""),
                        plan.filters.as_ref(),
                        plan.solver,
                        inputs.refresh,
                        yaml_content,
                    )
                    .await?
            }
            ActionName::Optimal => {
                self.workflow
                    .run_optimal(
                        url.unwrap_or(""),
                        plan.filters.as_ref(),
                        plan.solver,
                        action.objective.unwrap_or(plan.objective),
                        inputs.refresh,
                        yaml_content,
                    )
                    .await?
            }
        };
        Ok(payload)
    }

    async fn generate_answer(
        &self,
        question: &str,
        plan: &Plan,
        payload: &Value,
    ) -> Result<String, AgentError> {
        let spec_excerpt = if plan.use_pricing2yaml_spec || question_mentions_spec(question) {
            self.spec_excerpt.get()
        } else {
            None
        };

        let plan_json = serde_json::to_string(plan)?;
        let payload_json = serde_json::to_string(payload)?;
        let prompt = build_answer_prompt(question, &plan_json, &payload_json, spec_excerpt);

        let answer = self.llm.complete(&prompt, self.max_attempts, false).await?;
        if answer.is_empty() {
            return Ok(FALLBACK_ANSWER.to_string());
        }
        Ok(answer)
    }
}

fn invalid_plan_error() -> AgentError {
    AgentError::InvalidRequest(
        "Failed to interpret assistant plan. Please rephrase your request.".to_string(),
    )
}

/// Every action needs pricing context before anything is dispatched: a
/// resolved reference or uploaded document content.
fn ensure_pricing_context(
    actions: &[PlannedAction],
    url: Option<&str>,
    yaml_content: Option<&str>,
) -> Result<(), AgentError> {
    for action in actions {
        let action_url = action.pricing_url.as_deref().or(url);
        if action_url.is_some() || yaml_content.is_some() {
            continue;
        }
        let message = match action.name {
            ActionName::Subscriptions | ActionName::Optimal => {
                "Running subscriptions or optimal analysis requires a pricing URL or an uploaded Pricing2Yaml file."
            }
            ActionName::Summary => {
                "A summary requires pricing context. Provide a pricing URL or Pricing2Yaml upload before running it."
            }
        };
        return Err(AgentError::InvalidRequest(message.to_string()));
    }
    Ok(())
}

/// Aggregates step records into the answer-context payload and the
/// caller-facing result. A single step unwraps to its raw payload; multiple
/// steps combine into {actions, steps, lastPayload}.
fn compose_results_payload(
    actions: &[PlannedAction],
    steps: &[ExecutionStepRecord],
) -> (Value, Value) {
    match steps {
        [] => {
            let empty = json!({"steps": []});
            (empty.clone(), empty)
        }
        [only] => (only.payload.clone(), only.payload.clone()),
        _ => {
            let combined = json!({
                "actions": actions.iter().map(|action| action.name.as_str()).collect::<Vec<_>>(),
                "steps": steps.iter().map(ExecutionStepRecord::to_value).collect::<Vec<_>>(),
                "lastPayload": steps.last().map(|step| step.payload.clone()).unwrap_or(Value::Null),
            });
            (combined.clone(), combined)
        }
    }
}
