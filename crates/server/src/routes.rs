//! HTTP surface of the service.
//!
//! Endpoints:
//! - `GET  /health` — liveness probe
//! - `POST /chat`   — answer a pricing question, running tools as needed

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use pricely_agent::{AgentError, PricingAgent};

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<PricingAgent>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub pricing_url: Option<String>,
    pub pricing_yaml: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub plan: Value,
    pub result: Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Error payload mirrored to the client as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, detail: detail.into() }
    }

    fn bad_gateway(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_GATEWAY, detail: detail.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

pub fn router(agent: Arc<PricingAgent>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .with_state(AppState { agent })
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub checked_at: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "UP", checked_at: chrono::Utc::now().to_rfc3339() })
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }

    let correlation_id = Uuid::new_v4();
    info!(
        event_name = "chat.request.received",
        correlation_id = %correlation_id,
        has_url = request.pricing_url.is_some(),
        has_yaml = request.pricing_yaml.is_some(),
        "chat request received"
    );

    let outcome = state
        .agent
        .handle_question(question, request.pricing_url.as_deref(), request.pricing_yaml.as_deref())
        .await;

    match outcome {
        Ok(response) => {
            info!(
                event_name = "chat.request.completed",
                correlation_id = %correlation_id,
                "chat request completed"
            );
            Ok(Json(ChatResponse {
                answer: response.answer,
                plan: response.plan,
                result: response.result,
            }))
        }
        Err(error) if error.is_client_error() => {
            info!(
                event_name = "chat.request.rejected",
                correlation_id = %correlation_id,
                detail = %error,
                "chat request rejected"
            );
            Err(ApiError::bad_request(error.to_string()))
        }
        Err(error) => {
            error!(
                event_name = "chat.request.failed",
                correlation_id = %correlation_id,
                error = %error,
                "chat request failed"
            );
            Err(ApiError::bad_gateway(error.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::Json;
    use serde_json::{json, Map, Value};

    use pricely_agent::workflow::{PricingWorkflow, WorkflowError};
    use pricely_agent::{PricingAgent, SpecExcerpt};
    use pricely_core::plan::{Objective, Solver};
    use pricely_llm::{CompletionBackend, CompletionChunk, CompletionClient, LlmError};

    use super::{chat, health, AppState, ChatRequest};

    struct ScriptedBackend {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn send(&self, _prompt: &str, _model: &str) -> Result<CompletionChunk, LlmError> {
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::MalformedResponse("script exhausted".to_string()))?;
            Ok(CompletionChunk { text, finish_reason: "stop".to_string() })
        }
    }

    struct StaticWorkflow;

    #[async_trait]
    impl PricingWorkflow for StaticWorkflow {
        async fn run_summary(
            &self,
            _url: Option<&str>,
            _yaml_content: Option<&str>,
            _refresh: bool,
        ) -> Result<Value, WorkflowError> {
            Ok(json!({"synopsis": "two plans"}))
        }

        async fn run_subscriptions(
            &self,
            _url: &str,
            _filters: Option<&Map<String, Value>>,
            _solver: Solver,
            _refresh: bool,
            _yaml_content: Option<&str>,
        ) -> Result<Value, WorkflowError> {
            Ok(json!({"cardinality": 4}))
        }

        async fn run_optimal(
            &self,
            _url: &str,
            _filters: Option<&Map<String, Value>>,
            _solver: Solver,
            _objective: Objective,
            _refresh: bool,
            _yaml_content: Option<&str>,
        ) -> Result<Value, WorkflowError> {
            Ok(json!({"plan": "pro"}))
        }
    }

    fn state(responses: Vec<&str>) -> State<AppState> {
        let client =
            CompletionClient::with_backend(ScriptedBackend::new(responses), "flash".to_string(), None);
        let agent =
            PricingAgent::new(client, Arc::new(StaticWorkflow), SpecExcerpt::default(), 2);
        State(AppState { agent: Arc::new(agent) })
    }

    fn request(question: &str) -> Json<ChatRequest> {
        Json(ChatRequest {
            question: question.to_string(),
            pricing_url: Some("https://e.example/p.yml".to_string()),
            pricing_yaml: None,
        })
    }

    #[tokio::test]
    async fn health_reports_up() {
        let Json(payload) = health().await;

        assert_eq!(payload.status, "UP");
    }

    #[tokio::test]
    async fn chat_returns_answer_plan_and_result() {
        let state = state(vec![r#"{"actions": ["summary"]}"#, "Two plans are offered."]);

        let Json(response) =
            chat(state, request("summarize")).await.expect("chat should succeed");

        assert_eq!(response.answer, "Two plans are offered.");
        assert_eq!(response.result, json!({"synopsis": "two plans"}));
        assert_eq!(response.plan["actions"], json!([{"name": "summary"}]));
    }

    #[tokio::test]
    async fn blank_question_is_rejected_with_400() {
        let state = state(vec![]);

        let error = chat(state, request("   ")).await.expect_err("blank question must fail");

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.detail, "question must not be empty");
    }

    #[tokio::test]
    async fn non_object_plan_is_a_client_error() {
        let state = state(vec![r#"["summary"]"#]);

        let error = chat(state, request("hello")).await.expect_err("bad plan must fail");

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert!(error.detail.contains("Failed to interpret assistant plan"));
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_502() {
        // Planner succeeds; the answer call exhausts the script and errors.
        let state = state(vec![r#"{"actions": []}"#]);

        let error = chat(state, request("hello")).await.expect_err("upstream failure must fail");

        assert_eq!(error.status, StatusCode::BAD_GATEWAY);
    }
}
