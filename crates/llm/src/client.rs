//! Completion client over an OpenAI-compatible chat endpoint, with the
//! escalate-then-continue retry ladder for truncated responses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use pricely_core::config::LlmConfig;

use crate::state::{FinishSignal, GenerationState};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("could not obtain a complete response from the model")]
    Exhausted,
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion response was malformed: {0}")]
    MalformedResponse(String),
}

/// One model response: the returned text plus the remote finish signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionChunk {
    pub text: String,
    pub finish_reason: String,
}

/// Seam for the remote model call, so the retry ladder can be exercised
/// against scripted responses.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn send(&self, prompt: &str, model: &str) -> Result<CompletionChunk, LlmError>;
}

/// Production backend: JSON POST to `{base_url}chat/completions` with
/// bearer auth and a bounded request timeout.
pub struct HttpCompletionBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    temperature: f32,
}

impl HttpCompletionBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let mut base_url = config.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn send(&self, prompt: &str, model: &str) -> Result<CompletionChunk, LlmError> {
        let url = format!("{}chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "reasoning_effort": "high",
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await?.error_for_status()?;
        let payload: ChatCompletionResponse = response.json().await?;
        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedResponse("response had no choices".to_string()))?;

        Ok(CompletionChunk {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_default(),
        })
    }
}

/// Issues a prompt to the model and keeps retrying until an acceptable
/// response is produced or the attempt budget runs out.
pub struct CompletionClient {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    better_model: Option<String>,
}

impl CompletionClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let backend = Arc::new(HttpCompletionBackend::new(config)?);
        Ok(Self::with_backend(backend, config.model.clone(), config.better_model.clone()))
    }

    pub fn with_backend(
        backend: Arc<dyn CompletionBackend>,
        model: String,
        better_model: Option<String>,
    ) -> Self {
        Self { backend, model, better_model }
    }

    /// Runs the attempt loop of the completion protocol. When `structured`
    /// is set, only a fully parseable JSON document is acceptable and the
    /// canonical re-serialization is returned.
    pub async fn complete(
        &self,
        prompt: &str,
        max_attempts: u32,
        structured: bool,
    ) -> Result<String, LlmError> {
        let mut state = GenerationState::new(prompt.to_string(), self.model.clone());

        for attempt in 1..=max_attempts {
            let chunk = self.backend.send(state.prompt(), state.model()).await?;
            let finish = FinishSignal::from_reason(&chunk.finish_reason);
            state = state.absorb(&chunk.text, finish);

            if let Some(result) = state.try_finalize(structured) {
                debug!(attempt, model = state.model(), "completion finalized");
                return Ok(result);
            }

            if attempt == max_attempts {
                break;
            }

            warn!(
                attempt,
                model = state.model(),
                escalated = state.escalated(),
                "completion attempt not final, preparing retry"
            );
            state = state.prepare_retry(prompt, self.better_model.as_deref());
        }

        warn!(max_attempts, "completion attempt budget exhausted");
        Err(LlmError::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{CompletionBackend, CompletionChunk, CompletionClient, LlmError};

    #[derive(Default)]
    struct ScriptedBackend {
        responses: Mutex<VecDeque<CompletionChunk>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<(&str, &str)>) -> Arc<Self> {
            let responses = responses
                .into_iter()
                .map(|(text, finish_reason)| CompletionChunk {
                    text: text.to_string(),
                    finish_reason: finish_reason.to_string(),
                })
                .collect();
            Arc::new(Self { responses: Mutex::new(responses), calls: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn send(&self, prompt: &str, model: &str) -> Result<CompletionChunk, LlmError> {
            self.calls.lock().unwrap().push((prompt.to_string(), model.to_string()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::MalformedResponse("script exhausted".to_string()))
        }
    }

    fn client(backend: Arc<ScriptedBackend>, better: Option<&str>) -> CompletionClient {
        CompletionClient::with_backend(backend, "flash".to_string(), better.map(str::to_string))
    }

    #[tokio::test]
    async fn valid_structured_output_returns_on_first_attempt() {
        let backend = ScriptedBackend::new(vec![("{\"actions\": []}", "stop")]);
        let client = client(backend.clone(), Some("pro"));

        let result = client.complete("plan it", 5, true).await.expect("should finalize");

        assert_eq!(result, "{\"actions\":[]}");
        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("plan it".to_string(), "flash".to_string()));
    }

    #[tokio::test]
    async fn fenced_structured_output_is_accepted() {
        let backend = ScriptedBackend::new(vec![("```json\n{\"refresh\": true}\n```", "stop")]);
        let client = client(backend, None);

        let result = client.complete("plan it", 5, true).await.expect("should finalize");

        assert_eq!(result, "{\"refresh\":true}");
    }

    #[tokio::test]
    async fn truncation_escalates_with_reset_buffer() {
        let backend = ScriptedBackend::new(vec![
            ("half an answ", "length"),
            ("a full answer", "stop"),
        ]);
        let client = client(backend.clone(), Some("pro"));

        let result = client.complete("ask", 5, false).await.expect("should finalize");

        assert_eq!(result, "a full answer");
        assert!(!result.contains("half an answ"), "escalation must drop attempt-1 partial text");
        let calls = backend.calls();
        assert_eq!(calls[1], ("ask".to_string(), "pro".to_string()));
    }

    #[tokio::test]
    async fn continuation_appends_after_escalation_is_spent() {
        let backend = ScriptedBackend::new(vec![
            ("first half, ", "length"),
            ("second half", "stop"),
        ]);
        let client = client(backend.clone(), None);

        let result = client.complete("ask", 5, false).await.expect("should finalize");

        assert_eq!(result, "first half,second half");
        let calls = backend.calls();
        assert_eq!(calls[1].1, "flash", "continuation keeps the same model");
        assert!(calls[1].0.contains("<partial_response>\nfirst half,\n</partial_response>"));
        assert!(calls[1].0.contains("<initial_prompt>\nask\n</initial_prompt>"));
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_without_extra_calls() {
        let backend = ScriptedBackend::new(vec![
            ("{\"broken\":", "length"),
            ("{\"broken\":", "length"),
            ("{\"broken\":", "length"),
            ("{\"never\": \"reached\"}", "stop"),
        ]);
        let client = client(backend.clone(), Some("pro"));

        let result = client.complete("plan it", 3, true).await;

        assert!(matches!(result, Err(LlmError::Exhausted)));
        assert_eq!(backend.calls().len(), 3, "no remote calls after the budget is spent");
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let backend = ScriptedBackend::new(vec![]);
        let client = client(backend, None);

        let result = client.complete("ask", 2, false).await;

        assert!(matches!(result, Err(LlmError::MalformedResponse(_))));
    }
}
