//! The per-call generation state machine: each remote attempt replaces the
//! state value instead of mutating call-site variables, so every transition
//! can be unit tested in isolation.

use serde_json::Value;

/// Finish signal reported by the remote model for one attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FinishSignal {
    /// The model stopped on its own (or no signal was reported).
    #[default]
    Natural,
    /// The response was cut off by the output size limit.
    Truncated,
}

impl FinishSignal {
    pub fn from_reason(reason: &str) -> Self {
        if reason == "length" {
            Self::Truncated
        } else {
            Self::Natural
        }
    }
}

/// State carried between attempts of one top-level completion call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationState {
    prompt: String,
    model: String,
    accumulated: String,
    finish: FinishSignal,
    escalated: bool,
}

impl GenerationState {
    pub fn new(prompt: String, model: String) -> Self {
        Self {
            prompt,
            model,
            accumulated: String::new(),
            finish: FinishSignal::default(),
            escalated: false,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn escalated(&self) -> bool {
        self.escalated
    }

    /// Folds one attempt's response into the state. Continuation responses
    /// are concatenations, not replacements.
    pub fn absorb(self, response_text: &str, finish: FinishSignal) -> Self {
        let cleaned = strip_code_fence(response_text);
        let accumulated = format!("{}{}", self.accumulated, cleaned);
        Self { accumulated, finish, ..self }
    }

    /// Returns the final response text when the accumulated buffer is
    /// acceptable: parseable JSON (canonically re-serialized) when
    /// structured output is required, otherwise any non-truncated response.
    pub fn try_finalize(&self, structured: bool) -> Option<String> {
        if structured {
            let parsed: Value = serde_json::from_str(&self.accumulated).ok()?;
            return serde_json::to_string(&parsed).ok();
        }

        match self.finish {
            FinishSignal::Natural => Some(self.accumulated.clone()),
            FinishSignal::Truncated => None,
        }
    }

    /// Prepares the next attempt. A distinct higher-capability model is
    /// tried once per call, restarting from the original prompt with an
    /// empty buffer; afterwards the same model is asked to resume exactly
    /// where the truncated output stopped.
    pub fn prepare_retry(self, initial_prompt: &str, better_model: Option<&str>) -> Self {
        if let Some(better) = better_model {
            if !self.escalated && better != self.model {
                return Self {
                    prompt: initial_prompt.to_string(),
                    model: better.to_string(),
                    accumulated: String::new(),
                    finish: FinishSignal::default(),
                    escalated: true,
                };
            }
        }

        let prompt = build_continue_prompt(initial_prompt, &self.accumulated);
        Self { prompt, finish: FinishSignal::default(), ..self }
    }
}

/// Strips a wrapping fenced code block, keeping interior content. The
/// opening fence line may carry a language tag.
fn strip_code_fence(response: &str) -> String {
    let stripped = response.trim();
    if stripped.starts_with("```") && stripped.ends_with("```") {
        let lines: Vec<&str> = stripped.lines().collect();
        if lines.len() >= 2 {
            return lines[1..lines.len() - 1].join("\n").trim().to_string();
        }
    }
    stripped.to_string()
}

fn build_continue_prompt(initial_prompt: &str, accumulated: &str) -> String {
    format!(
        "The previous response was truncated. Resume exactly where it stopped.\n\
         <initial_prompt>\n{initial_prompt}\n</initial_prompt>\n\
         <partial_response>\n{accumulated}\n</partial_response>"
    )
}

#[cfg(test)]
mod tests {
    use super::{strip_code_fence, FinishSignal, GenerationState};

    #[test]
    fn fenced_block_is_unwrapped() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\nplain\n```"), "plain");
        assert_eq!(strip_code_fence("no fence"), "no fence");
    }

    #[test]
    fn absorb_concatenates_responses() {
        let state = GenerationState::new("prompt".into(), "flash".into())
            .absorb("{\"partial\":", FinishSignal::Truncated)
            .absorb(" true}", FinishSignal::Natural);

        assert_eq!(state.accumulated(), "{\"partial\": true}");
    }

    #[test]
    fn structured_finalize_reserializes_canonically() {
        let state = GenerationState::new("prompt".into(), "flash".into())
            .absorb("```json\n{ \"actions\" : [] }\n```", FinishSignal::Natural);

        assert_eq!(state.try_finalize(true).as_deref(), Some("{\"actions\":[]}"));
    }

    #[test]
    fn structured_finalize_rejects_partial_json() {
        let state = GenerationState::new("prompt".into(), "flash".into())
            .absorb("{\"actions\": [", FinishSignal::Truncated);

        assert_eq!(state.try_finalize(true), None);
    }

    #[test]
    fn unstructured_finalize_requires_natural_stop() {
        let truncated = GenerationState::new("prompt".into(), "flash".into())
            .absorb("partial answer", FinishSignal::Truncated);
        assert_eq!(truncated.try_finalize(false), None);

        let complete = GenerationState::new("prompt".into(), "flash".into())
            .absorb("full answer", FinishSignal::Natural);
        assert_eq!(complete.try_finalize(false).as_deref(), Some("full answer"));
    }

    #[test]
    fn escalation_resets_buffer_and_restarts_from_original_prompt() {
        let state = GenerationState::new("original".into(), "flash".into())
            .absorb("partial", FinishSignal::Truncated)
            .prepare_retry("original", Some("pro"));

        assert_eq!(state.model(), "pro");
        assert_eq!(state.prompt(), "original");
        assert_eq!(state.accumulated(), "");
        assert!(state.escalated());
    }

    #[test]
    fn escalation_happens_at_most_once() {
        let state = GenerationState::new("original".into(), "flash".into())
            .absorb("partial one", FinishSignal::Truncated)
            .prepare_retry("original", Some("pro"))
            .absorb("partial two", FinishSignal::Truncated)
            .prepare_retry("original", Some("pro"));

        assert_eq!(state.model(), "pro");
        assert_eq!(state.accumulated(), "partial two");
        assert!(state.prompt().contains("<partial_response>\npartial two\n</partial_response>"));
    }

    #[test]
    fn same_better_model_skips_escalation() {
        let state = GenerationState::new("original".into(), "flash".into())
            .absorb("partial", FinishSignal::Truncated)
            .prepare_retry("original", Some("flash"));

        assert_eq!(state.model(), "flash");
        assert_eq!(state.accumulated(), "partial");
        assert!(!state.escalated());
        assert!(state.prompt().contains("<initial_prompt>\noriginal\n</initial_prompt>"));
    }

    #[test]
    fn continuation_keeps_model_and_buffer_without_better_model() {
        let state = GenerationState::new("original".into(), "flash".into())
            .absorb("partial", FinishSignal::Truncated)
            .prepare_retry("original", None);

        assert_eq!(state.model(), "flash");
        assert_eq!(state.accumulated(), "partial");
        assert!(state.prompt().starts_with("The previous response was truncated."));
    }
}
