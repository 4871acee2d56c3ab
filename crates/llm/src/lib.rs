//! Language-model completion client: prompt dispatch, truncated-response
//! continuation, and one-shot model escalation behind a bounded attempt
//! budget.

pub mod client;
pub mod state;

pub use client::{
    CompletionBackend, CompletionChunk, CompletionClient, HttpCompletionBackend, LlmError,
};
pub use state::{FinishSignal, GenerationState};
