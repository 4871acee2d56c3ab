pub mod agent;
pub mod prompts;
pub mod spec_excerpt;
pub mod workflow;

pub use agent::{AgentError, AgentResponse, PricingAgent};
pub use spec_excerpt::SpecExcerpt;
pub use workflow::{PricingWorkflow, WorkflowError};
