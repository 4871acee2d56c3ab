pub mod cache;
pub mod config;
pub mod plan;

pub use cache::{create_cache, Cache, CacheError, MemoryCache, RedisCache};
pub use config::{
    AgentConfig, AnalysisConfig, AppConfig, CacheBackend, CacheConfig, ConfigError, LlmConfig,
    LoadOptions, LogFormat, LoggingConfig, ServerConfig,
};
pub use plan::{
    resolve_pricing_reference, ActionInputs, ActionName, Objective, Plan, PlanError,
    PlannedAction, Solver, UPLOADED_DOCUMENT_REFERENCE,
};
