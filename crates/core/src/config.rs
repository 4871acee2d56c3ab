use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LLM_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
    pub cache: CacheConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    /// Higher-capability model tried once per completion call before
    /// falling back to continuation prompts.
    pub better_model: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    pub ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Path to the Pricing2Yaml specification markdown consulted for
    /// schema/syntax questions. A missing file degrades to an empty excerpt.
    pub spec_excerpt_path: Option<PathBuf>,
    pub spec_excerpt_max_chars: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                api_key: None,
                base_url: DEFAULT_LLM_BASE_URL.to_string(),
                model: "gemini-2.5-flash".to_string(),
                better_model: Some("gemini-2.5-pro".to_string()),
                temperature: 0.7,
                timeout_secs: 60,
                max_attempts: 5,
            },
            analysis: AnalysisConfig {
                base_url: "http://localhost:8081".to_string(),
                api_key: None,
                timeout_secs: 60,
                poll_interval_secs: 2,
                max_wait_secs: 120,
            },
            cache: CacheConfig { backend: CacheBackend::Memory, redis_url: None, ttl_secs: 3600 },
            agent: AgentConfig { spec_excerpt_path: None, spec_excerpt_max_chars: 6000 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::Validation(format!(
                "unsupported cache backend `{other}` (expected memory|redis)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("pricely.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(better_model) = llm.better_model {
                self.llm.better_model = Some(better_model);
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_attempts) = llm.max_attempts {
                self.llm.max_attempts = max_attempts;
            }
        }

        if let Some(analysis) = patch.analysis {
            if let Some(base_url) = analysis.base_url {
                self.analysis.base_url = base_url;
            }
            if let Some(api_key) = analysis.api_key {
                self.analysis.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = analysis.timeout_secs {
                self.analysis.timeout_secs = timeout_secs;
            }
            if let Some(poll_interval_secs) = analysis.poll_interval_secs {
                self.analysis.poll_interval_secs = poll_interval_secs;
            }
            if let Some(max_wait_secs) = analysis.max_wait_secs {
                self.analysis.max_wait_secs = max_wait_secs;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(backend) = cache.backend {
                self.cache.backend = backend;
            }
            if let Some(redis_url) = cache.redis_url {
                self.cache.redis_url = Some(redis_url);
            }
            if let Some(ttl_secs) = cache.ttl_secs {
                self.cache.ttl_secs = ttl_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(spec_excerpt_path) = agent.spec_excerpt_path {
                self.agent.spec_excerpt_path = Some(PathBuf::from(spec_excerpt_path));
            }
            if let Some(spec_excerpt_max_chars) = agent.spec_excerpt_max_chars {
                self.agent.spec_excerpt_max_chars = spec_excerpt_max_chars;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PRICELY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PRICELY_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("PRICELY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PRICELY_LLM_BETTER_MODEL") {
            self.llm.better_model = Some(value);
        }
        if let Some(value) = read_env("PRICELY_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("PRICELY_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("PRICELY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PRICELY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PRICELY_LLM_MAX_ATTEMPTS") {
            self.llm.max_attempts = parse_u32("PRICELY_LLM_MAX_ATTEMPTS", &value)?;
        }

        if let Some(value) = read_env("PRICELY_ANALYSIS_BASE_URL") {
            self.analysis.base_url = value;
        }
        if let Some(value) = read_env("PRICELY_ANALYSIS_API_KEY") {
            self.analysis.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PRICELY_ANALYSIS_TIMEOUT_SECS") {
            self.analysis.timeout_secs = parse_u64("PRICELY_ANALYSIS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PRICELY_ANALYSIS_POLL_INTERVAL_SECS") {
            self.analysis.poll_interval_secs =
                parse_u64("PRICELY_ANALYSIS_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("PRICELY_ANALYSIS_MAX_WAIT_SECS") {
            self.analysis.max_wait_secs = parse_u64("PRICELY_ANALYSIS_MAX_WAIT_SECS", &value)?;
        }

        if let Some(value) = read_env("PRICELY_CACHE_BACKEND") {
            self.cache.backend = value.parse()?;
        }
        if let Some(value) = read_env("PRICELY_CACHE_REDIS_URL") {
            self.cache.redis_url = Some(value);
        }
        if let Some(value) = read_env("PRICELY_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_u64("PRICELY_CACHE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("PRICELY_AGENT_SPEC_EXCERPT_PATH") {
            self.agent.spec_excerpt_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("PRICELY_AGENT_SPEC_EXCERPT_MAX_CHARS") {
            self.agent.spec_excerpt_max_chars =
                parse_usize("PRICELY_AGENT_SPEC_EXCERPT_MAX_CHARS", &value)?;
        }

        if let Some(value) = read_env("PRICELY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PRICELY_SERVER_PORT") {
            self.server.port = parse_u16("PRICELY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PRICELY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PRICELY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("PRICELY_LOGGING_LEVEL").or_else(|| read_env("PRICELY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PRICELY_LOGGING_FORMAT").or_else(|| read_env("PRICELY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_analysis(&self.analysis)?;
        validate_cache(&self.cache)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("pricely.toml"), PathBuf::from("config/pricely.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    toml::from_str::<ConfigPatch>(&raw)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.base_url.trim().is_empty() {
        return Err(ConfigError::Validation("llm.base_url must not be empty".to_string()));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if llm.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "llm.max_attempts must be greater than zero".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_analysis(analysis: &AnalysisConfig) -> Result<(), ConfigError> {
    if analysis.base_url.trim().is_empty() {
        return Err(ConfigError::Validation("analysis.base_url must not be empty".to_string()));
    }
    if analysis.timeout_secs == 0 || analysis.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "analysis.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if analysis.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "analysis.poll_interval_secs must be greater than zero".to_string(),
        ));
    }
    if analysis.max_wait_secs < analysis.poll_interval_secs {
        return Err(ConfigError::Validation(
            "analysis.max_wait_secs must be at least analysis.poll_interval_secs".to_string(),
        ));
    }
    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.backend == CacheBackend::Redis {
        let has_url = cache.redis_url.as_deref().is_some_and(|url| !url.trim().is_empty());
        if !has_url {
            return Err(ConfigError::Validation(
                "cache.redis_url is required when cache.backend is `redis`".to_string(),
            ));
        }
    }
    if cache.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "cache.ttl_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    const KNOWN_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    let level = logging.level.trim().to_ascii_lowercase();
    if !KNOWN_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::Validation(format!(
            "logging.level must be one of trace|debug|info|warn|error, got `{}`",
            logging.level
        )));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    analysis: Option<AnalysisPatch>,
    cache: Option<CachePatch>,
    agent: Option<AgentPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    better_model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    max_wait_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    backend: Option<CacheBackend>,
    redis_url: Option<String>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    spec_excerpt_path: Option<String>,
    spec_excerpt_max_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
