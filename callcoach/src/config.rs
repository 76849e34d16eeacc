use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::RoleVariant;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: Option<LlmConfig>,
    pub analysis: AnalysisConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub local_path: Option<String>,
    pub busy_timeout_ms: u64,
    pub journal_mode: String,
    pub synchronous: String,
}

impl DatabaseConfig {
    /// Local file database with default pragmas.
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            url: path.into(),
            auth_token: None,
            local_path: None,
            busy_timeout_ms: 5000,
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
        }
    }
}

/// LLM configuration for the inference API
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// How to pick a rubric role when the primary internal speaker has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleFallbackPolicy {
    /// Most common evaluated role on the speaker's team, then `default_role`.
    TeamMajority,
    /// Always `default_role`.
    Fixed,
}

impl std::str::FromStr for RoleFallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "team_majority" | "team" => Ok(Self::TeamMajority),
            "fixed" => Ok(Self::Fixed),
            _ => Err(format!("Unknown role fallback policy: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Global ceiling on concurrent upstream inference calls.
    pub max_concurrency: usize,
    pub chunk_max_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub call_deadline_secs: u64,
    pub upstream_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub evidence_dedup_granularity_secs: f64,
    pub role_fallback: RoleFallbackPolicy,
    pub default_role: RoleVariant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_days: i64,
    /// How long terminal failures are remembered in-process.
    pub negative_ttl_secs: u64,
    pub memory_capacity: usize,
    pub purge_interval_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            chunk_max_tokens: 6000,
            chunk_overlap_tokens: 1200,
            call_deadline_secs: 300,
            upstream_timeout_secs: 60,
            retry_max_attempts: 4,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            evidence_dedup_granularity_secs: 5.0,
            role_fallback: RoleFallbackPolicy::TeamMajority,
            default_role: RoleVariant::Ae,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            negative_ttl_secs: 60,
            memory_capacity: 1024,
            purge_interval_secs: 3600,
        }
    }
}

impl AnalysisConfig {
    pub fn call_deadline(&self) -> Duration {
        Duration::from_secs(self.call_deadline_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.ttl_days)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        let analysis_defaults = AnalysisConfig::default();
        let cache_defaults = CacheConfig::default();

        Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "file:callcoach.db".to_string()),
                auth_token: env::var("DATABASE_AUTH_TOKEN").ok(),
                local_path: env::var("DATABASE_LOCAL_PATH").ok(),
                busy_timeout_ms: parse_env_or("DATABASE_BUSY_TIMEOUT_MS", 5000),
                journal_mode: env::var("DATABASE_JOURNAL_MODE").unwrap_or_else(|_| "WAL".to_string()),
                synchronous: env::var("DATABASE_SYNCHRONOUS")
                    .unwrap_or_else(|_| "NORMAL".to_string()),
            },
            llm: env::var("LLM_MODEL").ok().map(|model| LlmConfig {
                model,
                api_key: env::var("LLM_API_KEY").ok(),
                base_url: env::var("LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 60),
                temperature: env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok()),
                max_tokens: env::var("LLM_MAX_TOKENS").ok().and_then(|v| v.parse().ok()),
            }),
            analysis: AnalysisConfig {
                max_concurrency: parse_env_or(
                    "ANALYSIS_MAX_CONCURRENCY",
                    analysis_defaults.max_concurrency,
                )
                .max(1),
                chunk_max_tokens: parse_env_or(
                    "CHUNK_MAX_TOKENS",
                    analysis_defaults.chunk_max_tokens,
                ),
                chunk_overlap_tokens: parse_env_or(
                    "CHUNK_OVERLAP_TOKENS",
                    analysis_defaults.chunk_overlap_tokens,
                ),
                call_deadline_secs: parse_env_or(
                    "CALL_DEADLINE_SECS",
                    analysis_defaults.call_deadline_secs,
                ),
                upstream_timeout_secs: parse_env_or(
                    "UPSTREAM_TIMEOUT_SECS",
                    analysis_defaults.upstream_timeout_secs,
                ),
                retry_max_attempts: parse_env_or(
                    "RETRY_MAX_ATTEMPTS",
                    analysis_defaults.retry_max_attempts,
                )
                .max(1),
                retry_base_delay_ms: parse_env_or(
                    "RETRY_BASE_DELAY_MS",
                    analysis_defaults.retry_base_delay_ms,
                ),
                retry_max_delay_ms: parse_env_or(
                    "RETRY_MAX_DELAY_MS",
                    analysis_defaults.retry_max_delay_ms,
                ),
                evidence_dedup_granularity_secs: parse_env_or(
                    "EVIDENCE_DEDUP_GRANULARITY_SECS",
                    analysis_defaults.evidence_dedup_granularity_secs,
                ),
                role_fallback: parse_env_or("ROLE_FALLBACK", analysis_defaults.role_fallback),
                default_role: parse_env_or("DEFAULT_ROLE", analysis_defaults.default_role),
            },
            cache: CacheConfig {
                ttl_days: parse_env_or("CACHE_TTL_DAYS", cache_defaults.ttl_days),
                negative_ttl_secs: parse_env_or(
                    "CACHE_NEGATIVE_TTL_SECS",
                    cache_defaults.negative_ttl_secs,
                ),
                memory_capacity: parse_env_or(
                    "CACHE_MEMORY_CAPACITY",
                    cache_defaults.memory_capacity,
                )
                .max(1),
                purge_interval_secs: parse_env_or(
                    "CACHE_PURGE_INTERVAL_SECS",
                    cache_defaults.purge_interval_secs,
                ),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known LLM providers that use OpenAI-compatible APIs
pub const KNOWN_LLM_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Parse an LLM model name into (provider, model) tuple.
pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_LLM_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    // Default to treating the whole string as a local model
    ("local", model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_analysis_config_defaults() {
        for var in [
            "ANALYSIS_MAX_CONCURRENCY",
            "CHUNK_MAX_TOKENS",
            "RETRY_MAX_ATTEMPTS",
            "ROLE_FALLBACK",
            "DEFAULT_ROLE",
        ] {
            std::env::remove_var(var);
        }

        let config = Config::default();
        assert_eq!(config.analysis.max_concurrency, 4);
        assert_eq!(config.analysis.chunk_max_tokens, 6000);
        assert_eq!(config.analysis.retry_max_attempts, 4);
        assert_eq!(config.analysis.role_fallback, RoleFallbackPolicy::TeamMajority);
        assert_eq!(config.analysis.default_role, RoleVariant::Ae);
        assert_eq!(config.cache.ttl_days, 30);
    }

    #[test]
    #[serial]
    fn test_analysis_config_from_env() {
        std::env::set_var("ANALYSIS_MAX_CONCURRENCY", "8");
        std::env::set_var("ROLE_FALLBACK", "fixed");
        std::env::set_var("DEFAULT_ROLE", "csm");

        let config = Config::default();
        assert_eq!(config.analysis.max_concurrency, 8);
        assert_eq!(config.analysis.role_fallback, RoleFallbackPolicy::Fixed);
        assert_eq!(config.analysis.default_role, RoleVariant::Csm);

        std::env::remove_var("ANALYSIS_MAX_CONCURRENCY");
        std::env::remove_var("ROLE_FALLBACK");
        std::env::remove_var("DEFAULT_ROLE");
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back_to_defaults() {
        std::env::set_var("ANALYSIS_MAX_CONCURRENCY", "lots");
        std::env::set_var("DEFAULT_ROLE", "wizard");

        let config = Config::default();
        assert_eq!(config.analysis.max_concurrency, 4);
        assert_eq!(config.analysis.default_role, RoleVariant::Ae);

        std::env::remove_var("ANALYSIS_MAX_CONCURRENCY");
        std::env::remove_var("DEFAULT_ROLE");
    }

    #[test]
    fn test_parse_llm_provider_model() {
        assert_eq!(parse_llm_provider_model("openai/gpt-4o"), ("openai", "gpt-4o"));
        assert_eq!(
            parse_llm_provider_model("openrouter/anthropic/claude"),
            ("openrouter", "anthropic/claude")
        );
        assert_eq!(parse_llm_provider_model("llama3"), ("local", "llama3"));
    }
}
