//! Engine configuration
//!
//! All knobs have defaults suitable for local development against an Ollama
//! instance on localhost. `EngineConfig::from_env` overlays environment
//! variables on top of the defaults.

use std::net::SocketAddr;
use std::time::Duration;

/// Default step budget per persona
pub const DEFAULT_MAX_STEPS: usize = 8;

/// Error raised when an environment variable holds an unusable value
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {var}: {value:?} ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Configuration for the execution engine and its HTTP surface
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address the control surface listens on
    pub bind_addr: SocketAddr,
    /// Base URL of the Ollama-compatible model service
    pub llm_url: String,
    /// Model name passed to the model service
    pub model: String,
    /// Default step budget when a request does not specify one
    pub max_steps: usize,
    /// Upper bound on a single model call
    pub llm_timeout: Duration,
    /// Upper bound on a single target-API call
    pub http_timeout: Duration,
    /// Upper bound on report synthesis
    pub synthesis_timeout: Duration,
    /// Per-observer buffer before the oldest events are dropped
    pub observer_buffer: usize,
    /// How long a terminal session is kept for late observers
    pub session_retention: Duration,
    /// OTLP collector endpoint; tracing export is disabled when unset
    pub otlp_endpoint: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            llm_url: "http://localhost:11434".to_string(),
            model: "gemma3:12b".to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            llm_timeout: Duration::from_secs(60),
            http_timeout: Duration::from_secs(10),
            synthesis_timeout: Duration::from_secs(120),
            observer_buffer: 256,
            session_retention: Duration::from_secs(300),
            otlp_endpoint: None,
        }
    }
}

impl EngineConfig {
    /// Build a config from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup
    ///
    /// Split out from `from_env` so tests don't have to mutate the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("PERSONAFLOW_BIND") {
            config.bind_addr = parse_value("PERSONAFLOW_BIND", &v)?;
        }
        if let Some(v) = lookup("LLM_SERVICE_URL") {
            config.llm_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("PERSONAFLOW_MODEL") {
            config.model = v;
        }
        if let Some(v) = lookup("PERSONAFLOW_MAX_STEPS") {
            config.max_steps = parse_value("PERSONAFLOW_MAX_STEPS", &v)?;
            if config.max_steps == 0 {
                return Err(ConfigError {
                    var: "PERSONAFLOW_MAX_STEPS",
                    value: v,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if let Some(v) = lookup("PERSONAFLOW_LLM_TIMEOUT_SECS") {
            config.llm_timeout = parse_secs("PERSONAFLOW_LLM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PERSONAFLOW_HTTP_TIMEOUT_SECS") {
            config.http_timeout = parse_secs("PERSONAFLOW_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PERSONAFLOW_SYNTHESIS_TIMEOUT_SECS") {
            config.synthesis_timeout = parse_secs("PERSONAFLOW_SYNTHESIS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PERSONAFLOW_OBSERVER_BUFFER") {
            config.observer_buffer = parse_value("PERSONAFLOW_OBSERVER_BUFFER", &v)?;
            if config.observer_buffer == 0 {
                return Err(ConfigError {
                    var: "PERSONAFLOW_OBSERVER_BUFFER",
                    value: v,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if let Some(v) = lookup("PERSONAFLOW_SESSION_RETENTION_SECS") {
            config.session_retention = parse_secs("PERSONAFLOW_SESSION_RETENTION_SECS", &v)?;
        }
        config.otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.is_empty());

        Ok(config)
    }
}

fn parse_value<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_value(var, value)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError {
            var,
            value: value.to_string(),
            reason: "must be a positive number of seconds".to_string(),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_steps, 8);
        assert_eq!(config.model, "gemma3:12b");
        assert_eq!(config.llm_timeout, Duration::from_secs(60));
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("PERSONAFLOW_BIND", "127.0.0.1:9000"),
            ("LLM_SERVICE_URL", "http://gemma:11434/"),
            ("PERSONAFLOW_MAX_STEPS", "3"),
            ("PERSONAFLOW_HTTP_TIMEOUT_SECS", "0.5"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.llm_url, "http://gemma:11434");
        assert_eq!(config.max_steps, 3);
        assert_eq!(config.http_timeout, Duration::from_millis(500));
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4317"));
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = EngineConfig::from_lookup(lookup_from(&[("PERSONAFLOW_MAX_STEPS", "lots")]))
            .unwrap_err();
        assert_eq!(err.var, "PERSONAFLOW_MAX_STEPS");

        let err = EngineConfig::from_lookup(lookup_from(&[("PERSONAFLOW_MAX_STEPS", "0")]))
            .unwrap_err();
        assert_eq!(err.var, "PERSONAFLOW_MAX_STEPS");

        let err = EngineConfig::from_lookup(lookup_from(&[(
            "PERSONAFLOW_LLM_TIMEOUT_SECS",
            "-1",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("PERSONAFLOW_LLM_TIMEOUT_SECS"));
    }
}
