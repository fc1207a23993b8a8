//! Simulator configuration.
//!
//! Every section is optional in a TOML file and falls back to its defaults.
//! API keys missing from the file are taken from the environment, so a
//! checked-in config never has to carry secrets.
//!
//! ```toml
//! [upstream]
//! base_url = "http://localhost:8000"
//!
//! [model]
//! model = "gpt-5-nano"
//!
//! [batch]
//! max_concurrent_sessions = 4
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tutorsim_analysis::{AnalysisConfig, ChatModelConfig};
use tutorsim_upstream::UpstreamConfig;

use crate::error::{Result, SimulatorError};

/// Batch scheduling limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Upper bound on simultaneously running sessions
    pub max_concurrent_sessions: usize,
    /// Turn budget when the simulation service does not grant one
    pub default_max_turns: u32,
    /// Upper bound on a single simulation turn
    pub turn_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 10,
            default_max_turns: 5,
            turn_timeout_secs: 30,
        }
    }
}

impl BatchConfig {
    /// Read `TUTORSIM_MAX_CONCURRENT`, `TUTORSIM_DEFAULT_MAX_TURNS` and
    /// `TUTORSIM_TURN_TIMEOUT_SECS`, ignoring unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_sessions: env_parse("TUTORSIM_MAX_CONCURRENT")
                .unwrap_or(defaults.max_concurrent_sessions),
            default_max_turns: env_parse("TUTORSIM_DEFAULT_MAX_TURNS")
                .unwrap_or(defaults.default_max_turns),
            turn_timeout_secs: env_parse("TUTORSIM_TURN_TIMEOUT_SECS")
                .unwrap_or(defaults.turn_timeout_secs),
        }
    }

    pub fn with_max_concurrent_sessions(mut self, max: usize) -> Self {
        self.max_concurrent_sessions = max;
        self
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs.max(1))
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(SimulatorError::Config(
                "batch.max_concurrent_sessions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Complete configuration for one simulator process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub upstream: UpstreamConfig,
    pub model: ChatModelConfig,
    pub analysis: AnalysisConfig,
    pub batch: BatchConfig,
}

impl SimulatorConfig {
    pub fn from_env() -> Self {
        Self {
            upstream: UpstreamConfig::from_env(),
            model: ChatModelConfig::from_env(),
            analysis: AnalysisConfig::default(),
            batch: BatchConfig::from_env(),
        }
    }

    /// Parse a TOML document. Missing API keys are filled from the environment.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: SimulatorConfig = toml::from_str(contents)?;
        config.fill_secrets_from_env();
        config.batch.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SimulatorError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
            .map_err(|e| SimulatorError::Config(format!("{}: {e}", path.display())))
    }

    fn fill_secrets_from_env(&mut self) {
        if self.upstream.api_key.is_none() {
            self.upstream.api_key = UpstreamConfig::from_env().api_key;
        }
        if self.model.api_key.is_none() {
            self.model.api_key = ChatModelConfig::from_env().api_key;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_defaults() {
        let batch = BatchConfig::default();
        assert_eq!(batch.max_concurrent_sessions, 10);
        assert_eq!(batch.default_max_turns, 5);
        assert_eq!(batch.turn_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SimulatorConfig::from_toml_str(
            r#"
            [upstream]
            base_url = "http://sim.local:8000"

            [batch]
            max_concurrent_sessions = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.upstream.base_url, "http://sim.local:8000");
        assert_eq!(config.batch.max_concurrent_sessions, 3);
        assert_eq!(config.batch.default_max_turns, 5);
        assert_eq!(config.model.model, "gpt-5-nano");
        assert_eq!(config.analysis.suggestion_temperature, 0.7);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config = SimulatorConfig::from_toml_str("").unwrap();
        assert_eq!(config.batch, BatchConfig::default());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = SimulatorConfig::from_toml_str("[batch]\nmax_concurrent_sessions = 0\n")
            .unwrap_err();
        assert!(matches!(err, SimulatorError::Config(_)));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = SimulatorConfig::from_toml_str("[batch\n").unwrap_err();
        assert!(matches!(err, SimulatorError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tutorsim.toml");
        std::fs::write(
            &path,
            "[model]\nmodel = \"gemma3\"\nbase_url = \"http://localhost:11434/v1\"\n\n[analysis]\ncall_timeout_secs = 12\n",
        )
        .unwrap();

        let config = SimulatorConfig::load(&path).unwrap();
        assert_eq!(config.model.model, "gemma3");
        assert_eq!(config.analysis.call_timeout_secs, 12);
        assert_eq!(config.analysis.analysis_temperature, 0.0);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = SimulatorConfig::load(Path::new("/nonexistent/tutorsim.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tutorsim.toml"));
    }
}
