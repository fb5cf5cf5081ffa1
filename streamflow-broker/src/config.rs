//! Broker configuration: a YAML file, then `STREAMFLOW_*` overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use streamflow_core::EngineConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "STREAMFLOW_CONFIG";

const ENV_PREFIX: &str = "STREAMFLOW_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BrokerConfig {
    pub engine: EngineConfig,
    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    pub log_filter: String,
    pub verbose: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            log_filter: "info".to_string(),
            verbose: false,
        }
    }
}

impl BrokerConfig {
    /// Reads the file named by `STREAMFLOW_CONFIG` (defaults without one)
    /// and applies the process environment on top.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
        Self::from_yaml(&content).with_context(|| format!("parsing config file {path}"))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(setting) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let engine = &mut self.engine;
            match setting {
                "PARTITION_COUNT" => engine.partition_count = parse(&name, &value)?,
                "DEPLOYMENT_PARTITION" => engine.deployment_partition = parse(&name, &value)?,
                "MAX_BATCH_SIZE_BYTES" => engine.max_batch_size_bytes = parse(&name, &value)?,
                "MAX_JOB_BATCH_BYTES" => engine.max_job_batch_bytes = parse(&name, &value)?,
                "MULTI_TENANCY_ENABLED" => engine.multi_tenancy_enabled = parse(&name, &value)?,
                "AUTHORIZATIONS_ENABLED" => engine.authorizations_enabled = parse(&name, &value)?,
                "SCHEDULER_INTERVAL_MS" => engine.scheduler_interval_ms = parse(&name, &value)?,
                "STORAGE_RETRY_ATTEMPTS" => engine.storage_retry_attempts = parse(&name, &value)?,
                "STORAGE_RETRY_BACKOFF_MS" => engine.storage_retry_backoff_ms = parse(&name, &value)?,
                "REQUEST_QUEUE_CAPACITY" => engine.request_queue_capacity = parse(&name, &value)?,
                "LOG_FILTER" => self.log_filter = value,
                "VERBOSE" => self.verbose = parse(&name, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        anyhow::ensure!(engine.partition_count > 0, "partition_count must be at least 1");
        anyhow::ensure!(
            (1..=engine.partition_count).contains(&engine.deployment_partition),
            "deployment_partition {} is not one of the {} partitions",
            engine.deployment_partition,
            engine.partition_count
        );
        anyhow::ensure!(engine.scheduler_interval_ms > 0, "scheduler_interval_ms must be positive");
        Ok(())
    }

    /// Filter applied when `RUST_LOG` is absent.
    pub fn default_filter(&self) -> String {
        if self.verbose {
            "info,streamflow_core=debug,streamflow_broker=debug".to_string()
        } else {
            self.log_filter.clone()
        }
    }
}

fn parse<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value '{value}' for {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = BrokerConfig::from_yaml(
            r#"
engine:
  partition_count: 3
  multi_tenancy_enabled: true
log_filter: warn
"#,
        )
        .unwrap();
        assert_eq!(config.engine.partition_count, 3);
        assert!(config.engine.multi_tenancy_enabled);
        assert_eq!(config.engine.deployment_partition, 1);
        assert_eq!(config.log_filter, "warn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_the_file() {
        let mut config = BrokerConfig::from_yaml("engine:\n  partition_count: 3\n").unwrap();
        config
            .apply_env(vars(&[
                ("STREAMFLOW_PARTITION_COUNT", "5"),
                ("STREAMFLOW_AUTHORIZATIONS_ENABLED", "true"),
                ("STREAMFLOW_VERBOSE", "true"),
                ("HOME", "/root"),
            ]))
            .unwrap();
        assert_eq!(config.engine.partition_count, 5);
        assert!(config.engine.authorizations_enabled);
        assert!(config.default_filter().contains("streamflow_core=debug"));
    }

    #[test]
    fn malformed_override_names_the_variable() {
        let mut config = BrokerConfig::default();
        let err = config
            .apply_env(vars(&[("STREAMFLOW_SCHEDULER_INTERVAL_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("STREAMFLOW_SCHEDULER_INTERVAL_MS"));
    }

    #[test]
    fn deployment_partition_must_exist() {
        let mut config = BrokerConfig::default();
        config.engine.partition_count = 2;
        config.engine.deployment_partition = 3;
        assert!(config.validate().is_err());
    }
}
