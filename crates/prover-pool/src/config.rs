//! Coordinator configuration.

use std::time::Duration;

pub const ENV_CAPACITY: &str = "PROVER_POOL_CAPACITY";
pub const ENV_PROVERS: &str = "PROVER_POOL_PROVERS";
pub const ENV_BATCHES: &str = "PROVER_POOL_BATCHES";
pub const ENV_PROOF_DELAY_MS: &str = "PROVER_POOL_PROOF_DELAY_MS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{provers} provers do not fit in a pool of capacity {capacity}")]
    TooManyProvers { provers: usize, capacity: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Maximum number of proofs computed at once (pool capacity).
    pub max_server_proofs: usize,
    /// Provers seeded into the pool at startup.
    pub provers: usize,
    /// Batches to prove before exiting.
    pub batches: u64,
    /// Simulated proving time per batch.
    pub proof_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_server_proofs: 4,
            provers: 4,
            batches: 16,
            proof_delay: Duration::from_millis(250),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_server_proofs(mut self, n: usize) -> Self {
        self.max_server_proofs = n;
        self
    }

    pub fn with_provers(mut self, n: usize) -> Self {
        self.provers = n;
        self
    }

    pub fn with_batches(mut self, n: u64) -> Self {
        self.batches = n;
        self
    }

    pub fn with_proof_delay(mut self, delay: Duration) -> Self {
        self.proof_delay = delay;
        self
    }

    /// Defaults overridden by `PROVER_POOL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(n) = parse_var(&lookup, ENV_CAPACITY)? {
            config.max_server_proofs = n;
        }
        if let Some(n) = parse_var(&lookup, ENV_PROVERS)? {
            config.provers = n;
        }
        if let Some(n) = parse_var(&lookup, ENV_BATCHES)? {
            config.batches = n;
        }
        if let Some(ms) = parse_var(&lookup, ENV_PROOF_DELAY_MS)? {
            config.proof_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provers > self.max_server_proofs {
            return Err(ConfigError::TooManyProvers {
                provers: self.provers,
                capacity: self.max_server_proofs,
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { var, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = CoordinatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn env_overrides_defaults() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            (ENV_CAPACITY, "8"),
            (ENV_PROVERS, " 3 "),
            (ENV_BATCHES, "100"),
            (ENV_PROOF_DELAY_MS, "5"),
        ]))
        .unwrap();

        assert_eq!(
            config,
            CoordinatorConfig::new()
                .with_max_server_proofs(8)
                .with_provers(3)
                .with_batches(100)
                .with_proof_delay(Duration::from_millis(5))
        );
    }

    #[test]
    fn rejects_unparseable_value() {
        let err = CoordinatorConfig::from_lookup(lookup(&[(ENV_CAPACITY, "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: ENV_CAPACITY,
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn rejects_more_provers_than_capacity() {
        let err = CoordinatorConfig::from_lookup(lookup(&[(ENV_CAPACITY, "1"), (ENV_PROVERS, "2")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::TooManyProvers {
                provers: 2,
                capacity: 1
            }
        );
    }
}
