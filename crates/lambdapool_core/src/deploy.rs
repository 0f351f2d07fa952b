//! Deployment collaborator contract and configuration bounds.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, FixedOffset};

use crate::error::{ConfigError, DeployError};

pub const MIN_MEMORY_MB: u32 = 128;
pub const MAX_MEMORY_MB: u32 = 10_240;
pub const MEMORY_GRANULARITY_MB: u32 = 64;
pub const MAX_TIMEOUT_SECS: u32 = 900;

/// Marker written into the environment of every function this tool creates.
pub const CREATOR: &str = "lambdapool";
pub const ENV_CREATOR: &str = "CREATOR";
pub const ENV_FUNCTION_NAME: &str = "FUNCTION_NAME";
pub const ENV_VERSION: &str = "LAMBDAPOOL_VERSION";

/// Optional sizing for a deployed function. Unset fields keep the host defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionConfig {
    pub memory_mb: Option<u32>,
    pub timeout_secs: Option<u32>,
    pub layers: Vec<String>,
}

impl FunctionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(memory) = self.memory_mb {
            if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&memory)
                || memory % MEMORY_GRANULARITY_MB != 0
            {
                return Err(ConfigError::InvalidMemory {
                    value: memory,
                    min: MIN_MEMORY_MB,
                    max: MAX_MEMORY_MB,
                    granularity: MEMORY_GRANULARITY_MB,
                });
            }
        }

        if let Some(timeout) = self.timeout_secs {
            if timeout == 0 || timeout > MAX_TIMEOUT_SECS {
                return Err(ConfigError::InvalidTimeout {
                    value: timeout,
                    max: MAX_TIMEOUT_SECS,
                });
            }
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.memory_mb.is_none() && self.timeout_secs.is_none() && self.layers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSummary {
    pub name: String,
    pub size_bytes: u64,
    pub last_updated: Option<DateTime<FixedOffset>>,
    pub memory_mb: Option<u32>,
    pub timeout_secs: Option<u32>,
}

/// Lifecycle operations for the deployed function the client addresses.
pub trait Deployer {
    fn exists(&self, name: &str) -> Result<bool, DeployError>;
    fn create(&self, name: &str, bundle: &[u8], config: &FunctionConfig)
        -> Result<(), DeployError>;
    fn update(&self, name: &str, bundle: &[u8], config: &FunctionConfig)
        -> Result<(), DeployError>;
    fn delete(&self, name: &str) -> Result<(), DeployError>;
    fn list(&self) -> Result<Vec<FunctionSummary>, DeployError>;
}

/// Environment stamped on a created function.
pub fn function_environment(name: &str, version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ENV_CREATOR.to_string(), CREATOR.to_string()),
        (ENV_FUNCTION_NAME.to_string(), name.to_string()),
        (ENV_VERSION.to_string(), version.to_string()),
    ])
}

pub fn is_lambdapool_function(environment: &HashMap<String, String>) -> bool {
    environment.get(ENV_CREATOR).map(String::as_str) == Some(CREATOR)
}

/// Parses the host's `LastModified` stamp, e.g. `2019-01-10T12:00:00.000+0000`.
pub fn parse_last_modified(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn accepts_memory_on_granularity_within_bounds() {
        for memory in [128, 192, 1024, 10_240] {
            let config = FunctionConfig {
                memory_mb: Some(memory),
                ..FunctionConfig::default()
            };
            assert_eq!(config.validate(), Ok(()), "{memory} MB should pass");
        }
    }

    #[test]
    fn rejects_memory_off_granularity_or_out_of_bounds() {
        for memory in [0, 64, 100, 130, 10_304] {
            let config = FunctionConfig {
                memory_mb: Some(memory),
                ..FunctionConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidMemory { .. })),
                "{memory} MB should fail"
            );
        }
    }

    #[test]
    fn validates_timeout_range() {
        let within = FunctionConfig {
            timeout_secs: Some(900),
            ..FunctionConfig::default()
        };
        assert_eq!(within.validate(), Ok(()));

        for timeout in [0, 901] {
            let config = FunctionConfig {
                timeout_secs: Some(timeout),
                ..FunctionConfig::default()
            };
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidTimeout {
                    value: timeout,
                    max: MAX_TIMEOUT_SECS
                })
            );
        }
    }

    #[test]
    fn recognises_created_functions_by_environment() {
        let stamped: HashMap<String, String> =
            function_environment("test-function", "0.1.0").into_iter().collect();
        assert!(is_lambdapool_function(&stamped));
        assert!(!is_lambdapool_function(&HashMap::new()));
    }

    #[test]
    fn parses_host_timestamps() {
        let parsed = parse_last_modified("2019-01-10T12:00:00.000+0000").expect("should parse");
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2019, 1, 10));
        assert_eq!(parsed.hour(), 12);
        assert!(parse_last_modified("yesterday").is_none());
    }
}
