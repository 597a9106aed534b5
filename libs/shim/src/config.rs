//! Shim configuration.

use anyhow::Result;

/// Configuration for the shim context.
#[derive(Debug, Clone)]
pub struct ShimConfig {
    /// Scheduler name expected on managed pods.
    pub scheduler_name: String,

    /// Capacity of the dispatcher queue. Producers block once it is full.
    pub dispatcher_capacity: usize,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            scheduler_name: gantry_model::constants::SCHEDULER_NAME.to_string(),
            dispatcher_capacity: 4096,
        }
    }
}

impl ShimConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let scheduler_name =
            std::env::var("GANTRY_SCHEDULER_NAME").unwrap_or(defaults.scheduler_name);

        let dispatcher_capacity = std::env::var("GANTRY_DISPATCHER_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.dispatcher_capacity);

        Ok(Self {
            scheduler_name,
            dispatcher_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ShimConfig::default();
        assert_eq!(config.scheduler_name, "gantry");
        assert_eq!(config.dispatcher_capacity, 4096);
    }
}
