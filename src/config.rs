//! Runtime configuration

use serde::Deserialize;

/// Worker pool settings for [`crate::Distributor`]
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    /// Number of workers; every correlation ID maps to exactly one
    pub workers: usize,
    /// Messages buffered per worker before `dispatch` waits
    pub queue_capacity: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

impl DistributorConfig {
    /// Config with `workers` workers and the default queue capacity
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.workers == 0 {
            return Err("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1");
        }
        Ok(())
    }
}
