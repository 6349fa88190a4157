//! # Processing Configuration
//!
//! Knobs of the resync procedure. The distances are tuned for a network that
//! produces about ten blocks per second; none of them is a protocol constant.

use serde::{Deserialize, Serialize};

use crate::domain::ProcessingError;

/// Blocks walked back from the highest stored chain block to pick the resync start.
pub const DEFAULT_RESYNC_START_OFFSET: usize = 600;

/// Blocks re-processed before the last stored block of a hash sequence.
pub const DEFAULT_REWIND_MARGIN: usize = 600;

/// Trailing blocks of a cycle that take the dependency-aware path.
pub const DEFAULT_DEPENDENCY_WINDOW: usize = 3000;

/// A cycle whose gap is below this counts as caught up.
pub const DEFAULT_CONVERGENCE_THRESHOLD: usize = 10;

/// Processing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Re-verify every block from the start point instead of skipping the
    /// stored prefix.
    pub resync: bool,

    /// Wipe the store on the first resync of the process.
    pub clear_db: bool,

    pub resync_start_offset: usize,

    pub rewind_margin: usize,

    pub dependency_window: usize,

    pub convergence_threshold: usize,

    /// Upper bound on resync cycles when the node keeps outrunning us.
    pub max_resync_cycles: u32,

    /// Hashes fetched per cycle before processing starts.
    pub max_hashes_per_cycle: usize,

    /// Blocks a single dependency batch may hold.
    pub batch_capacity: usize,

    /// Identity cache entries.
    pub cache_capacity: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            resync: false,
            clear_db: false,
            resync_start_offset: DEFAULT_RESYNC_START_OFFSET,
            rewind_margin: DEFAULT_REWIND_MARGIN,
            dependency_window: DEFAULT_DEPENDENCY_WINDOW,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            max_resync_cycles: 20,
            max_hashes_per_cycle: 500_000,
            batch_capacity: 100_000,
            cache_capacity: 500_000,
        }
    }
}

impl ProcessingConfig {
    /// Create a config for testing (small windows, fast convergence).
    pub fn for_testing() -> Self {
        Self {
            resync: false,
            clear_db: false,
            resync_start_offset: 5,
            rewind_margin: 3,
            dependency_window: 4,
            convergence_threshold: 2,
            max_resync_cycles: 5,
            max_hashes_per_cycle: 1_000,
            batch_capacity: 1_000,
            cache_capacity: 1_000,
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ProcessingError> {
        let non_zero = [
            ("convergence_threshold", self.convergence_threshold),
            ("max_hashes_per_cycle", self.max_hashes_per_cycle),
            ("batch_capacity", self.batch_capacity),
            ("cache_capacity", self.cache_capacity),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ProcessingError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.max_resync_cycles == 0 {
            return Err(ProcessingError::InvalidConfig(
                "max_resync_cycles must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProcessingConfig::default();
        assert_eq!(config.resync_start_offset, 600);
        assert_eq!(config.rewind_margin, 600);
        assert_eq!(config.dependency_window, 3000);
        assert_eq!(config.convergence_threshold, 10);
        assert!(!config.clear_db);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(ProcessingConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ProcessingConfig {
            batch_capacity: 0,
            ..ProcessingConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_capacity"));

        let config = ProcessingConfig {
            max_resync_cycles: 0,
            ..ProcessingConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
