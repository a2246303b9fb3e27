// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::config::profiles::Profile;

/// Options recognized by the scanning pipeline. Zero means "unlimited" or
/// "disabled" for every capacity field.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScanConfig {
    /// Worker count for the read and match stages
    #[validate(range(min = 1, max = 1024))]
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Rate-limiter granularity in bytes per token
    #[validate(range(min = 512, max = 16777216))]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum file size in bytes; 0 = unlimited
    #[serde(default)]
    pub max_file_size: u64,

    /// Budget for a single pattern evaluation
    #[serde(default = "default_match_timeout")]
    pub match_timeout: Duration,

    /// Collect every matching signature instead of stopping at the first
    #[serde(default)]
    pub match_all: bool,

    /// Log and continue on I/O errors during discovery
    #[serde(default)]
    pub allow_io_errors: bool,

    #[serde(default)]
    pub follow_symlinks: bool,

    /// Memory cap in bytes for adaptive throttling; 0 = none
    #[serde(default)]
    pub memory_limit: u64,

    /// Disk read budget in bytes per second; 0 = none
    #[serde(default)]
    pub io_rate_limit: u64,

    /// Files matched per worker before a batch pause; 0 = no batching
    #[serde(default)]
    pub batch_size: usize,

    #[serde(default)]
    pub batch_pause: Duration,

    /// 1-minute load average cap for adaptive throttling; 0 = none
    #[serde(default)]
    pub max_load_avg: f64,

    /// Static delay applied per file in the read and match stages
    #[serde(default)]
    pub scan_delay: Duration,

    #[serde(default)]
    pub profile: Profile,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            chunk_size: default_chunk_size(),
            max_file_size: 0,
            match_timeout: default_match_timeout(),
            match_all: false,
            allow_io_errors: false,
            follow_symlinks: false,
            memory_limit: 0,
            io_rate_limit: 0,
            batch_size: 0,
            batch_pause: Duration::ZERO,
            max_load_avg: 0.0,
            scan_delay: Duration::ZERO,
            profile: Profile::default(),
        }
    }
}

impl ScanConfig {
    /// Build a configuration from a performance profile
    pub fn for_profile(profile: Profile) -> Self {
        let settings = profile.settings();
        Self {
            workers: settings.workers,
            chunk_size: settings.chunk_size,
            max_file_size: settings.max_file_size,
            memory_limit: settings.memory_limit,
            io_rate_limit: settings.io_rate_limit,
            batch_size: settings.batch_size,
            batch_pause: settings.batch_pause,
            max_load_avg: settings.max_load_avg,
            scan_delay: settings.scan_delay,
            profile,
            ..Self::default()
        }
    }

    /// Apply environment variable overrides (HAAVI_WORKERS, HAAVI_PROFILE,
    /// HAAVI_IO_RATE_LIMIT, HAAVI_MAX_FILE_SIZE)
    pub fn apply_env(&mut self) {
        if let Ok(workers) = std::env::var("HAAVI_WORKERS") {
            if let Ok(workers) = workers.parse() {
                self.workers = workers;
            }
        }
        if let Ok(profile) = std::env::var("HAAVI_PROFILE") {
            if let Ok(profile) = profile.parse() {
                self.profile = profile;
            }
        }
        if let Ok(limit) = std::env::var("HAAVI_IO_RATE_LIMIT") {
            if let Ok(limit) = limit.parse() {
                self.io_rate_limit = limit;
            }
        }
        if let Ok(size) = std::env::var("HAAVI_MAX_FILE_SIZE") {
            if let Ok(size) = size.parse() {
                self.max_file_size = size;
            }
        }
    }
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_chunk_size() -> usize {
    4096
}

fn default_match_timeout() -> Duration {
    Duration::from_secs(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.max_file_size, 0);
        assert_eq!(config.match_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let config = ScanConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_profile_carries_settings() {
        let config = ScanConfig::for_profile(Profile::Gentle);
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.io_rate_limit, 5 * 1024 * 1024);
        assert_eq!(config.scan_delay, Duration::from_millis(100));
        assert_eq!(config.profile, Profile::Gentle);
    }

    #[test]
    fn test_serde_round_trip() {
        let config = ScanConfig::for_profile(Profile::Balanced);
        let json = serde_json::to_string(&config).unwrap();
        let back: ScanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.workers, config.workers);
        assert_eq!(back.profile, Profile::Balanced);
    }
}
