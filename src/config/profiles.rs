// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Scanning performance profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Minimal resource usage; slow but safe for loaded production hosts
    Gentle,
    /// Reasonable speed with moderate resource usage
    Balanced,
    /// Maximum resources, no throttling
    Aggressive,
    /// Moderate static settings plus dynamic resource monitoring
    Adaptive,
}

impl Default for Profile {
    fn default() -> Self {
        Profile::Balanced
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Profile::Gentle => write!(f, "gentle"),
            Profile::Balanced => write!(f, "balanced"),
            Profile::Aggressive => write!(f, "aggressive"),
            Profile::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "gentle" => Ok(Profile::Gentle),
            "balanced" => Ok(Profile::Balanced),
            "aggressive" => Ok(Profile::Aggressive),
            "adaptive" => Ok(Profile::Adaptive),
            other => Err(format!("unknown profile {other:?}")),
        }
    }
}

impl Profile {
    pub fn settings(self) -> ProfileSettings {
        ProfileSettings::for_profile(self)
    }

    /// Whether this profile runs the resource monitor
    pub fn is_adaptive(self) -> bool {
        matches!(self, Profile::Adaptive)
    }
}

/// Static pipeline settings packaged with a profile. Zero disables the
/// corresponding limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub workers: usize,
    pub scan_delay: Duration,
    pub chunk_size: usize,
    pub max_file_size: u64,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub max_load_avg: f64,
    pub memory_limit: u64,
    pub io_rate_limit: u64,
}

impl ProfileSettings {
    pub fn for_profile(profile: Profile) -> Self {
        let ncpu = num_cpus::get();

        match profile {
            Profile::Gentle => Self {
                workers: 1,
                scan_delay: Duration::from_millis(100),
                chunk_size: (256 * KIB) as usize,
                max_file_size: 10 * MIB,
                batch_size: 50,
                batch_pause: Duration::from_millis(1000),
                max_load_avg: 2.0,
                memory_limit: 256 * MIB,
                io_rate_limit: 5 * MIB,
            },
            Profile::Balanced => Self {
                workers: (ncpu / 2).max(1),
                scan_delay: Duration::from_millis(25),
                chunk_size: (512 * KIB) as usize,
                max_file_size: 50 * MIB,
                batch_size: 100,
                batch_pause: Duration::from_millis(500),
                max_load_avg: ncpu as f64 * 0.75,
                memory_limit: 512 * MIB,
                io_rate_limit: 20 * MIB,
            },
            Profile::Aggressive => Self {
                workers: ncpu.max(1),
                scan_delay: Duration::ZERO,
                chunk_size: MIB as usize,
                max_file_size: 0,
                batch_size: 0,
                batch_pause: Duration::ZERO,
                max_load_avg: 0.0,
                memory_limit: 0,
                io_rate_limit: 0,
            },
            // Caps are handled by the resource monitor rather than static
            // limits.
            Profile::Adaptive => Self {
                workers: (ncpu / 2).max(1),
                scan_delay: Duration::from_millis(10),
                chunk_size: (512 * KIB) as usize,
                max_file_size: 100 * MIB,
                batch_size: 0,
                batch_pause: Duration::ZERO,
                max_load_avg: 0.0,
                memory_limit: 0,
                io_rate_limit: 0,
            },
        }
    }
}

/// Monitor caps used when the adaptive profile is selected and the caller
/// did not configure explicit limits
pub fn adaptive_monitor_defaults() -> (u64, f64) {
    (512 * MIB, num_cpus::get() as f64)
}
