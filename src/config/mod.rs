// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

pub mod core;
pub mod profiles;

pub use self::core::ScanConfig;
pub use self::profiles::{adaptive_monitor_defaults, Profile, ProfileSettings};
