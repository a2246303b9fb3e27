// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Haavi Scanner Library
 * Filesystem malware scanning and WordPress vulnerability detection
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod buffer_pool;
pub mod cancel;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod filter;
pub mod rate_limiter;
pub mod resource_monitor;
pub mod signatures;
pub mod types;

// Pattern matching engine
pub mod matcher;

// Staged scanning pipeline
pub mod pipeline;

// Vulnerability intelligence and site scanning
pub mod vuln_scanner;
pub mod vulnerabilities;
pub mod wordpress;

pub use buffer_pool::ContentPool;
pub use cancel::CancelToken;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::{Profile, ProfileSettings, ScanConfig};
pub use errors::{ScanError, ScanErrorKind, ScanErrorStats};
pub use filter::{FileFilter, FilterConfig};
pub use matcher::{FileMatches, Matcher};
pub use pipeline::{generate_scan_id, PipelineScanner};
pub use rate_limiter::ByteRateLimiter;
pub use resource_monitor::{ResourceMetrics, ResourceMonitor};
pub use signatures::{CommonString, Signature, SignatureSet};
pub use types::{FileItem, MatchResult, PipelineStats, ScanResult};
pub use vuln_scanner::{VulnMatch, VulnScanOptions, VulnScanResult, VulnScanner};
pub use vulnerabilities::{compare_versions, SoftwareType, Vulnerability, VulnerabilityIndex};
pub use wordpress::Site;
