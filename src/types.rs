// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Pipeline Data Model
 * Items, match results and statistics flowing through the scan pipeline
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer_pool::ContentPool;
use crate::errors::ScanError;

/// Pipeline stage a file item currently belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Discover,
    Filter,
    Read,
    Match,
    Report,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Discover => write!(f, "discover"),
            PipelineStage::Filter => write!(f, "filter"),
            PipelineStage::Read => write!(f, "read"),
            PipelineStage::Match => write!(f, "match"),
            PipelineStage::Report => write!(f, "report"),
        }
    }
}

/// A successful pattern match within a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub signature_id: u32,
    pub matched: String,
    pub offset: usize,
}

/// A file moving through the pipeline. Exactly one stage owns an item at a
/// time; the content buffer travels with the item and is returned to the pool
/// at a single well-defined point per item.
#[derive(Debug)]
pub struct FileItem {
    pub path: PathBuf,
    pub size: u64,
    pub stage: PipelineStage,

    pub content: Option<Vec<u8>>,
    pub pool: Option<Arc<ContentPool>>,

    pub error: Option<ScanError>,
    pub matches: Vec<MatchResult>,
    pub timeouts: Vec<u32>,
    pub scan_duration: Duration,

    pub scan_id: String,
    pub content_hash: String,
    pub scanned_bytes: u64,
}

impl FileItem {
    pub fn new(path: PathBuf, size: u64, scan_id: String) -> Self {
        Self {
            path,
            size,
            stage: PipelineStage::Discover,
            content: None,
            pool: None,
            error: None,
            matches: Vec::new(),
            timeouts: Vec::new(),
            scan_duration: Duration::ZERO,
            scan_id,
            content_hash: String::new(),
            scanned_bytes: 0,
        }
    }

    /// Return the content buffer to its pool. Safe to call more than once;
    /// only the first call releases.
    pub fn release_buffer(&mut self) {
        if let (Some(buf), Some(pool)) = (self.content.take(), self.pool.take()) {
            pool.release(buf);
        }
    }

    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }
}

impl Drop for FileItem {
    fn drop(&mut self) {
        // Last line of defence for items dropped mid-pipeline.
        self.release_buffer();
    }
}

/// Result published for every file that reached the report stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub path: PathBuf,
    pub matches: Vec<MatchResult>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeouts: Vec<u32>,

    pub scanned_bytes: u64,
    pub scan_duration: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScanError>,
}

impl ScanResult {
    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Snapshot of pipeline statistics. Counters are monotonic for the lifetime
/// of a scanner; timing fields are written once by the report stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub discovered: u64,
    pub filtered: u64,
    pub read: u64,
    pub matched: u64,
    pub reported: u64,

    pub files_with_matches: u64,
    pub files_skipped: u64,
    pub files_errored: u64,
    pub bytes_scanned: u64,
    pub duplicates_skipped: u64,

    pub circuit_breaks: u64,
    pub rate_limit_waits: u64,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub buffer_pool_hit_rate: f64,
}

impl PipelineStats {
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_item_release_is_idempotent() {
        let pool = Arc::new(ContentPool::new());
        let mut item = FileItem::new(PathBuf::from("/tmp/a.php"), 10, "abc".into());

        item.content = Some(pool.acquire(10));
        item.pool = Some(Arc::clone(&pool));

        item.release_buffer();
        item.release_buffer();

        let (acquires, releases, _) = pool.totals();
        assert_eq!(acquires, 1);
        assert_eq!(releases, 1);
    }

    #[test]
    fn test_file_item_drop_releases_buffer() {
        let pool = Arc::new(ContentPool::new());
        {
            let mut item = FileItem::new(PathBuf::from("/tmp/a.php"), 10, "abc".into());
            item.content = Some(pool.acquire(10));
            item.pool = Some(Arc::clone(&pool));
        }

        let (acquires, releases, _) = pool.totals();
        assert_eq!(acquires, releases);
    }

    #[test]
    fn test_scan_result_serialization() {
        let result = ScanResult {
            path: PathBuf::from("/var/www/a.php"),
            matches: vec![MatchResult {
                signature_id: 1,
                matched: "eval(".into(),
                offset: 6,
            }],
            timeouts: Vec::new(),
            scanned_bytes: 40,
            scan_duration: Duration::from_millis(3),
            error: None,
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"signature_id\":1"));
        assert!(!json.contains("error"));

        let back: ScanResult = serde_json::from_str(&json).unwrap();
        assert!(back.has_matches());
        assert_eq!(back.matches[0].offset, 6);
    }
}
