// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Error Taxonomy
 * Structured, classified errors for the scanning pipeline
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identifies the category of a scan error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanErrorKind {
    FileAccess,
    FileRead,
    FileTooLarge,
    MatchTimeout,
    MatchFailed,
    ContextCancelled,
    RateLimited,
    CircuitOpen,
    Validation,
    Internal,
}

impl std::fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            ScanErrorKind::FileAccess => "FILE_ACCESS",
            ScanErrorKind::FileRead => "FILE_READ",
            ScanErrorKind::FileTooLarge => "FILE_TOO_LARGE",
            ScanErrorKind::MatchTimeout => "MATCH_TIMEOUT",
            ScanErrorKind::MatchFailed => "MATCH_FAILED",
            ScanErrorKind::ContextCancelled => "CONTEXT_CANCELLED",
            ScanErrorKind::RateLimited => "RATE_LIMITED",
            ScanErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ScanErrorKind::Validation => "VALIDATION",
            ScanErrorKind::Internal => "INTERNAL",
        };
        f.write_str(code)
    }
}

/// Structured error carried by pipeline items and scan results
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("[{kind}] {operation} failed for {}: {message}", .path.display())]
pub struct ScanError {
    pub kind: ScanErrorKind,
    pub path: PathBuf,
    pub operation: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl ScanError {
    pub fn new(
        kind: ScanErrorKind,
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            operation: operation.into(),
            message: message.into(),
            cause: None,
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// True when retrying the same operation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ScanErrorKind::RateLimited | ScanErrorKind::CircuitOpen | ScanErrorKind::MatchTimeout
        )
    }

    /// True when the error should terminate the entire scan
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ScanErrorKind::ContextCancelled)
    }

    // Convenience constructors for the common failure sites

    pub fn file_access(path: &Path, cause: impl std::fmt::Display) -> Self {
        Self::new(ScanErrorKind::FileAccess, path, "open", "cannot access file").with_cause(cause)
    }

    pub fn file_read(path: &Path, cause: impl std::fmt::Display) -> Self {
        Self::new(ScanErrorKind::FileRead, path, "read", "cannot read file").with_cause(cause)
    }

    pub fn file_too_large(path: &Path, size: u64, limit: u64) -> Self {
        Self::new(
            ScanErrorKind::FileTooLarge,
            path,
            "validate",
            "file exceeds size limit",
        )
        .with_context("size", size)
        .with_context("limit", limit)
    }

    pub fn match_timeout(path: &Path, signature_id: u32) -> Self {
        Self::new(
            ScanErrorKind::MatchTimeout,
            path,
            "match",
            "pattern match timed out",
        )
        .with_context("signature_id", signature_id)
    }

    pub fn cancelled(path: &Path) -> Self {
        Self::new(
            ScanErrorKind::ContextCancelled,
            path,
            "scan",
            "operation cancelled",
        )
    }

    pub fn rate_limited(path: &Path, cause: impl std::fmt::Display) -> Self {
        Self::new(
            ScanErrorKind::RateLimited,
            path,
            "read",
            "rate limit wait failed",
        )
        .with_cause(cause)
    }

    pub fn circuit_open(path: &Path) -> Self {
        Self::new(
            ScanErrorKind::CircuitOpen,
            path,
            "read",
            "circuit breaker open",
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Validation, PathBuf::new(), "scan", message)
    }

    pub fn internal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Internal, PathBuf::new(), operation, message)
    }
}

/// Per-scan error accounting, grouped by kind and by path
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanErrorStats {
    pub by_kind: BTreeMap<String, u64>,
    pub by_path: BTreeMap<PathBuf, u64>,
    pub retryable: u64,
    pub fatal: u64,
    pub total: u64,
}

impl ScanErrorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, err: &ScanError) {
        self.total += 1;
        *self.by_kind.entry(err.kind.to_string()).or_default() += 1;
        *self.by_path.entry(err.path.clone()).or_default() += 1;

        if err.is_retryable() {
            self.retryable += 1;
        }
        if err.is_fatal() {
            self.fatal += 1;
        }
    }
}
