// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Two-Layer Regex Engine
 * Linear-time engine for the common case, PCRE-complete fallback for the rest
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use once_cell::sync::Lazy;
use std::time::Duration;
use thiserror::Error;

// Engine selection happens at compile time, not match time. The linear engine
// guarantees O(n) matching but rejects some PCRE features; the fallback is a
// backtracking engine executed under a bounded budget.

/// Maximum single repetition count the linear engine accepts
const MAX_REPETITION: u64 = 1000;

/// Maximum product of nested repetitions, e.g. (x{100}){20} costs 2000
const MAX_NESTED_PRODUCT: u64 = 1000;

/// Backtracking budget per millisecond of configured match timeout
const BACKTRACK_STEPS_PER_MS: u32 = 25_000;

const MIN_BACKTRACK_LIMIT: u32 = 10_000;

static REPETITION: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"\{(\d+)(?:,(\d*))?\}").expect("static pattern"));

static GROUP_REPETITION: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"\)\{(\d+)(?:,(\d*))?\}").expect("static pattern"));

#[derive(Error, Debug)]
pub enum RegexError {
    #[error("pattern failed to compile: {0}")]
    Compile(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MatchError {
    /// The fallback engine exhausted its backtracking budget
    #[error("pattern match exceeded its time budget")]
    Timeout,

    #[error("regex engine error: {0}")]
    Engine(String),
}

/// A regex match: the matched text and its byte offset in the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    pub text: String,
    pub start: usize,
}

/// Pre-check rejecting patterns the linear engine cannot compile, so that
/// compilation stays quiet. Conservative: a rejected pattern simply runs on
/// the fallback engine.
pub fn linear_compatible(pattern: &str) -> bool {
    // PCRE-only escapes the linear engine has no equivalent for.
    const PCRE_ONLY_ESCAPES: [&str; 7] = [r"\Z", r"\h", r"\H", r"\V", r"\R", r"\K", r"\G"];
    for escape in PCRE_ONLY_ESCAPES {
        if pattern.contains(escape) {
            return false;
        }
    }

    // \b inside a character class means backspace in PCRE, rejected here.
    if pattern.contains(r"[\b") || pattern.contains(r"\b]") {
        return false;
    }

    // Collect repetition maxima and bound them.
    let mut repetitions: Vec<u64> = Vec::new();
    for caps in REPETITION.captures_iter(pattern) {
        let mut max_value = 0u64;
        if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
            if n > MAX_REPETITION {
                return false;
            }
            max_value = n;
        }
        if let Some(m) = caps.get(2) {
            if !m.as_str().is_empty() {
                if let Ok(m) = m.as_str().parse::<u64>() {
                    if m > MAX_REPETITION {
                        return false;
                    }
                    max_value = max_value.max(m);
                }
            }
        }
        if max_value > 0 {
            repetitions.push(max_value);
        }
    }

    // Group-followed-by-quantifier multiplies costs. Bound the product of the
    // two largest repetition maxima, and refuse stacks of large repetitions.
    if GROUP_REPETITION.is_match(pattern) && repetitions.len() > 1 {
        let mut largest = 0u64;
        let mut second = 0u64;
        for &r in &repetitions {
            if r > largest {
                second = largest;
                largest = r;
            } else if r > second {
                second = r;
            }
        }
        if largest.saturating_mul(second) > MAX_NESTED_PRODUCT {
            return false;
        }
        if repetitions.len() > 3 && repetitions.iter().any(|&r| r > 50) {
            return false;
        }
    }

    // \1..\9 followed by a letter is an ambiguous backreference/octal mix.
    let bytes = pattern.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i] == b'\\' && bytes[i + 1].is_ascii_digit() && bytes[i + 1] != b'0' {
            if let Some(&following) = bytes.get(i + 2) {
                if following.is_ascii_alphabetic() {
                    return false;
                }
            }
        }
    }

    true
}

/// A compiled pattern with automatic engine selection
pub struct CompiledRegex {
    /// Linear-time engine, present when the pattern passed the pre-check and
    /// compiled cleanly. Operates on raw bytes.
    linear: Option<regex::bytes::Regex>,

    /// PCRE-complete fallback, always compiled
    fallback: fancy_regex::Regex,

    original: String,
}

impl std::fmt::Debug for CompiledRegex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRegex")
            .field("original", &self.original)
            .field("linear", &self.linear.is_some())
            .finish()
    }
}

impl CompiledRegex {
    /// Compile with the two-layer strategy. The fallback engine must always
    /// compile; `timeout` sets its backtracking budget.
    pub fn compile(pattern: &str, timeout: Duration) -> Result<Self, RegexError> {
        let linear = if linear_compatible(pattern) {
            regex::bytes::RegexBuilder::new(pattern)
                .multi_line(true)
                .dot_matches_new_line(true)
                .build()
                .ok()
        } else {
            None
        };

        // The budget stands in for a wall-clock timeout on the backtracker.
        let budget = (timeout.as_millis() as u32)
            .saturating_mul(BACKTRACK_STEPS_PER_MS)
            .max(MIN_BACKTRACK_LIMIT);

        let fallback = fancy_regex::RegexBuilder::new(&format!("(?ms){pattern}"))
            .backtrack_limit(budget as usize)
            .build()
            .map_err(|e| RegexError::Compile(e.to_string()))?;

        Ok(Self {
            linear,
            fallback,
            original: pattern.to_string(),
        })
    }

    /// Find the first match. `bytes` and `text` are the same content; the
    /// linear engine reads the raw bytes, the fallback the lossy text view.
    /// Reported offsets are always byte offsets into `bytes`.
    pub fn find(&self, bytes: &[u8], text: &str) -> Result<Option<RegexMatch>, MatchError> {
        if let Some(linear) = &self.linear {
            return Ok(linear.find(bytes).map(|m| RegexMatch {
                text: String::from_utf8_lossy(m.as_bytes()).into_owned(),
                start: m.start(),
            }));
        }

        match self.fallback.find(text) {
            Ok(Some(m)) => Ok(Some(RegexMatch {
                text: m.as_str().to_string(),
                start: lossy_to_content_offset(bytes, m.start()),
            })),
            Ok(None) => Ok(None),
            Err(fancy_regex::Error::RuntimeError(
                fancy_regex::RuntimeError::BacktrackLimitExceeded,
            )) => Err(MatchError::Timeout),
            Err(other) => Err(MatchError::Engine(other.to_string())),
        }
    }

    /// True when the linear engine serves this pattern
    pub fn is_linear(&self) -> bool {
        self.linear.is_some()
    }

    pub fn original(&self) -> &str {
        &self.original
    }
}

/// Map an offset in the lossy text view of `content` back to a byte offset
/// in `content` itself. `String::from_utf8_lossy` replaces each maximal
/// invalid subpart with the three-byte U+FFFD, shifting positions after it;
/// this walks the same decomposition to undo the shift. An offset inside a
/// replacement character maps to the first byte it replaced. For valid UTF-8
/// the mapping is the identity.
fn lossy_to_content_offset(content: &[u8], text_offset: usize) -> usize {
    let mut content_pos = 0usize;
    let mut text_pos = 0usize;
    let mut rest = content;

    loop {
        match std::str::from_utf8(rest) {
            // The remainder is valid; positions advance in lockstep.
            Ok(_) => return content_pos + (text_offset - text_pos),
            Err(err) => {
                let valid = err.valid_up_to();
                if text_offset < text_pos + valid {
                    return content_pos + (text_offset - text_pos);
                }
                text_pos += valid;
                content_pos += valid;

                // One replacement character stands in for this invalid run.
                let invalid = err.error_len().unwrap_or(rest.len() - valid);
                if text_offset < text_pos + '\u{FFFD}'.len_utf8() {
                    return content_pos;
                }
                text_pos += '\u{FFFD}'.len_utf8();
                content_pos += invalid;
                rest = &rest[valid + invalid..];
            }
        }
    }
}
