// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Signature Match Engine
 * Aho-Corasick prefilter over common strings gating per-signature regexes
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

pub mod regex_engine;

pub use regex_engine::{linear_compatible, CompiledRegex, MatchError, RegexMatch};

use aho_corasick::{AhoCorasick, AhoCorasickKind, MatchKind};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::errors::ScanError;
use crate::signatures::{CommonString, SignatureSet};
use crate::types::MatchResult;

pub const DEFAULT_MATCH_TIMEOUT: Duration = Duration::from_secs(1);

/// A signature with its compiled pattern
pub struct CompiledSignature {
    pub id: u32,
    pub name: String,
    pub common_string_count: usize,
    pub pattern: Option<CompiledRegex>,
    pub anchored_start: bool,
    pub compile_error: Option<String>,
}

/// Matches and timeouts collected for one file
#[derive(Debug, Default, Clone)]
pub struct FileMatches {
    pub matches: Vec<MatchResult>,
    pub timeouts: Vec<u32>,
}

impl FileMatches {
    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Reusable per-file scratch state, pooled to keep the hot path free of
/// allocations
#[derive(Default)]
struct MatchScratch {
    matches: HashMap<u32, MatchResult>,
    timeouts: HashSet<u32>,
    observed: Vec<bool>,
    candidate_counts: HashMap<u32, usize>,
}

impl MatchScratch {
    fn reset(&mut self, common_string_count: usize) {
        self.matches.clear();
        self.timeouts.clear();
        self.candidate_counts.clear();
        self.observed.clear();
        self.observed.resize(common_string_count, false);
    }
}

/// Compiles a signature set once and matches it against many files
pub struct Matcher {
    signatures: HashMap<u32, Arc<CompiledSignature>>,
    common_strings: Vec<CommonString>,
    ungated: Vec<Arc<CompiledSignature>>,

    automaton: Option<AhoCorasick>,
    match_all: bool,
    compile_failures: usize,

    scratch_pool: Mutex<Vec<MatchScratch>>,
}

impl Matcher {
    /// Compile every signature in the set. Compilation failures are recorded
    /// per signature and never abort construction.
    pub fn new(set: &SignatureSet, timeout: Duration, match_all: bool) -> Self {
        let mut signatures = HashMap::with_capacity(set.signatures.len());
        let mut ungated = Vec::new();
        let mut compile_failures = 0usize;

        for signature in set.signatures.values() {
            let (pattern, compile_error) = match CompiledRegex::compile(&signature.rule, timeout) {
                Ok(compiled) => (Some(compiled), None),
                Err(err) => {
                    compile_failures += 1;
                    debug!(signature_id = signature.id, error = %err, "signature failed to compile");
                    (None, Some(err.to_string()))
                }
            };

            let compiled = Arc::new(CompiledSignature {
                id: signature.id,
                name: signature.name.clone(),
                common_string_count: signature.common_string_count(),
                anchored_start: signature.rule.starts_with('^'),
                pattern,
                compile_error,
            });

            if !signature.has_common_strings() && compiled.pattern.is_some() {
                ungated.push(Arc::clone(&compiled));
            }
            signatures.insert(signature.id, compiled);
        }

        // One DFA over all distinct common strings; a single O(n) pass per
        // file marks every observed literal.
        let automaton = if set.common_strings.is_empty() {
            None
        } else {
            let patterns: Vec<&[u8]> = set
                .common_strings
                .iter()
                .map(|cs| cs.string.as_bytes())
                .collect();
            match AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostLongest)
                .kind(Some(AhoCorasickKind::DFA))
                .build(&patterns)
            {
                Ok(ac) => Some(ac),
                Err(err) => {
                    warn!(error = %err, "failed to build common-string automaton");
                    None
                }
            }
        };

        Self {
            signatures,
            common_strings: set.common_strings.clone(),
            ungated,
            automaton,
            match_all,
            compile_failures,
            scratch_pool: Mutex::new(Vec::new()),
        }
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn compile_failures(&self) -> usize {
        self.compile_failures
    }

    /// Number of signatures served by the linear engine
    pub fn linear_count(&self) -> usize {
        self.signatures
            .values()
            .filter(|s| s.pattern.as_ref().is_some_and(|p| p.is_linear()))
            .count()
    }

    /// Match full file content
    pub fn match_content(
        &self,
        content: &[u8],
        cancel: &CancelToken,
    ) -> Result<FileMatches, ScanError> {
        self.match_chunk(content, true, cancel)
    }

    /// Match a chunk. `is_start` gates signatures anchored to the start of
    /// input. The content must remain unchanged for the duration of the call.
    pub fn match_chunk(
        &self,
        content: &[u8],
        is_start: bool,
        cancel: &CancelToken,
    ) -> Result<FileMatches, ScanError> {
        let mut scratch = self
            .scratch_pool
            .lock()
            .expect("scratch pool poisoned")
            .pop()
            .unwrap_or_default();
        scratch.reset(self.common_strings.len());

        let text = String::from_utf8_lossy(content);
        let outcome = self.run_protocol(&mut scratch, content, &text, is_start, cancel);

        let result = outcome.map(|_| FileMatches {
            matches: scratch.matches.drain().map(|(_, m)| m).collect(),
            timeouts: scratch.timeouts.drain().collect(),
        });

        scratch.reset(0);
        self.scratch_pool
            .lock()
            .expect("scratch pool poisoned")
            .push(scratch);

        result
    }

    fn run_protocol(
        &self,
        scratch: &mut MatchScratch,
        content: &[u8],
        text: &str,
        is_start: bool,
        cancel: &CancelToken,
    ) -> Result<(), ScanError> {
        // Prefilter: mark observed common strings, count them per signature.
        if let Some(automaton) = &self.automaton {
            for m in automaton.find_iter(content) {
                let index = m.pattern().as_usize();
                if index < scratch.observed.len() && !scratch.observed[index] {
                    scratch.observed[index] = true;
                    for &signature_id in &self.common_strings[index].signature_ids {
                        if !scratch.matches.contains_key(&signature_id) {
                            *scratch.candidate_counts.entry(signature_id).or_insert(0) += 1;
                        }
                    }
                }
            }
        }

        // A gated signature is a candidate only when every one of its common
        // strings was observed.
        let candidates: Vec<Arc<CompiledSignature>> = scratch
            .candidate_counts
            .iter()
            .filter_map(|(&id, &count)| {
                let signature = self.signatures.get(&id)?;
                (count == signature.common_string_count).then(|| Arc::clone(signature))
            })
            .collect();

        for signature in self.ungated.iter().chain(candidates.iter()) {
            if cancel.is_cancelled() {
                return Err(ScanError::cancelled(Path::new("")));
            }
            if self.match_signature(signature, content, text, is_start, scratch) && !self.match_all
            {
                return Ok(());
            }
        }

        Ok(())
    }

    fn match_signature(
        &self,
        signature: &CompiledSignature,
        content: &[u8],
        text: &str,
        is_start: bool,
        scratch: &mut MatchScratch,
    ) -> bool {
        let Some(pattern) = &signature.pattern else {
            return false;
        };
        if signature.anchored_start && !is_start {
            return false;
        }
        if scratch.matches.contains_key(&signature.id) {
            return false;
        }

        match pattern.find(content, text) {
            Ok(Some(m)) => {
                scratch.matches.insert(
                    signature.id,
                    MatchResult {
                        signature_id: signature.id,
                        matched: m.text,
                        offset: m.start,
                    },
                );
                true
            }
            Ok(None) => false,
            Err(MatchError::Timeout) => {
                scratch.timeouts.insert(signature.id);
                false
            }
            Err(MatchError::Engine(err)) => {
                debug!(signature_id = signature.id, error = %err, "signature match error");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::Signature;

    fn test_set() -> SignatureSet {
        let mut set = SignatureSet::new();
        set.common_strings.push(CommonString::new("eval"));
        set.common_strings.push(CommonString::new("base64_decode"));

        set.add_signature(Signature::new(
            1,
            r"eval\s*\(",
            "Eval Pattern",
            "Detects eval() calls",
            vec![0],
        ));
        set.add_signature(Signature::new(
            2,
            r"base64_decode\s*\(",
            "Base64 Decode",
            "Detects base64_decode() calls",
            vec![1],
        ));
        set.add_signature(Signature::new(
            3,
            r"system\s*\(",
            "System Call",
            "Detects system() calls",
            vec![],
        ));
        set
    }

    fn matcher(set: &SignatureSet, match_all: bool) -> Matcher {
        Matcher::new(set, DEFAULT_MATCH_TIMEOUT, match_all)
    }

    #[test]
    fn test_basic_match_with_offset() {
        let set = test_set();
        let m = matcher(&set, true);
        let cancel = CancelToken::new();

        let content = b"<?php eval($_POST['cmd']); ?>";
        let found = m.match_content(content, &cancel).unwrap();

        assert!(found.has_matches());
        let eval = found.matches.iter().find(|r| r.signature_id == 1).unwrap();
        assert_eq!(eval.offset, 6);
        assert_eq!(eval.matched, "eval(");
    }

    #[test]
    fn test_gated_signature_requires_all_common_strings() {
        let mut set = SignatureSet::new();
        set.common_strings.push(CommonString::new("eval"));
        set.common_strings.push(CommonString::new("gzinflate"));
        // Regex alone would match, but both literals must be present first.
        set.add_signature(Signature::new(7, r"eval", "Gated", "", vec![0, 1]));

        let m = matcher(&set, true);
        let cancel = CancelToken::new();

        let missing_one = m.match_content(b"<?php eval($x); ?>", &cancel).unwrap();
        assert!(!missing_one.has_matches());

        let both = m
            .match_content(b"<?php eval(gzinflate($x)); ?>", &cancel)
            .unwrap();
        assert!(both.has_matches());
    }

    #[test]
    fn test_ungated_signature_always_evaluated() {
        let set = test_set();
        let m = matcher(&set, true);
        let cancel = CancelToken::new();

        let found = m.match_content(b"<?php system('ls'); ?>", &cancel).unwrap();
        assert_eq!(found.matches.len(), 1);
        assert_eq!(found.matches[0].signature_id, 3);
    }

    #[test]
    fn test_first_match_short_circuits_when_match_all_off() {
        let set = test_set();
        let m = matcher(&set, false);
        let cancel = CancelToken::new();

        let content = b"<?php eval(base64_decode($x)); system('ls'); ?>";
        let found = m.match_content(content, &cancel).unwrap();
        assert_eq!(found.matches.len(), 1);
    }

    #[test]
    fn test_match_all_collects_every_signature_once() {
        let set = test_set();
        let m = matcher(&set, true);
        let cancel = CancelToken::new();

        let content = b"eval(1); eval(2); base64_decode(3); system(4);";
        let found = m.match_content(content, &cancel).unwrap();

        assert_eq!(found.matches.len(), 3);
        let mut ids: Vec<u32> = found.matches.iter().map(|r| r.signature_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_anchored_pattern_skipped_off_start() {
        let mut set = SignatureSet::new();
        set.add_signature(Signature::new(4, r"^<\?php", "PHP Header", "", vec![]));

        let m = matcher(&set, true);
        let cancel = CancelToken::new();

        let content = b"<?php echo 1; ?>";
        assert!(m.match_chunk(content, true, &cancel).unwrap().has_matches());
        assert!(!m.match_chunk(content, false, &cancel).unwrap().has_matches());
    }

    #[test]
    fn test_empty_content_yields_nothing() {
        let set = test_set();
        let m = matcher(&set, true);
        let cancel = CancelToken::new();

        let found = m.match_content(b"", &cancel).unwrap();
        assert!(found.matches.is_empty());
        assert!(found.timeouts.is_empty());
    }

    #[test]
    fn test_cancellation_aborts() {
        let set = test_set();
        let m = matcher(&set, true);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = m.match_content(b"<?php eval(1); ?>", &cancel).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_timeout_recorded_not_matched() {
        let mut set = SignatureSet::new();
        set.add_signature(Signature::new(
            5,
            r"(a+)+\1$",
            "Pathological",
            "",
            vec![],
        ));

        let m = Matcher::new(&set, Duration::from_millis(1), true);
        let content = format!("{}b", "a".repeat(64));
        let cancel = CancelToken::new();

        let found = m.match_content(content.as_bytes(), &cancel).unwrap();
        assert!(found.matches.is_empty());
        assert_eq!(found.timeouts, vec![5]);
    }

    #[test]
    fn test_fallback_offset_with_invalid_utf8_content() {
        let mut set = SignatureSet::new();
        // Backreference keeps this signature on the fallback engine.
        set.add_signature(Signature::new(8, r"(ab)\1", "Doubled", "", vec![]));

        let m = matcher(&set, true);
        let cancel = CancelToken::new();

        let content = b"\xff\xfeabab";
        let found = m.match_content(content, &cancel).unwrap();

        assert_eq!(found.matches.len(), 1);
        // Offset is relative to the raw bytes, not the widened text view.
        assert_eq!(found.matches[0].offset, 2);
        assert_eq!(found.matches[0].matched, "abab");
    }

    #[test]
    fn test_compile_failure_is_recorded_not_fatal() {
        let mut set = test_set();
        set.add_signature(Signature::new(99, r"(broken", "Broken", "", vec![]));

        let m = matcher(&set, true);
        assert_eq!(m.compile_failures(), 1);
        assert_eq!(m.signature_count(), 4);

        // Remaining signatures still work.
        let cancel = CancelToken::new();
        let found = m.match_content(b"system('id')", &cancel).unwrap();
        assert!(found.has_matches());
    }

    #[test]
    fn test_scratch_reuse_keeps_results_independent() {
        let set = test_set();
        let m = matcher(&set, true);
        let cancel = CancelToken::new();

        let first = m.match_content(b"eval(1)", &cancel).unwrap();
        assert_eq!(first.matches.len(), 1);

        let second = m.match_content(b"nothing here", &cancel).unwrap();
        assert!(second.matches.is_empty());
    }
}
