// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Malware Signature Set
 * Common strings, PCRE rules and the signature feed model
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use anyhow::{Context, Result};

/// A literal string shared by many signatures, used to cheaply rule out most
/// signatures per file before any regex runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonString {
    pub string: String,

    #[serde(default)]
    pub signature_ids: Vec<u32>,
}

impl CommonString {
    pub fn new(string: impl Into<String>) -> Self {
        Self {
            string: string.into(),
            signature_ids: Vec::new(),
        }
    }
}

/// A malware detection signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub id: u32,
    /// PCRE pattern text
    pub rule: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Indices into `SignatureSet::common_strings`
    #[serde(default)]
    pub common_strings: Vec<usize>,
}

impl Signature {
    pub fn new(
        id: u32,
        rule: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        common_strings: Vec<usize>,
    ) -> Self {
        Self {
            id,
            rule: rule.into(),
            name: name.into(),
            description: description.into(),
            common_strings,
        }
    }

    pub fn has_common_strings(&self) -> bool {
        !self.common_strings.is_empty()
    }

    pub fn common_string_count(&self) -> usize {
        self.common_strings.len()
    }
}

/// The full signature set consumed by the match engine. Immutable during a
/// scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureSet {
    #[serde(default)]
    pub common_strings: Vec<CommonString>,

    #[serde(default)]
    pub signatures: HashMap<u32, Signature>,

    #[serde(default)]
    pub update_time: i64,
}

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the cached signature feed document
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("parsing signature set")
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("serializing signature set")
    }

    pub fn signature(&self, id: u32) -> Option<&Signature> {
        self.signatures.get(&id)
    }

    pub fn has_signature(&self, id: u32) -> bool {
        self.signatures.contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.signatures.len()
    }

    /// Remove a signature and detach it from its common strings
    pub fn remove_signature(&mut self, id: u32) -> bool {
        let Some(signature) = self.signatures.remove(&id) else {
            return false;
        };

        for &index in &signature.common_strings {
            if let Some(cs) = self.common_strings.get_mut(index) {
                cs.signature_ids.retain(|&sig_id| sig_id != id);
            }
        }
        true
    }

    /// The literal strings gating a signature
    pub fn common_strings_for(&self, signature: &Signature) -> Vec<&str> {
        signature
            .common_strings
            .iter()
            .filter_map(|&index| self.common_strings.get(index))
            .map(|cs| cs.string.as_str())
            .collect()
    }

    /// Content hash of the set, for cache invalidation
    pub fn hash(&self) -> String {
        let mut ids: Vec<u32> = self.signatures.keys().copied().collect();
        ids.sort_unstable();

        let mut hasher = Sha256::new();
        for id in ids {
            let signature = &self.signatures[&id];
            hasher.update(signature.id.to_string());
            hasher.update(";");
            hasher.update(&signature.rule);
            hasher.update(";");
            for cs in self.common_strings_for(signature) {
                hasher.update(cs);
                hasher.update(";");
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Attach a signature, wiring the back-references on its common strings
    pub fn add_signature(&mut self, signature: Signature) {
        for &index in &signature.common_strings {
            if let Some(cs) = self.common_strings.get_mut(index) {
                cs.signature_ids.push(signature.id);
            }
        }
        self.signatures.insert(signature.id, signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_add_wires_common_strings() {
        let set = test_set();

        assert_eq!(set.count(), 3);
        assert_eq!(set.common_strings[0].signature_ids, vec![1]);
        assert_eq!(set.common_strings[1].signature_ids, vec![2]);
        assert!(set.signature(3).is_some());
        assert!(!set.signature(3).unwrap().has_common_strings());
    }

    #[test]
    fn test_remove_detaches_common_strings() {
        let mut set = test_set();

        assert!(set.remove_signature(1));
        assert!(!set.has_signature(1));
        assert!(set.common_strings[0].signature_ids.is_empty());

        assert!(!set.remove_signature(1));
    }

    #[test]
    fn test_common_strings_for_skips_bad_indices() {
        let set = test_set();
        let sig = Signature::new(9, "x", "X", "", vec![0, 99]);
        assert_eq!(set.common_strings_for(&sig), vec!["eval"]);
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let set = test_set();
        assert_eq!(set.hash(), set.hash());

        let mut changed = test_set();
        changed.signatures.get_mut(&1).unwrap().rule = "other".into();
        assert_ne!(set.hash(), changed.hash());
    }

    #[test]
    fn test_json_round_trip() {
        let set = test_set();
        let json = set.to_json().unwrap();
        let back = SignatureSet::from_json(&json).unwrap();

        assert_eq!(back.count(), set.count());
        assert_eq!(back.hash(), set.hash());
        assert_eq!(back.common_strings[0].string, "eval");
    }
}
