// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Vulnerability Intelligence Index
 * Version-ranged CVE lookup for WordPress core, plugins and themes
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Wildcard endpoint matching any version
pub const VERSION_ANY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftwareType {
    Core,
    Plugin,
    Theme,
}

impl std::fmt::Display for SoftwareType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoftwareType::Core => write!(f, "core"),
            SoftwareType::Plugin => write!(f, "plugin"),
            SoftwareType::Theme => write!(f, "theme"),
        }
    }
}

/// A range of affected versions. Either endpoint may be the wildcard `*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRange {
    #[serde(default = "any_version")]
    pub from_version: String,

    #[serde(default)]
    pub from_inclusive: bool,

    #[serde(default = "any_version")]
    pub to_version: String,

    #[serde(default)]
    pub to_inclusive: bool,
}

fn any_version() -> String {
    VERSION_ANY.to_string()
}

impl VersionRange {
    pub fn includes(&self, version: &str) -> bool {
        if self.from_version == VERSION_ANY && self.to_version == VERSION_ANY {
            return true;
        }

        if self.from_version != VERSION_ANY {
            match compare_versions(&self.from_version, version) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.from_inclusive => return false,
                _ => {}
            }
        }

        if self.to_version != VERSION_ANY {
            match compare_versions(&self.to_version, version) {
                Ordering::Less => return false,
                Ordering::Equal if !self.to_inclusive => return false,
                _ => {}
            }
        }

        true
    }
}

/// Software affected by a vulnerability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Software {
    #[serde(rename = "type")]
    pub software_type: SoftwareType,

    #[serde(default)]
    pub name: String,

    pub slug: String,

    #[serde(default)]
    pub affected_versions: HashMap<String, VersionRange>,

    #[serde(default)]
    pub patched: bool,

    #[serde(default)]
    pub patched_versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cvss {
    #[serde(default)]
    pub vector: String,

    #[serde(default)]
    pub score: f64,

    #[serde(default)]
    pub rating: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cwe {
    #[serde(default)]
    pub id: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub software: Vec<Software>,

    #[serde(default)]
    pub informational: bool,

    #[serde(default)]
    pub references: Vec<String>,

    #[serde(default)]
    pub published: String,

    #[serde(default)]
    pub updated: String,

    #[serde(default)]
    pub cve: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss: Option<Cvss>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<Cwe>,
}

impl Vulnerability {
    /// The affected-software record covering `version`, if any
    pub fn is_affected(
        &self,
        software_type: SoftwareType,
        slug: &str,
        version: &str,
    ) -> Option<&Software> {
        self.software.iter().find(|sw| {
            sw.software_type == software_type
                && sw.slug == slug
                && sw.affected_versions.values().any(|vr| vr.includes(version))
        })
    }

    /// First vendor advisory link carried by the record
    pub fn primary_reference(&self) -> Option<&str> {
        self.references.first().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    range: VersionRange,
    vuln_id: String,
}

/// Vulnerabilities indexed by (software type, slug) for version lookups
#[derive(Debug, Default)]
pub struct VulnerabilityIndex {
    vulnerabilities: HashMap<String, Vulnerability>,
    by_type: HashMap<SoftwareType, HashMap<String, Vec<IndexEntry>>>,
    skipped_entries: usize,
}

impl VulnerabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the feed document: a JSON object keyed by vulnerability ID.
    /// Ill-formed entries are counted and skipped.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: HashMap<String, serde_json::Value> =
            serde_json::from_slice(data).context("parsing vulnerability feed")?;

        let mut index = Self::new();
        for (id, value) in raw {
            match serde_json::from_value::<Vulnerability>(value) {
                Ok(mut vuln) => {
                    vuln.id = id;
                    index.add(vuln);
                }
                Err(err) => {
                    debug!(vuln_id = %id, error = %err, "skipping ill-formed vulnerability entry");
                    index.skipped_entries += 1;
                }
            }
        }
        Ok(index)
    }

    /// Serialize back to the feed format
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.vulnerabilities).context("serializing vulnerability index")
    }

    pub fn add(&mut self, vuln: Vulnerability) {
        for software in &vuln.software {
            let slugs = self.by_type.entry(software.software_type).or_default();
            let entries = slugs.entry(software.slug.clone()).or_default();
            for range in software.affected_versions.values() {
                entries.push(IndexEntry {
                    range: range.clone(),
                    vuln_id: vuln.id.clone(),
                });
            }
        }
        self.vulnerabilities.insert(vuln.id.clone(), vuln);
    }

    pub fn get(&self, id: &str) -> Option<&Vulnerability> {
        self.vulnerabilities.get(id)
    }

    pub fn count(&self) -> usize {
        self.vulnerabilities.len()
    }

    pub fn skipped_entries(&self) -> usize {
        self.skipped_entries
    }

    /// Every vulnerability whose range includes `version`, deduplicated by ID
    pub fn vulnerabilities_for(
        &self,
        software_type: SoftwareType,
        slug: &str,
        version: &str,
    ) -> Vec<&Vulnerability> {
        let Some(entries) = self.by_type.get(&software_type).and_then(|m| m.get(slug)) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for entry in entries {
            if seen.contains(entry.vuln_id.as_str()) {
                continue;
            }
            if entry.range.includes(version) {
                if let Some(vuln) = self.vulnerabilities.get(&entry.vuln_id) {
                    seen.insert(entry.vuln_id.as_str());
                    result.push(vuln);
                }
            }
        }
        result
    }
}

/// WordPress-style numeric version comparison. Versions are normalized by
/// stripping a leading `v`, splitting on `.`, `-` and `_`, and keeping the
/// leading integer of each segment; missing segments compare as 0.
pub fn compare_versions(lhs: &str, rhs: &str) -> Ordering {
    let left = normalize_version(lhs);
    let right = normalize_version(rhs);

    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

fn normalize_version(version: &str) -> Vec<u64> {
    version
        .trim_start_matches('v')
        .split(['.', '-', '_'])
        .filter_map(|segment| {
            let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(from: &str, from_inc: bool, to: &str, to_inc: bool) -> VersionRange {
        VersionRange {
            from_version: from.into(),
            from_inclusive: from_inc,
            to_version: to.into(),
            to_inclusive: to_inc,
        }
    }

    #[test]
    fn test_compare_versions_basic() {
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("1.2.3", "1.2.4"), Ordering::Less);
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("2", "1.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_compare_versions_normalization() {
        assert_eq!(compare_versions("v1.2", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2-beta", "1.2"), Ordering::Equal);
        assert_eq!(compare_versions("1_4", "1.4"), Ordering::Equal);
        // Non-numeric suffix inside a segment is dropped.
        assert_eq!(compare_versions("1.2a", "1.2"), Ordering::Equal);
    }

    #[test]
    fn test_compare_versions_laws() {
        let samples = ["1.0", "v2.3.4", "1.2-rc1", "0.0.1", "10.0"];
        for a in samples {
            assert_eq!(compare_versions(a, a), Ordering::Equal);
            for b in samples {
                assert_eq!(compare_versions(a, b), compare_versions(b, a).reverse());
            }
        }
    }

    #[test]
    fn test_range_inclusion_boundaries() {
        let r = range("1.2.0", true, "1.3.5", false);

        assert!(!r.includes("1.1.9"));
        assert!(r.includes("1.2.0"));
        assert!(r.includes("1.3.4"));
        assert!(!r.includes("1.3.5"));
    }

    #[test]
    fn test_range_wildcards() {
        assert!(range("*", false, "*", false).includes("9.9.9"));
        assert!(range("*", false, "2.0", true).includes("1.0"));
        assert!(!range("*", false, "2.0", false).includes("2.0"));
        assert!(range("3.0", true, "*", false).includes("4.5"));
    }

    fn feed() -> &'static str {
        r#"{
            "vuln-1": {
                "title": "Acme SQLi",
                "cve": "CVE-2025-0001",
                "software": [{
                    "type": "plugin",
                    "name": "Acme",
                    "slug": "acme",
                    "affected_versions": {
                        "1.2.0 - 1.3.5": {
                            "from_version": "1.2.0",
                            "from_inclusive": true,
                            "to_version": "1.3.5",
                            "to_inclusive": false
                        }
                    },
                    "patched": true,
                    "patched_versions": ["1.3.5"]
                }],
                "cvss": {"vector": "AV:N", "score": 9.8, "rating": "Critical"}
            },
            "vuln-2": {
                "title": "Informational core note",
                "informational": true,
                "software": [{
                    "type": "core",
                    "name": "WordPress",
                    "slug": "wordpress",
                    "affected_versions": {
                        "all": {"from_version": "*", "to_version": "*"}
                    }
                }]
            },
            "vuln-bad": "not an object"
        }"#
    }

    #[test]
    fn test_index_from_json_skips_bad_entries() {
        let index = VulnerabilityIndex::from_json(feed().as_bytes()).unwrap();

        assert_eq!(index.count(), 2);
        assert_eq!(index.skipped_entries(), 1);
        assert_eq!(index.get("vuln-1").unwrap().cve, "CVE-2025-0001");
    }

    #[test]
    fn test_index_lookup_respects_ranges() {
        let index = VulnerabilityIndex::from_json(feed().as_bytes()).unwrap();

        assert!(index
            .vulnerabilities_for(SoftwareType::Plugin, "acme", "1.1.9")
            .is_empty());
        assert_eq!(
            index
                .vulnerabilities_for(SoftwareType::Plugin, "acme", "1.2.0")
                .len(),
            1
        );
        assert_eq!(
            index
                .vulnerabilities_for(SoftwareType::Plugin, "acme", "1.3.4")
                .len(),
            1
        );
        assert!(index
            .vulnerabilities_for(SoftwareType::Plugin, "acme", "1.3.5")
            .is_empty());

        assert!(index
            .vulnerabilities_for(SoftwareType::Theme, "acme", "1.2.5")
            .is_empty());
        assert!(index
            .vulnerabilities_for(SoftwareType::Plugin, "other", "1.2.5")
            .is_empty());
    }

    #[test]
    fn test_lookup_deduplicates_by_id() {
        let mut vuln = VulnerabilityIndex::from_json(feed().as_bytes())
            .unwrap()
            .get("vuln-1")
            .unwrap()
            .clone();
        // Two overlapping ranges for the same software.
        vuln.software[0].affected_versions.insert(
            "also".into(),
            range("1.0", true, "2.0", true),
        );

        let mut index = VulnerabilityIndex::new();
        index.add(vuln);

        let hits = index.vulnerabilities_for(SoftwareType::Plugin, "acme", "1.2.5");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_round_trip_preserves_lookups() {
        let index = VulnerabilityIndex::from_json(feed().as_bytes()).unwrap();
        let json = index.to_json().unwrap();
        let rebuilt = VulnerabilityIndex::from_json(&json).unwrap();

        for version in ["1.1.9", "1.2.0", "1.3.4", "1.3.5"] {
            assert_eq!(
                index
                    .vulnerabilities_for(SoftwareType::Plugin, "acme", version)
                    .len(),
                rebuilt
                    .vulnerabilities_for(SoftwareType::Plugin, "acme", version)
                    .len(),
            );
        }
        assert_eq!(index.count(), rebuilt.count());
    }

    #[test]
    fn test_is_affected_returns_software_record() {
        let index = VulnerabilityIndex::from_json(feed().as_bytes()).unwrap();
        let vuln = index.get("vuln-1").unwrap();

        let sw = vuln.is_affected(SoftwareType::Plugin, "acme", "1.2.5").unwrap();
        assert!(sw.patched);
        assert_eq!(sw.patched_versions, vec!["1.3.5"]);

        assert!(vuln.is_affected(SoftwareType::Plugin, "acme", "1.3.5").is_none());
    }
}
