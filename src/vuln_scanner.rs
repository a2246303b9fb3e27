// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - WordPress Vulnerability Scanner
 * Looks up known CVEs for a site's core, plugins and themes
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::vulnerabilities::{SoftwareType, Vulnerability, VulnerabilityIndex};
use crate::wordpress::Site;

/// A vulnerability matched against installed software
#[derive(Debug, Clone, Serialize)]
pub struct VulnMatch {
    pub vulnerability: Vulnerability,
    pub software_type: SoftwareType,
    pub slug: String,
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

/// The outcome of scanning one site
#[derive(Debug, Clone, Serialize)]
pub struct VulnScanResult {
    pub site_path: PathBuf,
    pub matches: Vec<VulnMatch>,
    pub scan_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct VulnScanOptions {
    pub check_core: bool,
    pub check_plugins: bool,
    pub check_themes: bool,
    /// Include vulnerabilities flagged informational
    pub informational: bool,
    pub include_ids: Vec<String>,
    pub exclude_ids: Vec<String>,
}

impl Default for VulnScanOptions {
    fn default() -> Self {
        Self {
            check_core: true,
            check_plugins: true,
            check_themes: true,
            informational: false,
            include_ids: Vec::new(),
            exclude_ids: Vec::new(),
        }
    }
}

/// Scans WordPress sites against a vulnerability index
pub struct VulnScanner {
    index: VulnerabilityIndex,
    options: VulnScanOptions,
}

impl VulnScanner {
    pub fn new(index: VulnerabilityIndex, options: VulnScanOptions) -> Self {
        Self { index, options }
    }

    pub fn index(&self) -> &VulnerabilityIndex {
        &self.index
    }

    /// Scan one site. Software with an empty version is skipped.
    pub fn scan_site(&self, site: &Site) -> VulnScanResult {
        let start = Instant::now();
        let mut matches = Vec::new();

        if self.options.check_core && !site.version.is_empty() {
            self.collect(
                &mut matches,
                SoftwareType::Core,
                "wordpress",
                "WordPress",
                &site.version,
                &site.core_path,
            );
        }

        if self.options.check_plugins {
            for plugin in &site.plugins {
                if plugin.version.is_empty() {
                    continue;
                }
                self.collect(
                    &mut matches,
                    SoftwareType::Plugin,
                    &plugin.slug,
                    &plugin.name,
                    &plugin.version,
                    &plugin.path,
                );
            }
        }

        if self.options.check_themes {
            for theme in &site.themes {
                if theme.version.is_empty() {
                    continue;
                }
                self.collect(
                    &mut matches,
                    SoftwareType::Theme,
                    &theme.slug,
                    &theme.name,
                    &theme.version,
                    &theme.path,
                );
            }
        }

        debug!(
            site = %site.path.display(),
            matches = matches.len(),
            "site vulnerability scan complete"
        );

        VulnScanResult {
            site_path: site.path.clone(),
            matches,
            scan_duration: start.elapsed(),
        }
    }

    fn collect(
        &self,
        matches: &mut Vec<VulnMatch>,
        software_type: SoftwareType,
        slug: &str,
        name: &str,
        version: &str,
        path: &PathBuf,
    ) {
        for vuln in self.index.vulnerabilities_for(software_type, slug, version) {
            if !self.should_include(vuln) {
                continue;
            }
            matches.push(VulnMatch {
                vulnerability: vuln.clone(),
                software_type,
                slug: slug.to_string(),
                name: name.to_string(),
                version: version.to_string(),
                path: path.clone(),
            });
        }
    }

    fn should_include(&self, vuln: &Vulnerability) -> bool {
        if vuln.informational && !self.options.informational {
            return false;
        }

        if !self.options.include_ids.is_empty()
            && !self.options.include_ids.iter().any(|id| id == &vuln.id)
        {
            return false;
        }

        !self.options.exclude_ids.iter().any(|id| id == &vuln.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wordpress::Plugin;

    fn index() -> VulnerabilityIndex {
        let feed = r#"{
            "vuln-acme": {
                "title": "Acme SQLi",
                "software": [{
                    "type": "plugin",
                    "slug": "acme",
                    "affected_versions": {
                        "r": {"from_version": "1.0", "from_inclusive": true,
                              "to_version": "2.0", "to_inclusive": false}
                    }
                }]
            },
            "vuln-core-info": {
                "title": "Core note",
                "informational": true,
                "software": [{
                    "type": "core",
                    "slug": "wordpress",
                    "affected_versions": {
                        "all": {"from_version": "*", "to_version": "*"}
                    }
                }]
            }
        }"#;
        VulnerabilityIndex::from_json(feed.as_bytes()).unwrap()
    }

    fn site() -> Site {
        Site {
            path: PathBuf::from("/var/www/site"),
            core_path: PathBuf::from("/var/www/site"),
            version: "6.4".into(),
            plugins: vec![
                Plugin {
                    slug: "acme".into(),
                    name: "Acme".into(),
                    version: "1.2.5".into(),
                    path: PathBuf::from("/var/www/site/wp-content/plugins/acme"),
                },
                Plugin {
                    slug: "no-version".into(),
                    name: "NoVersion".into(),
                    version: String::new(),
                    path: PathBuf::new(),
                },
            ],
            themes: Vec::new(),
        }
    }

    #[test]
    fn test_scan_site_matches_plugin() {
        let scanner = VulnScanner::new(index(), VulnScanOptions::default());
        let result = scanner.scan_site(&site());

        assert_eq!(result.matches.len(), 1);
        let m = &result.matches[0];
        assert_eq!(m.slug, "acme");
        assert_eq!(m.software_type, SoftwareType::Plugin);
        assert_eq!(m.vulnerability.id, "vuln-acme");
    }

    #[test]
    fn test_informational_excluded_by_default() {
        let scanner = VulnScanner::new(index(), VulnScanOptions::default());
        let result = scanner.scan_site(&site());
        assert!(result.matches.iter().all(|m| !m.vulnerability.informational));

        let scanner = VulnScanner::new(
            index(),
            VulnScanOptions {
                informational: true,
                ..Default::default()
            },
        );
        let result = scanner.scan_site(&site());
        assert_eq!(result.matches.len(), 2);
    }

    #[test]
    fn test_include_exclude_lists() {
        let scanner = VulnScanner::new(
            index(),
            VulnScanOptions {
                exclude_ids: vec!["vuln-acme".into()],
                ..Default::default()
            },
        );
        assert!(scanner.scan_site(&site()).matches.is_empty());

        let scanner = VulnScanner::new(
            index(),
            VulnScanOptions {
                informational: true,
                include_ids: vec!["vuln-core-info".into()],
                ..Default::default()
            },
        );
        let result = scanner.scan_site(&site());
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].vulnerability.id, "vuln-core-info");
    }

    #[test]
    fn test_disabled_categories() {
        let scanner = VulnScanner::new(
            index(),
            VulnScanOptions {
                check_plugins: false,
                ..Default::default()
            },
        );
        assert!(scanner.scan_site(&site()).matches.is_empty());
    }
}
