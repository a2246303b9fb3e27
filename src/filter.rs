// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - File Filter
 * Include/deny path rules deciding which files enter the scan
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

static PATTERN_PHP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:php(?:\d+)?|phtml)(\.|$)").expect("static pattern"));
static PATTERN_HTML: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:html?)(\.|$)").expect("static pattern"));
static PATTERN_JS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:js|svg)(\.|$)").expect("static pattern"));
static PATTERN_MEDIA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\.(?:jpg|jpeg|mp3|avi|m4v|mov|mp4|gif|png|tiff?|svg|sql|js|tbz2?|bz2?|xz|zip|tgz|gz|tar|log|err\d+)(\.|$)",
    )
    .expect("static pattern")
});

type PathTest = Box<dyn Fn(&str) -> bool + Send + Sync>;

struct FilterCondition {
    test: PathTest,
    allow: bool,
}

/// Ordered include/deny rules. A path passes when at least one allow
/// condition matches and no deny condition matches.
pub struct FileFilter {
    conditions: Vec<FilterCondition>,
}

impl FileFilter {
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    pub fn allow(&mut self, test: impl Fn(&str) -> bool + Send + Sync + 'static) -> &mut Self {
        self.conditions.push(FilterCondition {
            test: Box::new(test),
            allow: true,
        });
        self
    }

    pub fn deny(&mut self, test: impl Fn(&str) -> bool + Send + Sync + 'static) -> &mut Self {
        self.conditions.push(FilterCondition {
            test: Box::new(test),
            allow: false,
        });
        self
    }

    /// True when the path should be scanned
    pub fn matches(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        let mut allowed = false;

        for condition in &self.conditions {
            if condition.allow && allowed {
                // A single matching allow condition is enough.
                continue;
            }
            if (condition.test)(&path_str) {
                if condition.allow {
                    allowed = true;
                } else {
                    // Any deny condition wins.
                    return false;
                }
            }
        }

        allowed
    }

    /// PHP, HTML and JS/SVG files, the malware scanning default
    pub fn default_malware() -> Self {
        let mut filter = Self::new();
        filter.allow(is_php).allow(is_html).allow(is_js);
        filter
    }

    pub fn all_files() -> Self {
        let mut filter = Self::new();
        filter.allow(|_| true);
        filter
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        Self::default_malware()
    }
}

impl std::fmt::Debug for FileFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileFilter")
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

pub fn is_php(path: &str) -> bool {
    PATTERN_PHP.is_match(path)
}

pub fn is_html(path: &str) -> bool {
    PATTERN_HTML.is_match(path)
}

pub fn is_js(path: &str) -> bool {
    PATTERN_JS.is_match(path)
}

pub fn is_media(path: &str) -> bool {
    PATTERN_MEDIA.is_match(path)
}

/// Test matching an exact file name
pub fn filename_test(filename: impl Into<String>) -> impl Fn(&str) -> bool + Send + Sync {
    let filename = filename.into();
    move |path: &str| {
        Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy() == filename.as_str())
            .unwrap_or(false)
    }
}

/// Test matching one or more file extensions (leading dot optional)
pub fn extension_test(extensions: &[&str]) -> impl Fn(&str) -> bool + Send + Sync {
    let wanted: Vec<String> = extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect();
    move |path: &str| {
        Path::new(path)
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                wanted.iter().any(|w| *w == ext)
            })
            .unwrap_or(false)
    }
}

/// Test from a user-supplied regex pattern
pub fn pattern_test(pattern: &str) -> Result<impl Fn(&str) -> bool + Send + Sync> {
    let regex = Regex::new(pattern).with_context(|| format!("invalid filter pattern {pattern:?}"))?;
    Ok(move |path: &str| regex.is_match(path))
}

/// Caller-supplied include/exclude lists layered over the defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub include_files: Vec<String>,

    #[serde(default)]
    pub include_patterns: Vec<String>,

    #[serde(default)]
    pub exclude_files: Vec<String>,

    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    #[serde(default)]
    pub include_all: bool,
}

impl FilterConfig {
    /// Compile the configuration into a filter
    pub fn build(&self) -> Result<FileFilter> {
        let mut filter = if self.include_all {
            FileFilter::all_files()
        } else {
            FileFilter::default_malware()
        };

        if !self.include_all {
            for filename in &self.include_files {
                filter.allow(filename_test(filename.clone()));
            }
            for pattern in &self.include_patterns {
                filter.allow(pattern_test(pattern)?);
            }
        }

        for filename in &self.exclude_files {
            filter.deny(filename_test(filename.clone()));
        }
        for pattern in &self.exclude_patterns {
            filter.deny(pattern_test(pattern)?);
        }

        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_accepts_web_files() {
        let filter = FileFilter::default_malware();

        assert!(filter.matches(Path::new("/var/www/index.php")));
        assert!(filter.matches(Path::new("/var/www/legacy.php5")));
        assert!(filter.matches(Path::new("/var/www/view.phtml")));
        assert!(filter.matches(Path::new("/var/www/page.HTML")));
        assert!(filter.matches(Path::new("/var/www/app.js")));
        assert!(filter.matches(Path::new("/var/www/logo.svg")));
        // Double extensions still match.
        assert!(filter.matches(Path::new("/var/www/shell.php.bak")));

        assert!(!filter.matches(Path::new("/var/www/photo.jpg")));
        assert!(!filter.matches(Path::new("/var/www/notes.txt")));
        assert!(!filter.matches(Path::new("/var/www/phpinfo")));
    }

    #[test]
    fn test_deny_overrides_allow() {
        let mut filter = FileFilter::default_malware();
        filter.deny(filename_test("blocked.php"));

        assert!(filter.matches(Path::new("/site/ok.php")));
        assert!(!filter.matches(Path::new("/site/blocked.php")));
    }

    #[test]
    fn test_empty_filter_allows_nothing() {
        let filter = FileFilter::new();
        assert!(!filter.matches(Path::new("/any/file.php")));
    }

    #[test]
    fn test_extension_test() {
        let test = extension_test(&["php", ".inc"]);
        assert!(test("/a/b.php"));
        assert!(test("/a/b.INC"));
        assert!(!test("/a/b.txt"));
        assert!(!test("/a/noext"));
    }

    #[test]
    fn test_pattern_test() {
        let test = pattern_test(r"wp-content/uploads/.*\.php$").unwrap();
        assert!(test("/site/wp-content/uploads/x.php"));
        assert!(!test("/site/wp-includes/x.php"));

        assert!(pattern_test(r"(broken").is_err());
    }

    #[test]
    fn test_filter_config_build() {
        let config = FilterConfig {
            include_files: vec!["wp-config.php.bak2".into()],
            include_patterns: vec![r"\.inc$".into()],
            exclude_files: vec!["jquery.js".into()],
            exclude_patterns: vec![r"node_modules/".into()],
            include_all: false,
        };
        let filter = config.build().unwrap();

        assert!(filter.matches(Path::new("/s/a.php")));
        assert!(filter.matches(Path::new("/s/lib.inc")));
        assert!(filter.matches(Path::new("/s/wp-config.php.bak2")));
        assert!(!filter.matches(Path::new("/s/jquery.js")));
        assert!(!filter.matches(Path::new("/s/node_modules/a.js")));
    }

    #[test]
    fn test_include_all() {
        let config = FilterConfig {
            include_all: true,
            exclude_patterns: vec![r"\.log$".into()],
            ..Default::default()
        };
        let filter = config.build().unwrap();

        assert!(filter.matches(Path::new("/s/whatever.bin")));
        assert!(!filter.matches(Path::new("/s/debug.log")));
    }
}
