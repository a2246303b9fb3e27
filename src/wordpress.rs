// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - WordPress Site Model
 * Consumer-side view of a discovered installation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An installed plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub slug: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub path: PathBuf,
}

/// An installed theme
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub slug: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub path: PathBuf,
}

/// A WordPress installation as produced by an upstream discovery step.
/// This module does not parse site headers itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Site {
    #[serde(default)]
    pub path: PathBuf,

    #[serde(default)]
    pub core_path: PathBuf,

    /// Core version; empty when unknown
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub plugins: Vec<Plugin>,

    #[serde(default)]
    pub themes: Vec<Theme>,
}

impl Site {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("parsing site description")
    }
}
