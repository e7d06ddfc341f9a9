// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 tagdex contributors

//! Configuration management for tagdex
//!
//! Settings are explicit values handed to the catalog and the dimension
//! optimizer, never read from ambient global state.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Separator between tags in caption sidecar files
    #[serde(default = "default_tag_separator")]
    pub tag_separator: String,

    /// Append a space to the separator when joining tags
    #[serde(default = "default_true")]
    pub insert_space_after_separator: bool,

    /// Comma-separated list of recognized image file extensions
    #[serde(default = "default_image_file_formats")]
    pub image_file_formats: String,

    /// Export dimension settings
    #[serde(default)]
    pub export: ExportConfig,
}

/// Settings consumed by the target dimension optimizer
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// Target resolution cap; exported pixels never exceed its square.
    /// 0 disables rescaling (bucket alignment only).
    #[serde(default = "default_resolution")]
    pub resolution: u32,

    /// Bucket alignment modulus; export dimensions are multiples of this
    #[serde(default = "default_bucket_size")]
    pub bucket_size: u32,

    /// Whether images may be scaled above their native size
    #[serde(default)]
    pub upscaling: bool,

    /// Comma-separated `W:H` pairs favored by the optimizer
    #[serde(default = "default_preferred_sizes")]
    pub preferred_sizes: String,
}

fn default_tag_separator() -> String {
    ",".to_string()
}
fn default_true() -> bool {
    true
}
fn default_image_file_formats() -> String {
    "bmp, gif, jpg, jpeg, png, tif, tiff, webp".to_string()
}
fn default_resolution() -> u32 {
    1024
}
fn default_bucket_size() -> u32 {
    64
}
fn default_preferred_sizes() -> String {
    "1024:1024, 1408:704, 1216:832, 1152:896, 1344:768, 1536:640".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tag_separator: default_tag_separator(),
            insert_space_after_separator: true,
            image_file_formats: default_image_file_formats(),
            export: ExportConfig::default(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            bucket_size: default_bucket_size(),
            upscaling: false,
            preferred_sizes: default_preferred_sizes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content).map_err(|e| {
                crate::TagdexError::Config(format!("Failed to parse config: {}", e))
            })?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The separator actually used when joining and splitting captions
    pub fn effective_separator(&self) -> String {
        if self.insert_space_after_separator {
            format!("{} ", self.tag_separator)
        } else {
            self.tag_separator.clone()
        }
    }

    /// Recognized image extensions, lowercased and with a leading dot
    pub fn image_suffixes(&self) -> Vec<String> {
        self.image_file_formats
            .split(',')
            .map(|suffix| suffix.trim().to_lowercase())
            .filter(|suffix| !suffix.is_empty())
            .map(|suffix| {
                if suffix.starts_with('.') {
                    suffix
                } else {
                    format!(".{}", suffix)
                }
            })
            .collect()
    }
}

impl ExportConfig {
    /// Parse the preferred sizes into `(width, height)` pairs.
    ///
    /// Each entry is normalized to landscape-first and also registers its
    /// transpose. Malformed entries are skipped with a warning.
    pub fn preferred_size_pairs(&self) -> Vec<(u32, u32)> {
        let mut pairs = Vec::new();
        for entry in self.preferred_sizes.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let mut parts = entry.splitn(2, ':');
            let parsed = match (parts.next(), parts.next()) {
                (Some(a), Some(b)) => {
                    match (a.trim().parse::<u32>(), b.trim().parse::<u32>()) {
                        (Ok(a), Ok(b)) => Some((a.max(b), a.min(b))),
                        _ => None,
                    }
                }
                _ => None,
            };
            match parsed {
                Some((width, height)) => {
                    pairs.push((width, height));
                    if width != height {
                        pairs.push((height, width));
                    }
                }
                None => {
                    tracing::warn!("Invalid preferred size '{}', skipping", entry);
                }
            }
        }
        pairs
    }
}
