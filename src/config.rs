//! Resolver configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! serialized to a TOML value, the user file is merged on top of them, and the
//! merged value is deserialized and validated.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! document_root = "public"        # Directory URLs are mapped onto
//! site_url = "http://localhost"   # Public origin of document_root
//! library = "library.json"        # Item library written by `index`
//! quality = 90                    # Encoder quality for variants (1-100)
//! # cdn_url = "https://cdn.example.com"  # Rewrite site_url to this origin
//!
//! [sizes.thumbnail]
//! width = 150
//! height = 150
//! crop = true
//!
//! [sizes.medium]
//! width = 300
//! height = 300
//!
//! [sizes.large]
//! width = 1024
//! height = 1024
//!
//! [processing]
//! max_processes = 4               # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse — override just the values you want. Named sizes
//! merge key by key, so adding `[sizes.banner]` keeps the stock presets.
//!
//! Unknown keys are rejected to catch typos early.

use crate::resolve::VariantRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Size name that always means the untouched original.
pub const FULL_SIZE: &str = "full";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Resolver configuration loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Directory that URL paths are mapped onto.
    pub document_root: PathBuf,
    /// Public origin of the document root, used when indexing.
    pub site_url: String,
    /// JSON item library consulted for item references.
    pub library: PathBuf,
    /// Encoder quality for generated variants.
    pub quality: u32,
    /// When set, descriptor URLs under `site_url` are rewritten to this origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdn_url: Option<String>,
    /// Named target boxes.
    pub sizes: BTreeMap<String, SizePreset>,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from("public"),
            site_url: "http://localhost".to_string(),
            library: PathBuf::from("library.json"),
            quality: 90,
            cdn_url: None,
            sizes: default_sizes(),
            processing: ProcessingConfig::default(),
        }
    }
}

fn default_sizes() -> BTreeMap<String, SizePreset> {
    BTreeMap::from([
        ("thumbnail".to_string(), SizePreset::new(150, 150, true)),
        ("medium".to_string(), SizePreset::new(300, 300, false)),
        ("large".to_string(), SizePreset::new(1024, 1024, false)),
    ])
}

impl ResolverConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigError::Validation("quality must be 1-100".into()));
        }
        if let Err(e) = url::Url::parse(&self.site_url) {
            return Err(ConfigError::Validation(format!(
                "site_url {:?} is not a valid URL: {}",
                self.site_url, e
            )));
        }
        if let Some(cdn) = &self.cdn_url
            && let Err(e) = url::Url::parse(cdn)
        {
            return Err(ConfigError::Validation(format!(
                "cdn_url {:?} is not a valid URL: {}",
                cdn, e
            )));
        }
        for (name, preset) in &self.sizes {
            if name == FULL_SIZE {
                return Err(ConfigError::Validation(format!(
                    "sizes.{} is reserved for the original image",
                    FULL_SIZE
                )));
            }
            if preset.width == 0 || preset.height == 0 {
                return Err(ConfigError::Validation(format!(
                    "sizes.{} width and height must be non-zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// A named target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizePreset {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub crop: bool,
}

impl SizePreset {
    pub fn new(width: u32, height: u32, crop: bool) -> Self {
        Self {
            width,
            height,
            crop,
        }
    }

    pub fn request(&self) -> VariantRequest {
        VariantRequest::new(self.width, self.height, self.crop)
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers for batch resolution.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Stock defaults as a TOML value, the base layer for merging.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ResolverConfig::default())?)
}

/// Deep-merge `overlay` onto `base`. Tables merge key by key; any other
/// value in the overlay replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value. A missing file is `None`.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto `base`, deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ResolverConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ResolverConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load `path` over the stock defaults. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<ResolverConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// A commented config file with every option at its default.
pub fn stock_config_toml() -> &'static str {
    r##"# Image Variants Configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Directory that image URLs are mapped onto. Generated variants are written
# next to their source files inside it.
document_root = "public"

# Public origin of document_root. Used by `index` to build item URLs.
site_url = "http://localhost"

# Item library (JSON) used to resolve --id references. Rebuild with `index`.
library = "library.json"

# Encoder quality for generated variants (1 = worst, 100 = best).
quality = 90

# Serve variants from another origin: URLs starting with site_url are
# rewritten to start with cdn_url instead.
# cdn_url = "https://cdn.example.com"

# ---------------------------------------------------------------------------
# Named sizes
# ---------------------------------------------------------------------------
# Each [sizes.NAME] table is a target box. crop = true cuts to the exact box;
# otherwise the image is scaled to fit inside it. "full" is reserved and
# always means the original image.
[sizes.thumbnail]
width = 150
height = 150
crop = true

[sizes.medium]
width = 300
height = 300
crop = false

[sizes.large]
width = 1024
height = 1024
crop = false

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for `batch`.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
