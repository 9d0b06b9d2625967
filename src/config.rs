//! Run configuration.
//!
//! Handles loading, validating, and merging `imgopt.toml`. User values are
//! merged over stock defaults, so a config file only needs the keys it wants
//! to change. The resolved [`OptimizerConfig`] is built once per run and
//! passed by reference to every component; nothing reads configuration from
//! ambient globals.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! input_dir = "images"          # Directory scanned for source images
//! output_dir = "optimized"      # Where outputs are written (mirrors input layout)
//! formats = ["webp", "avif"]    # Output encodings per source image
//! sizes = []                    # Max widths; empty = original size only
//! force = false                 # Ignore timestamps and reprocess everything
//!
//! [quality]                     # Default quality per format (1-100)
//! webp = 80
//! avif = 60
//! jpeg = 82
//! png = 90
//!
//! [[rules]]                     # Overrides, most specific match wins
//! pattern = "*-hero.*"          # Glob against the file name
//! directory = "marketing"       # Prefix of the path relative to input_dir
//! min_width = 2000              # Probed pixel width bounds
//! max_width = 4000
//! quality = { webp = 95 }
//!
//! [retry]
//! max_retries = 3               # Total attempts per file
//! base_delay_ms = 1000
//! exponential_backoff = true    # delay = base * 2^(attempt-1)
//! continue_on_error = false     # false = first fatal file error aborts the batch
//!
//! [state]
//! state_file = ".imgopt-state.json"
//! error_log = ".imgopt-errors.jsonl"
//!
//! [lfs]
//! enabled = true                # Detect Git LFS pointer files
//! auto_pull = true              # Try `git lfs pull` before giving up on a pointer
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::OutputFormat;
use crate::quality::{CompiledRules, QualityMap, QualityRule};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid glob in quality rule: {0}")]
    Glob(#[from] globset::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Output encodings, in the order outputs are produced.
    pub formats: Vec<OutputFormat>,
    /// Maximum output widths. Empty means a single original-size output per format.
    pub sizes: Vec<u32>,
    /// Reprocess every file regardless of output timestamps.
    pub force: bool,
    /// Default quality per format.
    pub quality: QualityMap,
    /// Per-file quality overrides.
    pub rules: Vec<QualityRule>,
    pub retry: RetryConfig,
    pub state: StateConfig,
    pub lfs: LfsConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("images"),
            output_dir: PathBuf::from("optimized"),
            formats: vec![OutputFormat::Webp, OutputFormat::Avif],
            sizes: Vec::new(),
            force: false,
            quality: default_quality(),
            rules: Vec::new(),
            retry: RetryConfig::default(),
            state: StateConfig::default(),
            lfs: LfsConfig::default(),
        }
    }
}

fn default_quality() -> QualityMap {
    QualityMap::from([
        (OutputFormat::Webp, 80),
        (OutputFormat::Avif, 60),
        (OutputFormat::Jpeg, 82),
        (OutputFormat::Png, 90),
    ])
}

impl OptimizerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.formats.is_empty() {
            return Err(ConfigError::Validation("formats must not be empty".into()));
        }
        for format in &self.formats {
            if !self.quality.contains_key(format) {
                return Err(ConfigError::Validation(format!(
                    "quality.{format} is required because {format} is an output format"
                )));
            }
        }
        check_quality_map("quality", &self.quality)?;
        if self.sizes.contains(&0) {
            return Err(ConfigError::Validation("sizes must be non-zero".into()));
        }
        if self.input_dir == self.output_dir {
            return Err(ConfigError::Validation(
                "output_dir must differ from input_dir".into(),
            ));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.specificity() == 0 {
                return Err(ConfigError::Validation(format!(
                    "rules[{i}] declares no match criteria"
                )));
            }
            if let (Some(min), Some(max)) = (rule.min_width, rule.max_width)
                && min > max
            {
                return Err(ConfigError::Validation(format!(
                    "rules[{i}].min_width must not exceed max_width"
                )));
            }
            check_quality_map(&format!("rules[{i}].quality"), &rule.quality)?;
        }
        CompiledRules::new(&self.rules)?;
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Validation(
                "retry.max_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// JSON snapshot stored in the run state for auditability.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn check_quality_map(label: &str, map: &QualityMap) -> Result<(), ConfigError> {
    for (format, q) in map {
        if !(1..=100).contains(q) {
            return Err(ConfigError::Validation(format!(
                "{label}.{format} must be 1-100"
            )));
        }
    }
    Ok(())
}

/// Retry envelope settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub exponential_backoff: bool,
    /// Record fatal file errors and keep going instead of aborting the batch.
    pub continue_on_error: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            exponential_backoff: true,
            continue_on_error: false,
        }
    }
}

/// Locations of the persisted run state and the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    pub state_file: PathBuf,
    pub error_log: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(".imgopt-state.json"),
            error_log: PathBuf::from(".imgopt-errors.jsonl"),
        }
    }
}

/// Git LFS pointer handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LfsConfig {
    pub enabled: bool,
    pub auto_pull: bool,
}

impl Default for LfsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_pull: true,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged on top of.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(OptimizerConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
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

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<OptimizerConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: OptimizerConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path`, falling back to stock defaults when absent.
pub fn load_config(path: &Path) -> Result<OptimizerConfig, ConfigError> {
    let overlay = load_raw_config(path)?;
    if overlay.is_some() {
        tracing::debug!(path = %path.display(), "loaded config file");
    }
    resolve_config(stock_defaults_value(), overlay)
}

/// Returns a fully-commented stock `imgopt.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgopt configuration
# ====================
# Every key is optional; the values below are the defaults.

# Directory scanned (recursively) for source images.
input_dir = "images"

# Where outputs are written. The input directory layout is mirrored here.
output_dir = "optimized"

# Output encodings produced for every source image.
# Available: "webp", "avif", "jpeg", "png"
formats = ["webp", "avif"]

# Maximum output widths. Each width produces `<name>-<width>.<ext>`.
# Leave empty to produce one original-size `<name>.<ext>` per format.
sizes = []

# Reprocess every file even when its outputs are newer than the source.
force = false

# Default quality per format (1-100).
[quality]
webp = 80
avif = 60
jpeg = 82
png = 90

# Quality overrides. A rule matches when ALL of its criteria hold:
#   pattern   - glob against the file name
#   directory - prefix of the file's directory relative to input_dir
#   min_width / max_width - probed pixel width bounds (inclusive)
# The rule declaring the most criteria wins; ties go to the later rule.
#
# [[rules]]
# pattern = "*-hero.*"
# directory = "marketing"
# quality = { webp = 95 }

[retry]
# Total attempts per file, including the first.
max_retries = 3
base_delay_ms = 1000
# When true, the delay doubles on every retry.
exponential_backoff = true
# When false, the first file that fails for good aborts the batch.
continue_on_error = false

[state]
# Resumable run state (rewritten after every file).
state_file = ".imgopt-state.json"
# Append-only JSON-lines error audit log.
error_log = ".imgopt-errors.jsonl"

[lfs]
# Detect Git LFS pointer files instead of feeding them to the decoder.
enabled = true
# Run `git lfs pull` for pointers before giving up on them.
auto_pull = true
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = OptimizerConfig::default();
        assert_eq!(config.input_dir, PathBuf::from("images"));
        assert_eq!(config.formats, vec![OutputFormat::Webp, OutputFormat::Avif]);
        assert_eq!(config.quality[&OutputFormat::Webp], 80);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert!(!config.retry.continue_on_error);
        assert_eq!(config.state.state_file, PathBuf::from(".imgopt-state.json"));
        assert!(config.lfs.enabled);
    }

    #[test]
    fn validate_default_config_passes() {
        OptimizerConfig::default().validate().unwrap();
    }

    #[test]
    fn stock_config_toml_matches_defaults() {
        let config: OptimizerConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, OptimizerConfig::default());
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
formats = ["jpeg"]

[retry]
continue_on_error = true
"#;
        let config: OptimizerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.formats, vec![OutputFormat::Jpeg]);
        assert!(config.retry.continue_on_error);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn parse_rules() {
        let toml = r#"
[[rules]]
pattern = "*-hero.*"
directory = "marketing"
quality = { webp = 95 }

[[rules]]
min_width = 3000
quality = { avif = 40 }
"#;
        let config: OptimizerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].pattern.as_deref(), Some("*-hero.*"));
        assert_eq!(config.rules[0].quality[&OutputFormat::Webp], 95);
        assert_eq!(config.rules[1].min_width, Some(3000));
        assert!(config.rules[1].pattern.is_none());
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("imgopt.toml")).unwrap();
        assert_eq!(config, OptimizerConfig::default());
    }

    #[test]
    fn load_config_merges_over_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("imgopt.toml");
        fs::write(
            &path,
            r#"
input_dir = "assets/raw"

[quality]
webp = 70
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.input_dir, PathBuf::from("assets/raw"));
        assert_eq!(config.quality[&OutputFormat::Webp], 70);
        // Merged table keeps the other defaults
        assert_eq!(config.quality[&OutputFormat::Avif], 60);
        assert_eq!(config.output_dir, PathBuf::from("optimized"));
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("imgopt.toml");
        fs::write(&path, "formats = [").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("imgopt.toml");
        fs::write(&path, "[retry]\nmax_retry = 5\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unknown_format_rejected() {
        let result: Result<OptimizerConfig, _> = toml::from_str(r#"formats = ["gif"]"#);
        assert!(result.is_err());
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_empty_formats() {
        let config = OptimizerConfig {
            formats: vec![],
            ..OptimizerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_format_without_quality() {
        let mut config = OptimizerConfig::default();
        config.quality.remove(&OutputFormat::Avif);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("quality.avif"));
    }

    #[test]
    fn validate_quality_out_of_range() {
        let mut config = OptimizerConfig::default();
        config.quality.insert(OutputFormat::Webp, 101);
        assert!(config.validate().is_err());
        config.quality.insert(OutputFormat::Webp, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rule_without_criteria() {
        let config = OptimizerConfig {
            rules: vec![QualityRule {
                quality: QualityMap::from([(OutputFormat::Webp, 50)]),
                ..QualityRule::default()
            }],
            ..OptimizerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no match criteria"));
    }

    #[test]
    fn validate_rule_inverted_width_bounds() {
        let config = OptimizerConfig {
            rules: vec![QualityRule {
                min_width: Some(2000),
                max_width: Some(1000),
                ..QualityRule::default()
            }],
            ..OptimizerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_bad_glob() {
        let config = OptimizerConfig {
            rules: vec![QualityRule {
                pattern: Some("[unclosed".into()),
                ..QualityRule::default()
            }],
            ..OptimizerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Glob(_))));
    }

    #[test]
    fn validate_output_equal_to_input() {
        let config = OptimizerConfig {
            input_dir: PathBuf::from("imgs"),
            output_dir: PathBuf::from("imgs"),
            ..OptimizerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_zero_size() {
        let config = OptimizerConfig {
            sizes: vec![800, 0],
            ..OptimizerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Value = toml::from_str("a = 10").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"].as_integer(), Some(10));
        assert_eq!(merged["b"].as_integer(), Some(2));
    }

    #[test]
    fn merge_toml_arrays_replace() {
        let base: toml::Value = toml::from_str("formats = [\"webp\", \"avif\"]").unwrap();
        let overlay: toml::Value = toml::from_str("formats = [\"png\"]").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["formats"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_is_json_object() {
        let snap = OptimizerConfig::default().snapshot();
        assert_eq!(snap["retry"]["max_retries"], 3);
        assert_eq!(snap["quality"]["webp"], 80);
    }
}
