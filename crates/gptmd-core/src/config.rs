//! Configuration management for gptmd.
//!
//! Loads configuration from ${GPTMD_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::canvas::PendingScope;
use crate::files::expand_home;

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
/// To update, edit default_config.toml directly (or run `cargo xtask`).
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Recursively merges items from source table into target table.
fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source.iter() {
        match value {
            Item::Value(v) => {
                // Scalar value: override in target
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                // Nested table: recursively merge
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    // Target doesn't have this table, copy it
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(src_arr) => {
                // Array of tables: replace entirely
                target[key] = Item::ArrayOfTables(src_arr.clone());
            }
            Item::None => {}
        }
    }
}

pub mod paths {
    //! Path resolution for gptmd configuration.
    //!
    //! GPTMD_HOME resolution order:
    //! 1. GPTMD_HOME environment variable (if set)
    //! 2. ~/.config/gptmd (default)

    use std::path::PathBuf;

    /// Returns the gptmd home directory.
    ///
    /// Checks GPTMD_HOME env var first, falls back to ~/.config/gptmd
    /// (or `./.gptmd` when no home directory can be determined).
    pub fn gptmd_home() -> PathBuf {
        if let Ok(home) = std::env::var("GPTMD_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".gptmd"),
            |h| h.join(".config").join("gptmd"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        gptmd_home().join("config.toml")
    }
}

/// Time zone used for displayed timestamps and filename prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeZoneMode {
    /// The machine's local time zone (default)
    #[default]
    Local,
    Utc,
}

impl TimeZoneMode {
    /// Formats `ts` with a chrono format string in this time zone.
    pub fn format(self, ts: DateTime<Utc>, fmt: &str) -> String {
        match self {
            TimeZoneMode::Local => ts.with_timezone(&Local).format(fmt).to_string(),
            TimeZoneMode::Utc => ts.format(fmt).to_string(),
        }
    }
}

/// Rendering options for one export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Show a timestamp line under each message heading
    pub show_timestamps: bool,
    /// Render every role instead of only user/assistant
    pub all_roles: bool,
    /// Show image-generation prompts under generated images
    pub show_image_prompts: bool,
    /// Render roles other than user/assistant as blockquotes
    pub quote_other_roles: bool,
    /// How announced canvas edits are matched to documents
    pub pending_scope: PendingScope,
    pub timezone: TimeZoneMode,
    /// Maximum display width of embedded images, in pixels
    pub image_max_width: u32,
}

impl ExportOptions {
    pub const DEFAULT_IMAGE_MAX_WIDTH: u32 = 360;
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            show_timestamps: false,
            all_roles: false,
            show_image_prompts: false,
            quote_other_roles: false,
            pending_scope: PendingScope::default(),
            timezone: TimeZoneMode::default(),
            image_max_width: Self::DEFAULT_IMAGE_MAX_WIDTH,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset
    pub level: Option<String>,
    /// Optional log file (appended to)
    pub file: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend API base URL (for proxies and tests)
    pub base_url: Option<String>,

    /// Bearer token for the backend API
    pub access_token: Option<String>,

    /// Directory exported files are written to
    pub output_dir: Option<String>,

    /// Literal token that starts every exported filename
    pub filename_prefix: String,

    /// Rendering options
    #[serde(default)]
    pub export: ExportOptions,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub const DEFAULT_FILENAME_PREFIX: &str = "chatgpt";

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Returns the configured access token if set and non-empty.
    pub fn effective_access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Returns the configured base URL if set and non-empty.
    pub fn effective_base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Returns the output directory (`~/` expanded), defaulting to the current directory.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| PathBuf::from("."), expand_home)
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Generates a fresh config TOML from Rust defaults.
    ///
    /// This is used by `cargo xtask` to keep `default_config.toml` in sync
    /// with Rust default values. Uses the embedded template for
    /// structure/comments and merges generated values into it.
    ///
    /// # Errors
    /// Returns an error if the defaults or the template fail to (de)serialize.
    pub fn generate() -> Result<String> {
        use toml_edit::DocumentMut;

        let generated_toml = toml::to_string(&Config::default())
            .context("Failed to serialize default config to TOML")?;

        // Parse template as base (preserves comments)
        let mut doc: DocumentMut = default_config_template()
            .parse()
            .context("Failed to parse default config template")?;

        let generated_doc: DocumentMut = generated_toml
            .parse()
            .context("Failed to parse generated config")?;

        merge_items(doc.as_table_mut(), generated_doc.as_table());

        Ok(doc.to_string())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            access_token: None,
            output_dir: None,
            filename_prefix: Self::DEFAULT_FILENAME_PREFIX.to_string(),
            export: ExportOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}
