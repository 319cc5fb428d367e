//! Configuration loading and root folder resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or malformed TOML file never aborts startup: a warning is logged
//! and the compiled defaults apply.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable overriding the data root folder
pub const ROOT_FOLDER_ENV: &str = "TUBEBOX_ROOT_FOLDER";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 4200;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    /// HTTP server port
    pub port: Option<u16>,

    /// Root folder for cache, history and queue files
    pub root_folder: Option<PathBuf>,

    /// Credential for the official data API (optional)
    pub api_key: Option<String>,

    pub resolver: ResolverSection,
    pub extractor: ExtractorSection,
    pub playback: PlaybackSection,
    pub logging: LoggingConfig,
}

/// Resolver settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverSection {
    /// Base URL of the official data API
    pub api_base_url: String,
    /// Attempts against the official API before falling back
    pub api_attempts: u32,
    /// Seconds the quota breaker stays tripped
    pub quota_cooldown_secs: u64,
    /// Maximum search results returned
    pub search_limit: usize,
    /// Maximum related tracks returned
    pub related_limit: usize,
    /// Per-request timeout against the official API
    pub request_timeout_secs: u64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            api_attempts: 3,
            quota_cooldown_secs: 6 * 60 * 60,
            search_limit: 10,
            related_limit: 10,
            request_timeout_secs: 15,
        }
    }
}

/// External extraction tool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorSection {
    /// Extractor executable (looked up on PATH when not absolute)
    pub binary: String,
    /// Ceiling for metadata invocations
    pub timeout_secs: u64,
    /// Longest silence tolerated while streaming audio bytes
    pub stall_timeout_secs: u64,
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            timeout_secs: 45,
            stall_timeout_secs: 30,
        }
    }
}

/// Playback service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSection {
    /// Refill an emptied queue with related tracks
    pub autofill: bool,
    /// How many related tracks an autofill enqueues
    pub autofill_count: usize,
    /// Warm the cache for the next queued track
    pub prefetch_next: bool,
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            autofill: true,
            autofill_count: 5,
            prefetch_next: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load configuration, degrading to defaults on any failure
    ///
    /// With an explicit path only that file is considered; otherwise the
    /// platform config locations are searched.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        };

        let Some(path) = path else {
            info!("No config file found, using built-in defaults");
            return Self::default();
        };

        match Self::from_file(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "Could not load config file {}: {} (using built-in defaults)",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}

/// First existing platform config file, if any
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("tubebox").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/tubebox/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub port: u16,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = dirs::data_local_dir()
            .map(|d| d.join("tubebox"))
            .unwrap_or_else(|| PathBuf::from("./tubebox_data"));

        Self {
            root_folder,
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
        }
    }
}

/// Root folder resolution following the documented priority order
#[derive(Debug, Default)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml_value(mut self, path: Option<PathBuf>) -> Self {
        self.toml_value = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &self.toml_value {
            return path.clone();
        }

        // Priority 4: OS-dependent compiled default
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Create the root folder and its cache subdirectory if missing
pub fn ensure_root_folder(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root.join("cache")).map_err(|e| {
        Error::Config(format!(
            "Cannot create data folder {}: {}",
            root.display(),
            e
        ))
    })
}
