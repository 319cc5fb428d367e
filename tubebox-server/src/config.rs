//! Runtime configuration for tubebox-server
//!
//! Merges command-line overrides onto the TOML bootstrap file (see
//! `tubebox_common::config`) and derives the on-disk layout under the root
//! folder.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tubebox_common::config::{
    ExtractorSection, PlaybackSection, ResolverSection, RootFolderResolver, TomlConfig,
    DEFAULT_PORT,
};

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub root_folder: PathBuf,
    pub api_key: Option<String>,
    pub resolver: ResolverSection,
    pub extractor: ExtractorSection,
    pub playback: PlaybackSection,
}

/// Command-line values that take precedence over the TOML file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub root_folder: Option<PathBuf>,
    pub api_key: Option<String>,
    pub extractor: Option<String>,
}

impl ServiceConfig {
    /// Defaults rooted at `root`; used by tests and embedders
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            port: DEFAULT_PORT,
            root_folder: root.into(),
            api_key: None,
            resolver: ResolverSection::default(),
            extractor: ExtractorSection::default(),
            playback: PlaybackSection::default(),
        }
    }

    /// Resolve: CLI override, then environment (root folder only), then TOML
    pub fn resolve(toml: TomlConfig, overrides: Overrides) -> Self {
        let root_folder = RootFolderResolver::new()
            .with_cli_arg(overrides.root_folder)
            .with_toml_value(toml.root_folder)
            .resolve();

        let mut extractor = toml.extractor;
        if let Some(binary) = overrides.extractor {
            extractor.binary = binary;
        }

        Self {
            port: overrides.port.or(toml.port).unwrap_or(DEFAULT_PORT),
            root_folder,
            api_key: overrides
                .api_key
                .or(toml.api_key)
                .filter(|k| !k.trim().is_empty()),
            resolver: toml.resolver,
            extractor,
            playback: toml.playback,
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root_folder.join("cache")
    }

    pub fn history_path(&self) -> PathBuf {
        self.root_folder.join("history.json")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.root_folder.join("queue.json")
    }

    pub fn root(&self) -> &Path {
        &self.root_folder
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_secs(self.resolver.quota_cooldown_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver.request_timeout_secs.max(1))
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor.timeout_secs.max(1))
    }

    pub fn extractor_stall_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor.stall_timeout_secs.max(1))
    }
}
