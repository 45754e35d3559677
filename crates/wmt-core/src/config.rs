//! Configuration parsing and path resolution.
//!
//! The config file is TOML, deserialized section by section with defaults
//! for every field, so a partial file only overrides what it names. Paths
//! support `~` expansion via `$HOME`.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::LedgerBackend;

/// Environment variable overriding the config path.
pub const CONFIG_ENV_VAR: &str = "WMT_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The named config file does not exist.
    #[error("config not found: {}", path.display())]
    NotFound {
        /// Path that was probed.
        path: PathBuf,
    },

    /// The config file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The config file is not valid TOML.
    #[error("invalid config {}: {detail}", path.display())]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Parse error detail.
        detail: String,
    },
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// The browser's `Bookmarks` JSON file.
    pub bookmarks_file: PathBuf,
    /// Directory for generated analysis documents.
    pub output_dir: PathBuf,
    /// Optional override for the packaged triage prompt template.
    pub triage_prompt_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            bookmarks_file: PathBuf::from(
                "~/Library/Application Support/BraveSoftware/Brave-Browser/Default/Bookmarks",
            ),
            output_dir: PathBuf::from("~/Syncthing/WorthMyTime"),
            triage_prompt_file: None,
        }
    }
}

/// Bookmark tree location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarksConfig {
    /// Root key under `roots` (usually `bookmark_bar`).
    pub root_name: String,
    /// Name of the inbox folder to scan.
    pub inbox_folder_name: String,
}

impl Default for BookmarksConfig {
    fn default() -> Self {
        Self {
            root_name: "bookmark_bar".to_string(),
            inbox_folder_name: "Inbox".to_string(),
        }
    }
}

/// Ledger storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Backend selection; `auto` infers from the path extension.
    pub backend: LedgerBackend,
    /// Ledger file path.
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Auto,
            path: PathBuf::from("~/.config/wmt/ledger.json"),
        }
    }
}

/// Processing cadence and lease settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Seconds the bookmarks file must be unchanged before a watch cycle
    /// processes it.
    pub stable_seconds: u64,
    /// Watcher poll interval in seconds.
    pub poll_interval_seconds: u64,
    /// Lease TTL in seconds; an `in_progress` entry older than this is
    /// presumed crashed and becomes reclaimable.
    pub lease_ttl_seconds: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            stable_seconds: 2,
            poll_interval_seconds: 30,
            lease_ttl_seconds: 3600,
        }
    }
}

/// HTTP fetch and payload budgets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// HTTP timeout for metadata lookups, in seconds.
    pub timeout_seconds: u64,
    /// Maximum characters of transcript embedded in a prompt; longer
    /// payloads are truncated with a marker. Zero disables the cap.
    pub max_transcript_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 20,
            max_transcript_chars: 120_000,
        }
    }
}

/// External reasoning CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodexConfig {
    /// Whether enrichment is enabled at all.
    pub enabled: bool,
    /// Command template; missing flags (search, model, output capture) are
    /// injected around the `-` stdin-prompt argument.
    pub command: Vec<String>,
    /// Model override; empty means the CLI's default.
    pub model: String,
    /// Reasoning effort override; empty means the CLI's default.
    pub model_reasoning_effort: String,
    /// Whether to enable the CLI's web search.
    pub web_search_enabled: bool,
    /// Subprocess timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "--sandbox".to_string(),
                "read-only".to_string(),
                "-".to_string(),
            ],
            model: String::new(),
            model_reasoning_effort: String::new(),
            web_search_enabled: true,
            timeout_seconds: 900,
        }
    }
}

/// HackMD publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HackMdConfig {
    /// Whether publishing to HackMD is enabled.
    pub enabled: bool,
    /// API base URL.
    pub api_base_url: String,
    /// Bearer token.
    pub api_token: String,
    /// Folder the note is created in.
    pub parent_folder_id: String,
    /// HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for HackMdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base_url: "https://api.hackmd.io/v1".to_string(),
            api_token: String::new(),
            parent_folder_id: String::new(),
            timeout_seconds: 30,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Bookmark tree location.
    pub bookmarks: BookmarksConfig,
    /// Ledger storage.
    pub ledger: LedgerConfig,
    /// Processing cadence and leases.
    pub processing: ProcessingConfig,
    /// Fetch budgets.
    pub fetch: FetchConfig,
    /// Enrichment CLI.
    pub codex: CodexConfig,
    /// HackMD publishing.
    pub hackmd: HackMdConfig,
}

/// Expands a leading `~` using `$HOME`. Paths without one pass through.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    if text == "~" {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home);
        }
    } else if let Some(rest) = text.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn default_config_path() -> PathBuf {
    if let Ok(value) = env::var(CONFIG_ENV_VAR) {
        if !value.trim().is_empty() {
            return expand_home(Path::new(&value));
        }
    }
    expand_home(Path::new("~/.config/wmt/config.toml"))
}

impl AppConfig {
    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the TOML is invalid.
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let parsed: Self = toml::from_str(content).map_err(|err| ConfigError::Parse {
            path: origin.to_path_buf(),
            detail: err.to_string(),
        })?;
        Ok(parsed.expanded())
    }

    /// Loads configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is missing, unreadable, or
    /// invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        Self::from_toml(&content, path)
    }

    /// Loads configuration, resolving the path as: explicit argument,
    /// `$WMT_CONFIG`, then `~/.config/wmt/config.toml`. The default path
    /// may be absent, in which case built-in defaults apply; an explicitly
    /// named missing file is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an explicitly named file is missing or
    /// any file is unreadable or invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(explicit) => Self::from_file(&expand_home(explicit)),
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default().expanded())
                }
            }
        }
    }

    fn expanded(mut self) -> Self {
        self.paths.bookmarks_file = expand_home(&self.paths.bookmarks_file);
        self.paths.output_dir = expand_home(&self.paths.output_dir);
        self.paths.triage_prompt_file = self
            .paths
            .triage_prompt_file
            .as_deref()
            .map(expand_home);
        self.ledger.path = expand_home(&self.ledger.path);
        self
    }
}
