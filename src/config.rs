use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Default snapshot location, relative to the project root.
const DEFAULT_SNAPSHOT: &str = ".visuals-state.toml";

/// Per-backend options from the `[backends.<name>]` tables.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct BackendSettings {
    /// Turn on a backend that is off by default.
    #[serde(default)]
    pub enabled: bool,
    /// Backend specific keys, kept verbatim.
    #[serde(flatten)]
    pub extra: toml::Table,
    /// Override of the backend's declared priority.
    #[serde(default)]
    pub priority: Option<i32>,
}

impl BackendSettings {
    /// A backend specific string option.
    pub fn str_option(&self, key: &str) -> Option<&str> {
        return self.extra.get(key).and_then(toml::Value::as_str);
    }
}

/// Project configuration loaded from `.visuals.toml`.
/// Include/exclude patterns are path prefixes applied to markdown documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Backend settings keyed by backend name.
    pub backends: BTreeMap<String, BackendSettings>,
    /// Document path prefixes to skip.
    exclude: Vec<String>,
    /// Document path prefixes to scan. Empty means everything.
    include: Vec<String>,
    /// Image copied next to the output when an occurrence needs a stand-in.
    pub placeholder_image: Option<PathBuf>,
    /// Where the catalog and state snapshot is persisted, relative to the root.
    pub snapshot: PathBuf,
}

/// Raw TOML structure for `.visuals.toml`.
#[derive(serde::Deserialize)]
struct VisualsTomlConfig {
    #[serde(default)]
    backends: BTreeMap<String, BackendSettings>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    include: Vec<String>,
    placeholder_image: Option<PathBuf>,
    snapshot: Option<PathBuf>,
}

impl Config {
    /// Load config from `.visuals.toml` in the given root directory.
    /// Returns a default that scans everything if the file doesn't exist.
    /// Returns an error if the file exists but is malformed; never silently
    /// falls back to defaults when the user wrote a config file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if reading fails (other than not-found),
    /// or `Error::TomlDe` if the TOML is malformed.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let path = root.join(".visuals.toml");
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::scan_everything_by_default()),
            Err(e) => return Err(Error::Io(e)),
        };
        return Self::parse(&content);
    }

    /// Parse config from TOML content.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlDe` if the TOML is malformed.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let raw: VisualsTomlConfig = toml::from_str(content)?;
        return Ok(Self {
            backends: raw.backends,
            exclude: raw.exclude,
            include: raw.include,
            placeholder_image: raw.placeholder_image,
            snapshot: raw.snapshot.unwrap_or_else(|| return PathBuf::from(DEFAULT_SNAPSHOT)),
        });
    }

    /// Default config that includes everything and excludes nothing.
    fn scan_everything_by_default() -> Self {
        return Self {
            backends: BTreeMap::new(),
            exclude: Vec::new(),
            include: Vec::new(),
            placeholder_image: None,
            snapshot: PathBuf::from(DEFAULT_SNAPSHOT),
        };
    }

    /// Check whether a markdown document path should be scanned.
    ///
    /// A path is included if no include patterns are set (scan everything),
    /// or if the path starts with at least one include pattern.
    /// An included path is then excluded if it starts with any exclude pattern.
    pub fn should_scan(&self, relative_path: &str) -> bool {
        let included = self.include.is_empty()
            || self.include.iter().any(|p| return relative_path.starts_with(p.as_str()));

        if !included {
            return false;
        }

        return !self.exclude.iter().any(|p| return relative_path.starts_with(p.as_str()));
    }
}
