//! Configuration for the council client.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (COUNCIL_API_URL, COUNCIL_DATA_DIR)
//! 2. Config file (.council/config.yaml)
//! 3. Defaults (http://localhost:8000, no local data directory)
//!
//! Config file discovery:
//! - Searches current directory and parents for .council/config.yaml
//! - Paths in config file are relative to the project root (parent of .council/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::ExecutionMode;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub connect_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Backend conversation directory (relative to project root)
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultsConfig {
    pub execution_mode: Option<ExecutionMode>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Backend base URL, without trailing slash
    pub api_url: String,
    pub connect_timeout: Duration,
    /// Read conversations from disk instead of the API when set
    pub data_dir: Option<PathBuf>,
    /// SuperChat execution mode when a request names none
    pub execution_mode: ExecutionMode,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            data_dir: None,
            execution_mode: ExecutionMode::default(),
            config_file: None,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".council").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root or start with `~/`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }

    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Layer a parsed config file over the defaults
fn apply_config_file(mut resolved: ResolvedConfig, config: ConfigFile, config_path: &Path) -> ResolvedConfig {
    // Project root is the parent of .council/
    let base_dir = config_path
        .parent()
        .and_then(|p| p.parent())
        .unwrap_or(Path::new("."));

    if let Some(base_url) = config.api.base_url {
        resolved.api_url = base_url;
    }
    if let Some(seconds) = config.api.connect_timeout_seconds {
        resolved.connect_timeout = Duration::from_secs(seconds);
    }
    if let Some(ref data_dir) = config.storage.data_dir {
        resolved.data_dir = Some(resolve_path(base_dir, data_dir));
    }
    if let Some(execution_mode) = config.defaults.execution_mode {
        resolved.execution_mode = execution_mode;
    }
    resolved.config_file = Some(config_path.to_path_buf());
    resolved
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let mut resolved = ResolvedConfig::default();

    if let Some(config_path) = find_config_file() {
        let config = load_config_file(&config_path)?;
        resolved = apply_config_file(resolved, config, &config_path);
    }

    if let Ok(api_url) = std::env::var("COUNCIL_API_URL") {
        resolved.api_url = api_url;
    }
    if let Ok(data_dir) = std::env::var("COUNCIL_DATA_DIR") {
        resolved.data_dir = Some(resolve_path(Path::new("."), &data_dir));
    }

    resolved.api_url = resolved.api_url.trim_end_matches('/').to_string();
    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ResolvedConfig::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.data_dir.is_none());
        assert_eq!(config.execution_mode, ExecutionMode::Sequential);
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let council_dir = temp.path().join(".council");
        std::fs::create_dir_all(&council_dir).unwrap();

        let config_path = council_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
api:
  base_url: http://council.internal:9000
  connect_timeout_seconds: 3
storage:
  data_dir: data/conversations
defaults:
  execution_mode: parallel
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.api.connect_timeout_seconds, Some(3));
        assert_eq!(config.defaults.execution_mode, Some(ExecutionMode::Parallel));

        let resolved = apply_config_file(ResolvedConfig::default(), config, &config_path);
        assert_eq!(resolved.api_url, "http://council.internal:9000");
        assert_eq!(resolved.connect_timeout, Duration::from_secs(3));
        assert_eq!(resolved.data_dir, Some(temp.path().join("data/conversations")));
        assert_eq!(resolved.execution_mode, ExecutionMode::Parallel);
        assert_eq!(resolved.config_file, Some(config_path));
    }

    #[test]
    fn test_minimal_config_file_keeps_defaults() {
        let config: ConfigFile = serde_yaml::from_str("version: \"1.0\"\n").unwrap();
        let resolved = apply_config_file(ResolvedConfig::default(), config, Path::new("/p/.council/config.yaml"));

        assert_eq!(resolved.api_url, DEFAULT_API_URL);
        assert!(resolved.data_dir.is_none());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            resolve_path(&base, "~/council"),
            dirs::home_dir().unwrap().join("council")
        );
    }
}
