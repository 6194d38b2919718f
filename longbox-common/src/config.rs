//! Configuration loading and config-file resolution
//!
//! Config file priority:
//! 1. Explicit path (command-line argument)
//! 2. Environment variable
//! 3. Per-user config file (`<config_dir>/longbox/config.toml`)
//! 4. Compiled defaults (no file)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "LONGBOX_CONFIG";

/// Shared settings read from the `[logging]` and top-level keys of config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the database and cache files
    pub root_folder: Option<PathBuf>,
    /// Explicit SQLite database path (defaults to `<root_folder>/longbox.db`)
    pub database: Option<PathBuf>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. "info" or "longbox_engine=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Database path, falling back to the OS-dependent data folder
    pub fn database_path(&self) -> PathBuf {
        if let Some(db) = &self.database {
            return db.clone();
        }
        self.root_folder
            .clone()
            .unwrap_or_else(default_root_folder)
            .join("longbox.db")
    }
}

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config file
    let user_config = dirs::config_dir().map(|d| d.join("longbox").join("config.toml"))?;
    if user_config.exists() {
        Some(user_config)
    } else {
        None
    }
}

/// Parse a TOML file into `T`
///
/// A missing file is a configuration error; callers that treat the file as
/// optional should check `resolve_config_path` first.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load `T` from the resolved config file or fall back to `T::default()`
pub fn load_or_default<T: DeserializeOwned + Default>(cli_arg: Option<&Path>) -> Result<T> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            load_toml(&path)
        }
        None => {
            tracing::debug!("No config file found, using defaults");
            Ok(T::default())
        }
    }
}

/// Get OS-dependent default data folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("longbox"))
        .unwrap_or_else(|| PathBuf::from("./longbox_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_toml_config_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.root_folder.is_none());
    }

    #[test]
    fn test_database_path_prefers_explicit() {
        let config: TomlConfig = toml::from_str(
            r#"
            root_folder = "/srv/longbox"
            database = "/tmp/custom.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/custom.db"));

        let config: TomlConfig = toml::from_str(r#"root_folder = "/srv/longbox""#).unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/srv/longbox/longbox.db"));
    }

    #[test]
    fn test_load_toml_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "logging = 5").unwrap();
        let result: Result<TomlConfig> = load_toml(file.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    #[serial]
    fn test_cli_arg_beats_environment() {
        std::env::set_var(CONFIG_ENV_VAR, "/from/env.toml");
        let resolved = resolve_config_path(Some(Path::new("/from/cli.toml")));
        assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));

        let resolved = resolve_config_path(None);
        assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));
        std::env::remove_var(CONFIG_ENV_VAR);
    }
}
