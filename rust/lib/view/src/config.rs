use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Engine configuration.
///
/// Read from a TOML file, then overridden by command-line flags:
///
/// ```toml
/// data_dir = "/srv/views"
/// strict = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one sub-directory per module.
    pub data_dir: Option<PathBuf>,

    /// Path to the redb database file.
    /// Defaults to `{data_dir}/views.redb` if not specified.
    pub db_path: Option<PathBuf>,

    /// Report access inconsistencies as errors while rendering, not only
    /// while validating.
    pub strict: bool,

    /// Keep postprocessed architectures in memory between renders.
    pub cache: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            db_path: None,
            strict: false,
            cache: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&src).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--data-dir=PATH`
    /// - `--db=PATH`
    /// - `--strict` / `--strict=BOOL`
    /// - `--no-cache` / `--cache=BOOL`
    pub fn from_args(args: &[String]) -> Self {
        let mut config = EngineConfig::default();
        config.apply_args(args);
        config
    }

    /// Override fields from `--flag=value` arguments; unknown ones are ignored.
    pub fn apply_args(&mut self, args: &[String]) {
        for arg in args {
            if let Some(val) = arg.strip_prefix("--data-dir=") {
                self.data_dir = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--db=") {
                self.db_path = Some(PathBuf::from(val));
            } else if arg == "--strict" {
                self.strict = true;
            } else if let Some(val) = arg.strip_prefix("--strict=") {
                self.strict = parse_bool(val).unwrap_or(self.strict);
            } else if arg == "--no-cache" {
                self.cache = false;
            } else if let Some(val) = arg.strip_prefix("--cache=") {
                self.cache = parse_bool(val).unwrap_or(self.cache);
            }
        }
    }

    /// Resolve the redb database path, falling back to `{data_dir}/views.redb`.
    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            self.data_dir
                .as_ref()
                .map(|d| d.join("views.redb"))
                .unwrap_or_else(|| PathBuf::from("views.redb"))
        })
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_args() {
        let args = vec![
            "--data-dir=/tmp/views".to_string(),
            "--strict".to_string(),
            "--cache=off".to_string(),
            "--unknown=1".to_string(),
        ];
        let config = EngineConfig::from_args(&args);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/views")));
        assert!(config.strict);
        assert!(!config.cache);
    }

    #[test]
    fn test_resolve_defaults() {
        let config = EngineConfig {
            data_dir: Some(PathBuf::from("/data")),
            ..Default::default()
        };
        assert_eq!(config.resolve_db_path(), PathBuf::from("/data/views.redb"));
        assert_eq!(EngineConfig::default().resolve_db_path(), PathBuf::from("views.redb"));
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "data_dir = \"/srv/views\"\nstrict = true\n").unwrap();
        let mut config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/views")));
        assert!(config.strict);
        assert!(config.cache);

        config.apply_args(&["--db=/tmp/v.redb".to_string()]);
        assert_eq!(config.resolve_db_path(), PathBuf::from("/tmp/v.redb"));

        fs::write(&path, "strict = \"maybe\"").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
