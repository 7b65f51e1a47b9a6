// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::weave::MetricKind;

use super::types::{LoggingConfig, MetricDeclaration, WeaverConfig};
use crate::error::ConfigError;

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &["weaver.yaml", "weaver.yml", "weaver.json", ".weaver/config.yaml"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".weaver";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.yaml";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.weaver/config.yaml.
pub fn load_global_config() -> Result<Option<WeaverConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the workspace root.
///
/// The first file of [`CONFIG_FILES`] that exists wins.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WeaverConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WeaverConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "json" => serde_json::from_str(&content).map_err(ConfigError::from),
        _ => serde_yaml::from_str(&content).map_err(ConfigError::from),
    }
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WeaverConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = workspace_root.join(filename);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = if filename.ends_with(".json") {
        serde_json::to_string_pretty(config)?
    } else {
        serde_yaml::to_string(config)?
    };
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Initialize a new config file with the example configuration.
///
/// Refuses to overwrite an existing file.
pub fn init_config(workspace_root: &Path) -> Result<PathBuf, ConfigError> {
    let path = workspace_root.join(CONFIG_FILES[0]);
    if path.exists() {
        return Err(ConfigError::InvalidValue {
            field: "path".to_string(),
            message: format!("{} already exists", path.display()),
        });
    }
    save_workspace_config(workspace_root, &get_example_config(), None)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        for filename in CONFIG_FILES {
            if current.join(filename).exists() {
                return Some(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Get an example configuration.
pub fn get_example_config() -> WeaverConfig {
    let mut config = WeaverConfig {
        allow_list: Some(vec!["com/example/**".to_string()]),
        logging: Some(LoggingConfig {
            level: Some("info".to_string()),
            ansi: None,
        }),
        ..Default::default()
    };
    config.metrics.insert(
        "com/example/OrderService.place(Ljava/lang/String;I)V".to_string(),
        vec![
            MetricDeclaration {
                kind: MetricKind::Timer,
                name: "order_place_latency".to_string(),
                doc: Some("Time spent placing an order".to_string()),
                labels: vec!["customer:$0".to_string()],
            },
            MetricDeclaration {
                kind: MetricKind::ExceptionCounter,
                name: "order_place_failures".to_string(),
                doc: None,
                labels: vec!["customer:$0".to_string()],
            },
        ],
    );
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_files_order() {
        assert_eq!(CONFIG_FILES.len(), 4);
        assert_eq!(CONFIG_FILES[0], "weaver.yaml");
    }

    #[test]
    fn test_global_config_dir() {
        let dir = get_global_config_dir();
        assert!(dir.is_some());
        let dir = dir.unwrap();
        assert!(dir.ends_with(".weaver"));
    }

    #[test]
    fn test_load_workspace_config_not_found() {
        let temp = TempDir::new().unwrap();
        let result = load_workspace_config(temp.path());
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_load_workspace_config_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("weaver.json"),
            r#"{"denyList": ["com/acme/internal/**"]}"#,
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.deny_list, Some(vec!["com/acme/internal/**".to_string()]));
    }

    #[test]
    fn test_yaml_wins_over_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("weaver.json"), r#"{"allowList": ["json/**"]}"#).unwrap();
        std::fs::write(temp.path().join("weaver.yaml"), "allowList: [\"yaml/**\"]\n").unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.allow_list, Some(vec!["yaml/**".to_string()]));
    }

    #[test]
    fn test_load_nested_config_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join(".weaver")).unwrap();
        std::fs::write(
            temp.path().join(".weaver/config.yaml"),
            "logging:\n  level: trace\n",
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.logging.unwrap().level.as_deref(), Some("trace"));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("weaver.yaml"), "metrics: [not, a, map").unwrap();
        assert!(matches!(
            load_workspace_config(temp.path()),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let config = get_example_config();
        let path = save_workspace_config(temp.path(), &config, Some("weaver.json")).unwrap();
        assert!(path.exists());
        assert_eq!(load_config_file(&path).unwrap(), config);
    }

    #[test]
    fn test_find_workspace_root() {
        let temp = TempDir::new().unwrap();
        let subdir = temp.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(temp.path().join("weaver.yaml"), "{}").unwrap();

        let found = find_workspace_root(&subdir);
        assert_eq!(found.as_deref(), Some(temp.path()));
    }

    #[test]
    fn test_init_config_refuses_overwrite() {
        let temp = TempDir::new().unwrap();
        let path = init_config(temp.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "weaver.yaml");
        assert_eq!(load_config_file(&path).unwrap(), get_example_config());
        assert!(init_config(temp.path()).is_err());
    }
}
