use std::fs;
use std::path::PathBuf;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ImpExpError;

pub const DEFAULT_CONFIG_FILE: &str = "imp-exp.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub external_chown_script: Option<PathBuf>,
    #[serde(default)]
    pub real_system_username: Option<String>,
    #[serde(default)]
    pub enable_celery_tasks: Option<bool>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub external_chown_script: Option<PathBuf>,
    pub real_system_username: String,
    pub enable_celery_tasks: bool,
    pub file_path: PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<AppConfig, ImpExpError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(ImpExpError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ImpExpError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ImpExpError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<AppConfig, ImpExpError> {
        let file_path = match config.file_path {
            Some(path) => path,
            None => default_data_root()?.join("objects"),
        };

        Ok(AppConfig {
            external_chown_script: config
                .external_chown_script
                .filter(|path| !path.as_os_str().is_empty()),
            real_system_username: config
                .real_system_username
                .unwrap_or_else(|| "user_email".to_string()),
            enable_celery_tasks: config.enable_celery_tasks.unwrap_or(false),
            file_path,
        })
    }
}

fn default_data_root() -> Result<PathBuf, ImpExpError> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".cache").join("history-imp-exp"))
        .ok_or_else(|| ImpExpError::Filesystem("unable to resolve data directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let resolved = ConfigLoader::resolve_config(Config {
            file_path: Some(PathBuf::from("/tmp/objects")),
            ..Config::default()
        })
        .unwrap();
        assert!(resolved.external_chown_script.is_none());
        assert_eq!(resolved.real_system_username, "user_email");
        assert!(!resolved.enable_celery_tasks);
        assert_eq!(resolved.file_path, PathBuf::from("/tmp/objects"));
    }
}
