// src/config.rs

//! Configuration loading utilities.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Load configuration from a TOML file and validate it.
///
/// A missing or unparseable file falls back to defaults; invalid values in
/// a file that did parse are an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::load_or_default(path)
    } else {
        log::warn!("No config at {:?}; using default configuration.", path);
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

/// Load and validate a configuration file strictly.
///
/// Unlike `load_config`, a missing or unparseable file is an error.
pub fn check_config_file(path: &Path) -> Result<Config> {
    let config = Config::load(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(config.pagination.default_limit, 20);
        assert_eq!(config.scoring.fuzzy_threshold, 0.3);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[cache]\ndir = \"/var/harvest\"\nfreshness_hours = 12.0\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.cache.dir, Path::new("/var/harvest"));
        assert_eq!(config.cache.freshness_hours, 12.0);
        assert_eq!(config.cache.retention_hours, 168.0);
        assert_eq!(config.index.max_size, 10_000);
    }

    #[test]
    fn test_strict_check_rejects_broken_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[cache\nfreshness_hours = \"soon\"\n").unwrap();

        // Lenient loading still succeeds with defaults
        assert!(load_config(&path).is_ok());
        assert!(check_config_file(&path).is_err());
        assert!(check_config_file(&tmp.path().join("missing.toml")).is_err());

        std::fs::write(&path, "[cache]\nfreshness_hours = 12.0\n").unwrap();
        assert_eq!(check_config_file(&path).unwrap().cache.freshness_hours, 12.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[stream]\nmax_concurrency = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
