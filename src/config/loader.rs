//! Config file discovery, loading and serialization.

use super::ProvisionConfig;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up in the current directory.
pub const LOCAL_CONFIG_NAME: &str = "provision.toml";

/// Get the global config path: ~/.config/certflash/provision.toml
pub fn get_global_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine user config directory".to_string())
    })?;

    Ok(config_dir.join("certflash").join(LOCAL_CONFIG_NAME))
}

/// Find the config file to use.
///
/// An explicit path must exist. Otherwise `./provision.toml` is preferred over
/// the global config; `None` means built-in defaults apply.
pub fn discover_config(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = cwd.join(LOCAL_CONFIG_NAME);
    if local.is_file() {
        return Ok(Some(local));
    }

    match get_global_config_path() {
        Ok(global) if global.is_file() => Ok(Some(global)),
        _ => Ok(None),
    }
}

/// Load the config for this run: discovered file, or defaults rooted at `cwd`.
pub fn load_or_default(explicit: Option<&Path>, cwd: &Path) -> Result<ProvisionConfig, ConfigError> {
    match discover_config(explicit, cwd)? {
        Some(path) => load_config_from_file(&path),
        None => {
            let mut config = ProvisionConfig::default();
            config.resolve_paths(cwd);
            Ok(config)
        }
    }
}

/// Load config from a TOML file, resolving relative paths against its directory.
pub fn load_config_from_file(path: &Path) -> Result<ProvisionConfig, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let mut config: ProvisionConfig = toml::from_str(&content)?;

    let base = match path.parent() {
        Some(parent) if parent.is_absolute() => parent.to_path_buf(),
        Some(parent) => std::env::current_dir()?.join(parent),
        None => std::env::current_dir()?,
    };
    config.resolve_paths(&base);

    Ok(config)
}

/// Save config to a TOML file.
pub fn save_config_to_file(config: &ProvisionConfig, path: &Path) -> Result<(), ConfigError> {
    validate_config_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;

    Ok(())
}

/// Validate config path (.toml extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "toml" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .toml extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .toml extension".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CredentialEntry, ErasePolicy};
    use tempfile::TempDir;

    #[test]
    fn test_load_resolves_relative_paths() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("provision.toml");
        fs::write(
            &config_path,
            r#"
project_dir = "fw"
build_env = "esp32s3"
erase_failure = "abort"

[[credentials]]
file = "A.crt"
destination = "/A.crt"
"#,
        )
        .unwrap();

        let config = load_config_from_file(&config_path).unwrap();
        assert_eq!(config.project_dir, temp_dir.path().join("fw"));
        assert_eq!(config.certs_dir, temp_dir.path().join("certificates"));
        assert_eq!(config.build_env, "esp32s3");
        assert_eq!(config.erase_failure, ErasePolicy::Abort);
        assert_eq!(
            config.credentials.entries(),
            &[CredentialEntry::new("A.crt", "/A.crt")]
        );
        assert_eq!(config.toolchain.flash_tool, "esptool.py");
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("provision.toml");

        let mut original = ProvisionConfig::default();
        original.resolve_paths(temp_dir.path());
        original.build_env = "esp32c3".to_string();
        original.timeouts.build = 1200;

        save_config_to_file(&original, &config_path).expect("Failed to save config");
        let loaded = load_config_from_file(&config_path).expect("Failed to load config");

        assert_eq!(loaded, original);
    }

    #[test]
    fn test_invalid_toml_reported() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("provision.toml");
        fs::write(&config_path, "build_env = [").unwrap();

        assert!(matches!(
            load_config_from_file(&config_path),
            Err(ConfigError::InvalidToml(_))
        ));
    }

    #[test]
    fn test_validate_config_path_extension() {
        assert!(validate_config_path(Path::new("provision.toml")).is_ok());
        assert!(validate_config_path(Path::new("provision.json")).is_err());
        assert!(validate_config_path(Path::new("provision")).is_err());
        assert!(validate_config_path(Path::new("")).is_err());
    }

    #[test]
    fn test_discover_prefers_local_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(LOCAL_CONFIG_NAME), "").unwrap();

        let found = discover_config(None, temp_dir.path()).unwrap();
        assert_eq!(found, Some(temp_dir.path().join(LOCAL_CONFIG_NAME)));
    }

    #[test]
    fn test_discover_explicit_missing_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        assert!(matches!(
            discover_config(Some(&missing), temp_dir.path()),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
