use crate::classifier::ErrorMatch;
use crate::config::error::{ConfigError, Result};
use crate::config::{PollInterval, RetryConfiguration};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `E2E_RETRY_TIMEOUT_MS=10000`.
pub const ENV_PREFIX: &str = "E2E_RETRY";

const CONFIG_FILE_NAME: &str = "e2e-retry.toml";

/// Retry configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read environment overrides from `<prefix>_*` instead of `E2E_RETRY_*`.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from `RetryConfiguration::default`)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (`E2E_RETRY_` prefix)
    pub fn load(&self) -> Result<RetryConfiguration> {
        let mut builder = Config::builder();

        // Layer 1: defaults
        let defaults_json = serde_json::to_string(&RetryConfiguration::default())?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        // Layer 2: config file
        if let Some(ref path) = self.config_path {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading retry configuration file");
                builder = builder.add_source(File::from(path.as_path()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Layer 3: environment. Only `error_match` is split on commas;
        // a regex goes through E2E_RETRY_ERROR_MATCH__PATTERN.
        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("error_match"),
        );

        let config = builder.build()?;
        let retry_config: RetryConfiguration = config.try_deserialize()?;

        validate(&retry_config)?;
        Ok(retry_config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./e2e-retry.toml
    /// 2. XDG config: ~/.config/e2e-retry/config.toml
    /// 3. Home directory: ~/.e2e-retry.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from(".").join(CONFIG_FILE_NAME);
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("e2e-retry").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(format!(".{CONFIG_FILE_NAME}"));
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<RetryConfiguration> {
        let loader = if let Some(config_path) = Self::find_config_file() {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };

        loader.load()
    }

    /// Load and replace the process-global configuration with the result.
    pub fn install(&self) -> Result<RetryConfiguration> {
        let loaded = self.load()?;
        crate::context::global().replace_configuration(loaded.clone());
        Ok(loaded)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &RetryConfiguration) -> Result<()> {
    if config.timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "timeout_ms must be a positive number of milliseconds".to_string(),
        ));
    }

    if let ErrorMatch::AnyOf(items) = &config.error_match
        && items.is_empty()
    {
        return Err(ConfigError::ValidationError(
            "error_match list must not be empty".to_string(),
        ));
    }

    if let PollInterval::Fixed(interval) = config.poll_interval
        && interval > config.timeout()
    {
        return Err(ConfigError::ValidationError(format!(
            "poll_interval ({}ms) exceeds timeout_ms ({}ms)",
            interval.as_millis(),
            config.timeout_ms
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::env;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("e2e-retry.toml");
        std::fs::write(&config_path, contents).expect("Failed to write temp file");
        (temp_dir, config_path)
    }

    #[test]
    #[serial]
    fn test_load_with_defaults_only() {
        let config = ConfigLoader::new()
            .with_env_prefix("E2E_RETRY_TEST_UNSET")
            .load()
            .expect("Failed to load default config");
        assert_eq!(config, RetryConfiguration::default());
    }

    #[test]
    #[serial]
    fn test_load_with_toml_file() {
        let (_dir, path) = write_config(
            r#"
timeout_ms = 10000
poll_interval = "next-tick"
error_match = "Target closed"
"#,
        );

        let config = ConfigLoader::new()
            .with_file(&path)
            .load()
            .expect("Failed to load config");

        assert_eq!(config.timeout_ms, 10_000);
        assert_eq!(config.poll_interval, PollInterval::NextTick);
        assert_eq!(config.error_match, ErrorMatch::exact("Target closed"));
        assert!(!config.disabled);
    }

    #[test]
    #[serial]
    fn test_load_pattern_from_file() {
        let (_dir, path) = write_config(
            r#"
[error_match]
pattern = "(?i)target (page|context) closed"
"#,
        );

        let config = ConfigLoader::new().with_file(&path).load().unwrap();
        assert!(config.error_match.is_match("Target page closed"));
        assert!(!config.error_match.is_match("Target crashed"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let (_dir, path) = write_config("timeout_ms = 10000\npoll_interval = 50\n");

        unsafe {
            env::set_var("E2E_RETRY_TIMEOUT_MS", "750");
            env::set_var("E2E_RETRY_DISABLED", "true");
            env::set_var("E2E_RETRY_ERROR_MATCH", "socket hang up,Target closed");
        }

        let result = ConfigLoader::new().with_file(&path).load();

        unsafe {
            env::remove_var("E2E_RETRY_TIMEOUT_MS");
            env::remove_var("E2E_RETRY_DISABLED");
            env::remove_var("E2E_RETRY_ERROR_MATCH");
        }

        let config = result.expect("Failed to load config");
        assert_eq!(config.timeout_ms, 750);
        // file value preserved for non-overridden fields
        assert_eq!(config.poll_interval, PollInterval::from_millis(50));
        assert!(config.disabled);
        assert_eq!(
            config.error_match,
            ErrorMatch::any_of(["socket hang up", "Target closed"])
        );
    }

    #[test]
    fn test_missing_file_error() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/e2e-retry.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    #[serial]
    fn test_zero_timeout_rejected() {
        let (_dir, path) = write_config("timeout_ms = 0\n");
        let result = ConfigLoader::new().with_file(&path).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    #[serial]
    fn test_poll_interval_longer_than_timeout_rejected() {
        let (_dir, path) = write_config("timeout_ms = 100\npoll_interval = 500\n");
        let err = ConfigLoader::new().with_file(&path).load().unwrap_err();
        assert!(err.to_string().contains("500ms"), "got {err}");
    }

    #[test]
    #[serial]
    fn test_invalid_pattern_is_load_error() {
        let (_dir, path) = write_config("[error_match]\npattern = \"(unclosed\"\n");
        let result = ConfigLoader::new().with_file(&path).load();
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
