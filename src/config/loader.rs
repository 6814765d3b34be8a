//! Configuration Loader
//!
//! Environment-aware configuration loading. Finds `clusterpost.yaml`, merges
//! the section named after the active environment over the base document,
//! expands `${VAR}` references and validates the result.

use super::error::{ConfigResult, ConfigurationError};
use super::ClusterpostConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];

/// Loaded configuration together with where it came from.
#[derive(Debug)]
pub struct ConfigManager {
    config: ClusterpostConfig,
    environment: String,
    config_file: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory.
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with an explicit environment.
    /// Tests use this to avoid mutating process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config_file = Self::find_config_file(&config_directory)?;
        let config = Self::load_and_merge_config(&config_file, environment)?;
        config.validate()?;

        let sanitized = Self::sanitize_config_for_logging(&config);
        debug!(
            "Configuration loaded: {}",
            serde_json::to_string_pretty(&sanitized)
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            execution_servers = config.execution_servers.len(),
            worker_id = config.scheduler.worker_id,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file,
        }))
    }

    /// Wrap an already built configuration.
    pub fn from_config(config: ClusterpostConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_file: PathBuf::new(),
        }))
    }

    pub fn config(&self) -> &ClusterpostConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Configuration as JSON with secrets masked.
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    fn detect_environment() -> String {
        env::var("CLUSTERPOST_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        if let Ok(dir) = env::var("CLUSTERPOST_CONFIG_DIR") {
            return PathBuf::from(dir);
        }

        for dir in ["config", "."] {
            let dir = PathBuf::from(dir);
            if dir.join("clusterpost.yaml").exists() || dir.join("clusterpost.yml").exists() {
                debug!("Found config directory: {}", dir.display());
                return dir;
            }
        }

        PathBuf::from("config")
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in ["clusterpost.yaml", "clusterpost.yml"] {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Read a configuration file with a size limit.
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!("configuration file larger than {MAX_CONFIG_FILE_SIZE} bytes"),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn load_and_merge_config(
        config_file: &Path,
        environment: &str,
    ) -> ConfigResult<ClusterpostConfig> {
        let yaml_content = Self::read_config_file_safely(config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!("Applying environment-specific overrides for: {}", environment);
            Self::merge_yaml_values(&mut yaml_data, env_overrides);
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
        }

        Self::expand_environment_variables(&mut yaml_data);

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Recursively merge environment overrides into the base document.
    pub(crate) fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
    }

    /// Replace whole-string `${VAR}` values with the variable's contents.
    fn expand_environment_variables(value: &mut YamlValue) {
        match value {
            YamlValue::String(s) if s.starts_with("${") && s.ends_with('}') => {
                let var_name = &s[2..s.len() - 1];
                match env::var(var_name) {
                    Ok(env_value) => {
                        debug!("Expanding environment variable {}", var_name);
                        *s = env_value;
                    }
                    Err(_) => {
                        warn!(
                            "Environment variable {} not found, keeping original value",
                            var_name
                        );
                    }
                }
            }
            YamlValue::Mapping(map) => {
                for (_, v) in map.iter_mut() {
                    Self::expand_environment_variables(v);
                }
            }
            YamlValue::Sequence(seq) => {
                for v in seq.iter_mut() {
                    Self::expand_environment_variables(v);
                }
            }
            _ => {}
        }
    }

    fn sanitize_config_for_logging(config: &ClusterpostConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "token", "identity"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        let masked = match &*val {
                            serde_json::Value::Null => serde_json::Value::Null,
                            serde_json::Value::String(s) if s.is_empty() => {
                                serde_json::Value::String("[EMPTY]".to_string())
                            }
                            _ => serde_json::Value::String("[MASKED]".to_string()),
                        };
                        *val = masked;
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}
