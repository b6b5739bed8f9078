//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::dynamic::Configuration;
use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported configuration format: {0:?}")]
    UnsupportedFormat(String),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate the static configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load a dynamic configuration file, picking the format from the extension.
pub fn load_dynamic(path: &Path) -> Result<Configuration, ConfigError> {
    let content = fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_dynamic(&content, &extension)
}

/// Parse dynamic configuration text in the given format (`toml`, `json`, `yaml`/`yml`).
pub fn parse_dynamic(content: &str, format: &str) -> Result<Configuration, ConfigError> {
    let config = match format {
        "toml" => toml::from_str(content)?,
        "json" => serde_json::from_str(content)?,
        "yaml" | "yml" => serde_yaml::from_str(content)?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_static_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[entry_points.web]
address = "127.0.0.1:18080"

[entry_points.internal]
address = "127.0.0.1:18081"

[providers]
debounce_ms = 50
conflict_policy = "first_provider"

[providers.inline.routers.hello]
rule = "Path(`/hello`)"
service = "hello"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.entry_point_names(), vec!["internal", "web"]);
        assert_eq!(config.providers.debounce_ms, 50);
        let inline = config.providers.inline.unwrap();
        assert_eq!(inline.routers["hello"].service, "hello");
    }

    #[test]
    fn rejects_invalid_static_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pipeline]\nbuild_timeout_ms = 0").unwrap();
        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn parses_yaml_dynamic_config() {
        let yaml = r#"
routers:
  api:
    rule: "PathPrefix(`/api`)"
    service: api
services:
  api:
    loadBalancer:
      servers:
        - url: http://127.0.0.1:9000
"#;
        let config = parse_dynamic(yaml, "yaml").unwrap();
        assert_eq!(config.routers.len(), 1);
        assert_eq!(config.services.len(), 1);
    }

    #[test]
    fn unknown_extension_is_an_error() {
        assert!(matches!(
            parse_dynamic("", "ini"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
