//! YAML configuration for a reconciliation run.

use crate::classify::rules::{RuleError, RuleSet};
use crate::finder::FieldMap;
use crate::merger::SourcePriorities;
use crate::state::PolicyKind;
use crate::static_ref::{IpScope, StaticEntry};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid classifier rules: {0}")]
    InvalidRules(#[from] RuleError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Static reference tables as written in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticReferenceConfig {
    /// IP address → trusted override fields.
    #[serde(default)]
    pub ip_map: BTreeMap<String, StaticEntry>,
    /// IP ranges → location.
    #[serde(default)]
    pub scopes: Vec<IpScope>,
}

/// One downstream target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Identity, change and eligibility rules to apply.
    pub policy: PolicyKind,
    /// Ledger file. Without one, state lives in memory for the run only.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// Internal field key → the store's custom-field label.
    #[serde(default)]
    pub field_map: FieldMap,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub source_priorities: SourcePriorities,
    #[serde(default)]
    pub static_reference: StaticReferenceConfig,
    /// Classifier rule tables. Omitted tables use the built-in defaults.
    #[serde(default)]
    pub rules: RuleSet,
    /// Targets by name.
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
    /// Count would-be changes without dispatching or recording them.
    #[serde(default)]
    pub dry_run: bool,
}

/// Replaces `${VAR_NAME}` patterns with environment variable values.
fn substitute_env_vars(input: &str) -> ConfigResult<String> {
    let mut missing = Vec::new();

    let result = ENV_VAR_PATTERN.replace_all(input, |caps: &regex::Captures<'_>| {
        match env::var(&caps[1]) {
            Ok(value) => value,
            Err(_) => {
                missing.push(caps[1].to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::EnvVarNotFound(missing.join(", ")));
    }

    Ok(result.into_owned())
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> ConfigResult<EngineConfig> {
    let content = substitute_env_vars(content)?;
    let config: EngineConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Loads and validates the engine configuration from a YAML file.
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use hy_core::config::load_config;
///
/// let config = load_config(Path::new("config/hydra.yaml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> ConfigResult<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Validates a loaded configuration.
///
/// IP scopes with unparseable bounds are accepted; they never match.
pub fn validate_config(config: &EngineConfig) -> ConfigResult<()> {
    for ip in config.static_reference.ip_map.keys() {
        if ip.trim().parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "static_reference.ip_map key '{}' is not an IP address",
                ip
            )));
        }
    }

    config.rules.validate()?;

    for (name, target) in &config.targets {
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "target names must not be empty".to_string(),
            ));
        }
        if target
            .state_file
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::InvalidValue(format!(
                "targets.{}.state_file must not be empty",
                name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID: &str = r#"
source_priorities:
  microsoft365: 4
  intune: 3
  teams: 3
  nmap: 2
  csv: 2
  unknown: 1
static_reference:
  ip_map:
    "10.0.5.20":
      host_name: reception-kiosk
      device_type: Desktop
      os: Windows 11
  scopes:
    - start_ip: 10.0.5.0
      end_ip: 10.0.5.255
      location: Front Office
targets:
  inventory:
    policy: inventory
    state_file: state/inventory.json
  monitoring:
    policy: monitoring
  siem:
    policy: siem
    enabled: false
dry_run: true
"#;

    fn write(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write(VALID);
        let config = load_config(file.path()).unwrap();

        assert!(config.dry_run);
        assert_eq!(config.source_priorities.rank("csv"), 2);
        assert_eq!(config.targets.len(), 3);
        assert_eq!(config.targets["inventory"].policy, PolicyKind::Inventory);
        assert!(config.targets["monitoring"].enabled);
        assert!(!config.targets["siem"].enabled);

        let kiosk = &config.static_reference.ip_map["10.0.5.20"];
        assert_eq!(kiosk.host_name.as_deref(), Some("reception-kiosk"));
        assert_eq!(kiosk.os_platform.as_deref(), Some("Windows 11"));
        assert_eq!(config.static_reference.scopes[0].location, "Front Office");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.source_priorities, SourcePriorities::default());
        assert!(config.targets.is_empty());
        assert!(!config.dry_run);
    }

    #[test]
    fn test_missing_file() {
        let result = load_config(Path::new("/nonexistent/path/hydra.yaml"));
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_invalid_yaml() {
        let file = write("targets: [unclosed");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_invalid_static_ip() {
        let result = parse_config(
            r#"
static_reference:
  ip_map:
    "10.0.0.300":
      host_name: nowhere
"#,
        );
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_bad_scope_bounds_are_accepted() {
        let config = parse_config(
            r#"
static_reference:
  scopes:
    - start_ip: not-an-ip
      end_ip: 10.0.0.9
      location: Nowhere
"#,
        )
        .unwrap();
        assert_eq!(config.static_reference.scopes.len(), 1);
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let result = parse_config("rules:\n  version: 99\n");
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidRules(_)));
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("HYDRA_TEST_STATE_DIR", "/var/lib/hydra");

        let config = parse_config(
            r#"
targets:
  siem:
    policy: siem
    state_file: ${HYDRA_TEST_STATE_DIR}/siem.json
"#,
        )
        .unwrap();
        assert_eq!(
            config.targets["siem"].state_file.as_deref(),
            Some(Path::new("/var/lib/hydra/siem.json"))
        );

        env::remove_var("HYDRA_TEST_STATE_DIR");
    }

    #[test]
    fn test_missing_env_var() {
        let result = parse_config("dry_run: ${HYDRA_TEST_DEFINITELY_UNSET}\n");
        match result.unwrap_err() {
            ConfigError::EnvVarNotFound(name) => {
                assert_eq!(name, "HYDRA_TEST_DEFINITELY_UNSET")
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
