use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use regex::bytes::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::collectors::filters::translate_replacement;
use crate::config::options::{CollectionOptions, CommandSpec, FilterSpec};
use crate::constants::{DEFAULT_CONF_PATH, MQTT_DEFAULT_PORT};
use crate::error::{DiagError, Result};
use crate::security::path_validator::workspace_relative_path;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CommandConfig {
    pub command: String,
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FilterConfig {
    pub glob: String,
    pub pattern: String,
    pub repl: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct JournaldConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub lines_number: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MqttConfig {
    /// Host name or `tcp://host[:port]` / `mqtt://host[:port]`
    pub broker: String,
    #[serde(default)]
    pub port: Option<u16>,
}

/// On-disk YAML configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DiagConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub commands: Vec<CommandConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: Vec<FilterConfig>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub journald_logs: JournaldConfig,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

/// Treat an explicit YAML `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl DiagConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| DiagError::io(path, e))?;

        let config = Self::from_yaml_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| DiagError::Config(format!("Failed to parse YAML config: {}", e)))
    }

    /// Validate the configuration and build the options for a collection run.
    ///
    /// `timeout_override` comes from the command line and wins over the
    /// `timeout` key.
    pub fn to_options(&self, timeout_override: Option<f64>) -> Result<CollectionOptions> {
        let timeout_secs = timeout_override
            .or(self.timeout)
            .ok_or_else(|| DiagError::Config("timeout is not set".to_string()))?;
        let command_timeout = Duration::try_from_secs_f64(timeout_secs)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .ok_or_else(|| {
                DiagError::Config(format!(
                    "timeout must be a positive number of seconds, got {}",
                    timeout_secs
                ))
            })?;

        let mut seen = HashSet::new();
        let mut commands = Vec::with_capacity(self.commands.len());
        for command in &self.commands {
            let relative = workspace_relative_path(Path::new(&command.filename))
                .map_err(|e| DiagError::Config(format!("command filename {:?}: {}", command.filename, e)))?;
            if !seen.insert(relative.clone()) {
                return Err(DiagError::Config(format!(
                    "duplicate command filename {:?}",
                    command.filename
                )));
            }
            commands.push(CommandSpec {
                shell_command: command.command.clone(),
                relative_output_path: relative,
            });
        }

        let mut filters = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let regex = Regex::new(&filter.pattern).map_err(|e| {
                DiagError::Config(format!("invalid filter pattern {:?}: {}", filter.pattern, e))
            })?;
            translate_replacement(&filter.repl, &regex).map_err(|e| {
                DiagError::Config(format!("invalid filter replacement {:?}: {}", filter.repl, e))
            })?;
            filters.push(FilterSpec {
                glob_pattern: filter.glob.clone(),
                match_pattern: filter.pattern.clone(),
                replacement: filter.repl.clone(),
            });
        }

        Ok(CollectionOptions {
            file_wildcards: self.files.clone(),
            filters,
            commands,
            service_wildcards: self.journald_logs.names.clone(),
            service_log_line_count: self.journald_logs.lines_number,
            command_timeout,
        })
    }
}

impl MqttConfig {
    /// Resolve the broker into a host and port.
    pub fn endpoint(&self) -> Result<(String, u16)> {
        let broker = self.broker.trim();
        let rest = if let Some((scheme, rest)) = broker.split_once("://") {
            match scheme {
                "tcp" | "mqtt" => rest,
                other => {
                    return Err(DiagError::Config(format!(
                        "unsupported broker scheme {:?} in {:?}",
                        other, broker
                    )))
                }
            }
        } else {
            broker
        };
        let rest = rest.trim_end_matches('/');

        let (host, url_port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| DiagError::Config(format!("invalid broker port in {:?}", broker)))?;
                (host, Some(port))
            }
            None => (rest, None),
        };

        if host.is_empty() {
            return Err(DiagError::Config("mqtt.broker is empty".to_string()));
        }

        let port = self.port.or(url_port).unwrap_or(MQTT_DEFAULT_PORT);
        Ok((host.to_string(), port))
    }
}

/// Load the configuration from `config_path`, or from the packaged default.
pub fn load_config(config_path: Option<&Path>) -> Result<DiagConfig> {
    let path: PathBuf = match config_path {
        Some(path) => path.to_path_buf(),
        None => {
            info!("No config path provided, using {}", DEFAULT_CONF_PATH);
            PathBuf::from(DEFAULT_CONF_PATH)
        }
    };
    DiagConfig::from_yaml_file(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    const SAMPLE: &str = r#"
commands:
  - command: dmesg
    filename: dmesg
  - command: ip addr
    filename: network/ip_addr
files:
  - /etc/wb-*.conf
  - /var/log/syslog*
filters:
  - glob: "etc/mosquitto/conf.d/*.conf"
    pattern: "password .*"
    repl: "password ***"
journald_logs:
  lines_number: 25
  names:
    - wb-*
    - mosquitto*
timeout: 7.5
mqtt:
  broker: tcp://localhost:1884
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = DiagConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.commands.len(), 2);
        assert_eq!(config.files, vec!["/etc/wb-*.conf", "/var/log/syslog*"]);
        assert_eq!(config.filters[0].repl, "password ***");
        assert_eq!(config.journald_logs.lines_number, 25);
        assert_eq!(config.timeout, Some(7.5));
        assert!(config.mqtt.is_some());
    }

    #[test]
    fn test_to_options_preserves_order() {
        let options = DiagConfig::from_yaml_str(SAMPLE).unwrap().to_options(None).unwrap();
        assert_eq!(options.commands[0].shell_command, "dmesg");
        assert_eq!(options.commands[1].relative_output_path, PathBuf::from("network/ip_addr"));
        assert_eq!(options.service_wildcards, vec!["wb-*", "mosquitto*"]);
        assert_eq!(options.service_log_line_count, 25);
        assert_eq!(options.command_timeout, Duration::from_millis(7500));
    }

    #[test]
    fn test_timeout_override_wins() {
        let options = DiagConfig::from_yaml_str(SAMPLE).unwrap().to_options(Some(3.0)).unwrap();
        assert_eq!(options.command_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_null_sections_are_empty() {
        let config = DiagConfig::from_yaml_str(
            "commands:\nfiles:\nfilters:\njournald_logs:\n  lines_number:\n  names:\ntimeout: 5\n",
        )
        .unwrap();
        let options = config.to_options(None).unwrap();
        assert!(options.commands.is_empty());
        assert!(options.file_wildcards.is_empty());
        assert!(options.filters.is_empty());
        assert_eq!(options.service_log_line_count, 0);
    }

    #[test]
    fn test_missing_timeout_is_config_error() {
        let config = DiagConfig::from_yaml_str("files: []\n").unwrap();
        let err = config.to_options(None).unwrap_err();
        assert!(matches!(err, DiagError::Config(_)));
    }

    #[test]
    fn test_non_positive_timeout_rejected() {
        let config = DiagConfig::from_yaml_str("timeout: 0\n").unwrap();
        assert!(config.to_options(None).is_err());
        assert!(config.to_options(Some(-1.0)).is_err());
    }

    #[test]
    fn test_huge_timeout_rejected() {
        let config = DiagConfig::from_yaml_str("timeout: 1e20\n").unwrap();
        assert!(matches!(config.to_options(None), Err(DiagError::Config(_))));
        assert!(matches!(config.to_options(Some(f64::MAX)), Err(DiagError::Config(_))));
        assert!(matches!(config.to_options(Some(f64::NAN)), Err(DiagError::Config(_))));
        assert!(matches!(config.to_options(Some(f64::INFINITY)), Err(DiagError::Config(_))));
    }

    #[test]
    fn test_python_style_replacement_validated() {
        let valid = DiagConfig::from_yaml_str(
            "timeout: 1\nfilters:\n  - {glob: '*', pattern: '(pass)=\\S+', repl: '\\1=***'}\n",
        )
        .unwrap();
        assert!(valid.to_options(None).is_ok());

        let dangling = DiagConfig::from_yaml_str(
            "timeout: 1\nfilters:\n  - {glob: '*', pattern: 'pass=\\S+', repl: '\\1=***'}\n",
        )
        .unwrap();
        assert!(matches!(dangling.to_options(None), Err(DiagError::Config(_))));
    }

    #[test]
    fn test_duplicate_command_filename_rejected() {
        let config = DiagConfig::from_yaml_str(
            "timeout: 1\ncommands:\n  - {command: uptime, filename: out}\n  - {command: date, filename: /out}\n",
        )
        .unwrap();
        let err = config.to_options(None).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_escaping_command_filename_rejected() {
        let config = DiagConfig::from_yaml_str(
            "timeout: 1\ncommands:\n  - {command: uptime, filename: ../../etc/passwd}\n",
        )
        .unwrap();
        assert!(matches!(config.to_options(None), Err(DiagError::Config(_))));
    }

    #[test]
    fn test_invalid_filter_pattern_rejected() {
        let config = DiagConfig::from_yaml_str(
            "timeout: 1\nfilters:\n  - {glob: '*', pattern: '(unclosed', repl: x}\n",
        )
        .unwrap();
        assert!(matches!(config.to_options(None), Err(DiagError::Config(_))));
    }

    #[test]
    fn test_invalid_yaml_error() {
        let err = DiagConfig::from_yaml_str("files: [unterminated").unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML"));
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_config(Some(&temp_dir.path().join("absent.conf"))).unwrap_err();
        assert!(matches!(err, DiagError::NotFound { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), SAMPLE).unwrap();
        let config = load_config(Some(temp_file.path())).unwrap();
        assert_eq!(config.journald_logs.names.len(), 2);
    }

    #[test]
    fn test_packaged_sample_config_is_valid() {
        let config =
            DiagConfig::from_yaml_str(include_str!("../../config/wb-diag-collect.conf")).unwrap();
        let options = config.to_options(None).unwrap();
        assert!(!options.commands.is_empty());
        assert_eq!(options.command_timeout, Duration::from_secs(10));
        assert_eq!(
            config.mqtt.unwrap().endpoint().unwrap(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn test_mqtt_endpoint_variants() {
        let endpoint = |broker: &str, port: Option<u16>| {
            MqttConfig { broker: broker.to_string(), port }.endpoint()
        };
        assert_eq!(endpoint("localhost", None).unwrap(), ("localhost".to_string(), 1883));
        assert_eq!(endpoint("tcp://10.0.0.1:1884", None).unwrap(), ("10.0.0.1".to_string(), 1884));
        assert_eq!(endpoint("mqtt://broker/", Some(2000)).unwrap(), ("broker".to_string(), 2000));
        assert_eq!(endpoint("broker:1999", None).unwrap(), ("broker".to_string(), 1999));
        assert!(endpoint("unix:///var/run/mosquitto.sock", None).is_err());
        assert!(endpoint("tcp://", None).is_err());
    }
}
