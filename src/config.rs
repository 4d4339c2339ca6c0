use crate::error::ConfigError;

use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// Options that must be set to a non-empty value before the workload is configured
pub const REQUIRED_OPTIONS: &[&str] = &["external_hostname"];

pub const EXTERNAL_HOSTNAME: &str = "external_hostname";
pub const EXTERNAL_PORT: &str = "external_port";
pub const STARTUP_COMMAND: &str = "startup_command";
pub const ENVIRONMENT: &str = "environment";

pub const DEFAULT_STARTUP_COMMAND: &str = "/srv/gunicorn/run";
pub const DEFAULT_PORT: u16 = 80;

const CONFIG_YAML: &str = include_str!("../config.yaml");
const METADATA_YAML: &str = include_str!("../metadata.yaml");

/// A single option value as delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl ConfigValue {
    /// Unset strings, zero and `false` all count as "not set"
    pub fn is_set(&self) -> bool {
        match self {
            ConfigValue::Bool(b) => *b,
            ConfigValue::Int(i) => *i != 0,
            ConfigValue::String(s) => !s.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Int(_) => "int",
            ConfigValue::String(_) => "string",
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> ConfigValue {
        ConfigValue::String(s.to_owned())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> ConfigValue {
        ConfigValue::String(s)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> ConfigValue {
        ConfigValue::Int(i)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> ConfigValue {
        ConfigValue::Bool(b)
    }
}

impl Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(i) => write!(f, "{}", i),
            ConfigValue::String(s) => f.write_str(s),
        }
    }
}

/// The raw option bag for a single event. Only options the operator has explicitly set need to be present.
pub type ConfigOptions = BTreeMap<String, ConfigValue>;

#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    String,
    Int,
    Boolean,
}

impl OptionType {
    fn name(self) -> &'static str {
        match self {
            OptionType::String => "string",
            OptionType::Int => "int",
            OptionType::Boolean => "boolean",
        }
    }

    fn accepts(self, value: &ConfigValue) -> bool {
        match (self, value) {
            (OptionType::String, ConfigValue::String(_)) => true,
            (OptionType::Int, ConfigValue::Int(_)) => true,
            (OptionType::Boolean, ConfigValue::Bool(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OptionSpec {
    #[serde(rename = "type")]
    pub option_type: OptionType,
    #[serde(default)]
    pub default: Option<ConfigValue>,
    #[serde(default)]
    pub description: String,
}

/// The declared set of options, as found in `config.yaml`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigSchema {
    pub options: BTreeMap<String, OptionSpec>,
}

impl ConfigSchema {
    pub fn from_yaml(yaml: &str) -> Result<ConfigSchema, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// The schema that ships with this crate
    pub fn bundled() -> Result<ConfigSchema, serde_yaml::Error> {
        ConfigSchema::from_yaml(CONFIG_YAML)
    }

    /// Overlays the given options on top of the declared defaults, checking the type of every
    /// declared option. Options that are not declared are ignored.
    pub fn resolve(&self, options: &ConfigOptions) -> Result<ConfigOptions, ConfigError> {
        let mut resolved = ConfigOptions::new();
        for (name, spec) in self.options.iter() {
            let value = options.get(name).or_else(|| spec.default.as_ref());
            if let Some(value) = value {
                if !spec.option_type.accepts(value) {
                    log::error!(
                        "Juju config item '{}' has type {} but {} is declared",
                        name,
                        value.type_name(),
                        spec.option_type.name()
                    );
                    return Err(ConfigError::InvalidType {
                        option: name.clone(),
                        expected: spec.option_type.name(),
                    });
                }
                resolved.insert(name.clone(), value.clone());
            }
        }
        for name in options.keys().filter(|k| !self.options.contains_key(*k)) {
            log::debug!("Ignoring undeclared config option: '{}'", name);
        }
        Ok(resolved)
    }
}

/// The typed view of the options that the reconciler works with. The `environment` template is the one
/// field that stays dynamic, since its contents can only be interpreted once relation data is known.
#[derive(Debug, Clone, PartialEq)]
pub struct CharmConfig {
    pub external_hostname: String,
    pub external_port: u16,
    pub startup_command: String,
    pub environment: String,
}

impl Default for CharmConfig {
    fn default() -> CharmConfig {
        CharmConfig {
            external_hostname: String::new(),
            external_port: DEFAULT_PORT,
            startup_command: DEFAULT_STARTUP_COMMAND.to_owned(),
            environment: String::new(),
        }
    }
}

impl CharmConfig {
    pub fn new(external_hostname: impl Into<String>) -> CharmConfig {
        CharmConfig {
            external_hostname: external_hostname.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.external_port = port;
        self
    }

    pub fn with_startup_command(mut self, command: impl Into<String>) -> Self {
        self.startup_command = command.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Builds the typed config from the raw options. This does not check for required options, since the
    /// environment needs to be inspected before that happens. Use `validate` for that.
    pub fn from_options(schema: &ConfigSchema, options: &ConfigOptions) -> Result<CharmConfig, ConfigError> {
        let resolved = schema.resolve(options)?;
        let mut config = CharmConfig::default();
        if let Some(value) = resolved.get(EXTERNAL_HOSTNAME) {
            config.external_hostname = value.to_string();
        }
        if let Some(value) = resolved.get(STARTUP_COMMAND) {
            config.startup_command = value.to_string();
        }
        if let Some(value) = resolved.get(ENVIRONMENT) {
            config.environment = value.to_string();
        }
        match resolved.get(EXTERNAL_PORT) {
            Some(ConfigValue::Int(port)) if *port > 0 && *port <= i64::from(u16::MAX) => {
                config.external_port = *port as u16;
            }
            Some(other) => {
                log::error!("Juju config item '{}' is not a valid port: {}", EXTERNAL_PORT, other);
                return Err(ConfigError::InvalidType {
                    option: EXTERNAL_PORT.to_owned(),
                    expected: "port number",
                });
            }
            None => {}
        }
        Ok(config)
    }

    /// The typed options converted back to raw option values
    pub fn to_options(&self) -> ConfigOptions {
        let mut options = ConfigOptions::new();
        options.insert(EXTERNAL_HOSTNAME.to_owned(), self.external_hostname.as_str().into());
        options.insert(EXTERNAL_PORT.to_owned(), i64::from(self.external_port).into());
        options.insert(STARTUP_COMMAND.to_owned(), self.startup_command.as_str().into());
        options.insert(ENVIRONMENT.to_owned(), self.environment.as_str().into());
        options
    }

    /// Checks that every option in `REQUIRED_OPTIONS` has been set
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_with(REQUIRED_OPTIONS)
    }

    /// Checks that each of the given options has been set. Unknown option names always count as unset.
    pub fn validate_with<S: AsRef<str>>(&self, required: &[S]) -> Result<(), ConfigError> {
        let options = self.to_options();
        let mut missing = Vec::new();
        for name in required {
            let required: &str = name.as_ref();
            if !options.get(required).map(ConfigValue::is_set).unwrap_or(false) {
                log::error!("Required Juju config item not set : {}", required);
                missing.push(required.to_owned());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            missing.sort();
            Err(ConfigError::MissingRequired(missing))
        }
    }

    /// The process start command, falling back to the default when the option is blank
    pub fn command(&self) -> &str {
        let trimmed = self.startup_command.trim();
        if trimmed.is_empty() {
            DEFAULT_STARTUP_COMMAND
        } else {
            trimmed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContainerMeta {
    #[serde(default)]
    pub resource: Option<String>,
}

/// The parts of `metadata.yaml` that the reconciler needs
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CharmMeta {
    pub name: String,
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerMeta>,
}

impl CharmMeta {
    pub fn from_yaml(yaml: &str) -> Result<CharmMeta, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn bundled() -> Result<CharmMeta, serde_yaml::Error> {
        CharmMeta::from_yaml(METADATA_YAML)
    }

    /// The name of the workload container, which is the charm name without the `-k8s` suffix
    pub fn container_name(&self) -> &str {
        self.name.strip_suffix("-k8s").unwrap_or(self.name.as_str())
    }

    /// Every declared container other than the main workload
    pub fn sidecar_names(&self) -> impl Iterator<Item = &str> {
        let main = self.container_name();
        self.containers
            .keys()
            .map(String::as_str)
            .filter(move |name| *name != main)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn options(pairs: &[(&str, ConfigValue)]) -> ConfigOptions {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn bundled_schema_provides_defaults() {
        let schema = ConfigSchema::bundled().expect("failed to parse config.yaml");
        let config = CharmConfig::from_options(&schema, &ConfigOptions::new()).unwrap();
        assert_eq!(CharmConfig::default(), config);
    }

    #[test]
    fn options_override_defaults() {
        let schema = ConfigSchema::bundled().unwrap();
        let opts = options(&[
            (EXTERNAL_HOSTNAME, "example.com".into()),
            (EXTERNAL_PORT, 8080i64.into()),
            (ENVIRONMENT, "A: b".into()),
        ]);
        let config = CharmConfig::from_options(&schema, &opts).unwrap();
        assert_eq!("example.com", config.external_hostname);
        assert_eq!(8080, config.external_port);
        assert_eq!("A: b", config.environment);
        assert_eq!(DEFAULT_STARTUP_COMMAND, config.command());
    }

    #[test]
    fn wrongly_typed_option_is_rejected() {
        let schema = ConfigSchema::bundled().unwrap();
        let opts = options(&[(EXTERNAL_PORT, "eighty".into())]);
        let err = CharmConfig::from_options(&schema, &opts).unwrap_err();
        assert_eq!(
            ConfigError::InvalidType {
                option: EXTERNAL_PORT.to_owned(),
                expected: "int"
            },
            err
        );
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let schema = ConfigSchema::bundled().unwrap();
        let opts = options(&[(EXTERNAL_PORT, 70000i64.into())]);
        assert!(CharmConfig::from_options(&schema, &opts).is_err());
    }

    #[test]
    fn validate_reports_missing_hostname() {
        let err = CharmConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("external_hostname"));
        assert!(CharmConfig::new("example.com").validate().is_ok());
    }

    #[test]
    fn every_required_option_is_checked() {
        let config = CharmConfig::new("example.com").with_startup_command("");
        let required = [STARTUP_COMMAND, EXTERNAL_HOSTNAME];
        assert_eq!(
            Err(ConfigError::MissingRequired(vec![STARTUP_COMMAND.to_owned()])),
            config.validate_with(&required)
        );
        assert_eq!(
            Err(ConfigError::MissingRequired(vec![
                EXTERNAL_HOSTNAME.to_owned(),
                STARTUP_COMMAND.to_owned()
            ])),
            CharmConfig::default().with_startup_command("").validate_with(&required)
        );
        assert!(CharmConfig::new("example.com").validate_with(&required).is_ok());
    }

    #[test]
    fn unknown_required_options_are_unset() {
        let err = CharmConfig::new("example.com")
            .validate_with(&["no_such_option"])
            .unwrap_err();
        assert_eq!(ConfigError::MissingRequired(vec!["no_such_option".to_owned()]), err);
    }

    #[test]
    fn blank_startup_command_falls_back_to_default() {
        let config = CharmConfig::new("example.com").with_startup_command("  ");
        assert_eq!(DEFAULT_STARTUP_COMMAND, config.command());
    }

    #[test]
    fn container_name_strips_k8s_suffix() {
        let meta = CharmMeta::bundled().expect("failed to parse metadata.yaml");
        assert_eq!("gunicorn", meta.container_name());
        let sidecars: Vec<&str> = meta.sidecar_names().collect();
        assert_eq!(vec!["statsd-prometheus-exporter"], sidecars);
    }
}
