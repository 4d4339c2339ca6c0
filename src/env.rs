use crate::config::CharmConfig;
use crate::context::Context;
use crate::error::{EnvError, ParseError};
use crate::template::{self, Rendered};

use serde_yaml::Value as YamlValue;

use std::collections::BTreeMap;

/// Environment variables for the workload process
pub type Env = BTreeMap<String, String>;

/// Renders the `environment` option against the context and parses the result as a flat YAML mapping.
///
/// An empty option, or one that renders to nothing but whitespace, yields an empty environment. Missing variables are reported without rendering anything,
/// and any rendered text that isn't a mapping of scalars is reported as malformed.
pub fn build_env(config: &CharmConfig, ctx: &Context) -> Result<Env, EnvError> {
    if config.environment.trim().is_empty() {
        return Ok(Env::new());
    }

    let rendered = match template::render(&config.environment, ctx)? {
        Rendered::Text(text) => text,
        Rendered::Missing(vars) => {
            let names: Vec<&str> = vars.iter().map(String::as_str).collect();
            log::info!(
                "Template for Juju config 'environment' references unresolved variables: {}",
                names.join(", ")
            );
            return Err(EnvError::Missing(vars));
        }
    };

    if rendered.trim().is_empty() {
        log::debug!("Template for Juju config 'environment' rendered no variables");
        return Ok(Env::new());
    }

    parse_env(&rendered).map_err(|err| {
        log::error!(
            "Could not parse the rendered 'environment' as a YAML dict: {} : {}",
            err,
            rendered
        );
        EnvError::Malformed(err)
    })
}

/// Parses YAML text that is expected to be a mapping of scalar keys to scalar values
pub fn parse_env(yaml: &str) -> Result<Env, ParseError> {
    let parsed: YamlValue = serde_yaml::from_str(yaml)?;
    let mapping = match parsed {
        YamlValue::Mapping(mapping) => mapping,
        other => {
            return Err(ParseError::NotAMapping {
                found: type_name(&other),
            })
        }
    };

    let mut env = Env::new();
    for (key, value) in mapping.iter() {
        let key = scalar_to_string(key).ok_or(ParseError::ComplexKey)?;
        let value = scalar_to_string(value).ok_or_else(|| ParseError::NonScalarValue { key: key.clone() })?;
        env.insert(key, value);
    }
    Ok(env)
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Null => Some(String::new()),
        _ => None,
    }
}

fn type_name(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "a boolean",
        YamlValue::Number(_) => "a number",
        YamlValue::String(_) => "a string",
        YamlValue::Sequence(_) => "a sequence",
        YamlValue::Mapping(_) => "a mapping",
    }
}
