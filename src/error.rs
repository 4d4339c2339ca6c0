//! Error values for every way a reconciliation can fail. None of these ever cross the
//! `Charm` boundary; they are logged and then mapped onto a `Status`.
use std::collections::BTreeSet;
use std::fmt::{self, Display};

/// Problems with the configuration options themselves, as opposed to the rendered environment.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// One or more required options are unset or empty. Names are kept sorted.
    MissingRequired(Vec<String>),
    /// An option was supplied with a value of the wrong type
    InvalidType {
        option: String,
        expected: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(names) => write!(
                f,
                "Required Juju config item(s) not set : {}",
                names.join(", ")
            ),
            ConfigError::InvalidType { option, expected } => write!(
                f,
                "Juju config item '{}' must be of type {}",
                option, expected
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Returned when a template cannot be parsed by the renderer
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateError {
    Unterminated { offset: usize },
    /// A `{% %}` tag whose keyword isn't `if`, `elif`, `else`, `endif`, `for` or `endfor`
    UnsupportedBlock { tag: String },
    /// A closing or continuation tag with no matching opening block
    UnexpectedBlock { tag: String },
    /// An `if` or `for` block that is never closed
    Unclosed { block: String },
    InvalidExpression { expression: String },
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TemplateError::Unterminated { offset } => {
                write!(f, "unterminated tag starting at offset {}", offset)
            }
            TemplateError::UnsupportedBlock { tag } => write!(f, "unsupported block tag: '{}'", tag),
            TemplateError::UnexpectedBlock { tag } => write!(f, "unexpected block tag: '{}'", tag),
            TemplateError::Unclosed { block } => write!(f, "block '{}' is never closed", block),
            TemplateError::InvalidExpression { expression } => {
                write!(f, "invalid variable expression: '{}'", expression)
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// Returned when the rendered environment is not a flat YAML mapping
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    Yaml { message: String },
    NotAMapping { found: &'static str },
    NonScalarValue { key: String },
    ComplexKey,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::Yaml { message } => write!(f, "invalid YAML: {}", message),
            ParseError::NotAMapping { found } => {
                write!(f, "expected a YAML mapping but found {}", found)
            }
            ParseError::NonScalarValue { key } => {
                write!(f, "value for key '{}' is not a scalar", key)
            }
            ParseError::ComplexKey => f.write_str("mapping keys must be scalars"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<serde_yaml::Error> for ParseError {
    fn from(err: serde_yaml::Error) -> ParseError {
        ParseError::Yaml {
            message: err.to_string(),
        }
    }
}

/// Ways that building the workload environment can fail. `Missing` is the only
/// condition that is worth retrying, since the relation data may still show up.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvError {
    Missing(BTreeSet<String>),
    MalformedTemplate(TemplateError),
    Malformed(ParseError),
}

impl EnvError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EnvError::Missing(_) => true,
            _ => false,
        }
    }
}

impl Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EnvError::Missing(vars) => {
                let names: Vec<&str> = vars.iter().map(String::as_str).collect();
                write!(f, "unresolved template variables: {}", names.join(", "))
            }
            EnvError::MalformedTemplate(err) => write!(f, "malformed template: {}", err),
            EnvError::Malformed(err) => write!(f, "malformed environment: {}", err),
        }
    }
}

impl std::error::Error for EnvError {}

impl From<TemplateError> for EnvError {
    fn from(err: TemplateError) -> EnvError {
        EnvError::MalformedTemplate(err)
    }
}

impl From<ParseError> for EnvError {
    fn from(err: ParseError) -> EnvError {
        EnvError::Malformed(err)
    }
}

/// Failure reported by the container supervisor when asked to replan services
#[derive(Debug)]
pub enum ReplanError {
    /// The supervisor accepted the layer but a service failed to start
    Change(String),
    /// The supervisor could not be reached
    Connection(anyhow::Error),
}

impl Display for ReplanError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReplanError::Change(msg) => write!(f, "service change failed: {}", msg),
            ReplanError::Connection(err) => write!(f, "supervisor unreachable: {}", err),
        }
    }
}

impl std::error::Error for ReplanError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_required_message_lists_names() {
        let err = ConfigError::MissingRequired(vec!["a".to_owned(), "external_hostname".to_owned()]);
        assert_eq!(
            "Required Juju config item(s) not set : a, external_hostname",
            err.to_string()
        );
    }

    #[test]
    fn only_missing_variables_are_retryable() {
        let mut vars = BTreeSet::new();
        vars.insert("pg".to_owned());
        assert!(EnvError::Missing(vars).is_retryable());
        assert!(!EnvError::Malformed(ParseError::ComplexKey).is_retryable());
    }
}
