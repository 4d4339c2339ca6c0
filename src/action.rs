//! Operator-triggered actions. These only ever read state, so they can run at any time, including while
//! events are deferred.
use crate::charm::Charm;
use crate::handler::Host;

use std::fmt::{self, Display};

pub const SHOW_ENVIRONMENT_CONTEXT: &str = "show-environment-context";

#[derive(Debug)]
pub enum ActionError {
    Unknown(String),
    Serialize(serde_json::Error),
}

impl Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ActionError::Unknown(name) => write!(f, "Unknown action: '{}'", name),
            ActionError::Serialize(err) => write!(f, "Failed to serialize action output: {}", err),
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ActionError::Serialize(err) => Some(err),
            ActionError::Unknown(_) => None,
        }
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> ActionError {
        ActionError::Serialize(err)
    }
}

/// Returns every variable that the `environment` template could currently reference, as a JSON array
/// of sorted, dotted paths
pub fn show_environment_context<H: Host + ?Sized>(charm: &Charm, host: &mut H) -> Result<String, ActionError> {
    let names = charm.context(host).variable_names();
    log::debug!("{} variables available to the environment template", names.len());
    let output = serde_json::to_string(&names)?;
    Ok(output)
}

/// Runs the action with the given name
pub fn run_action<H: Host + ?Sized>(charm: &Charm, host: &mut H, name: &str) -> Result<String, ActionError> {
    match name {
        SHOW_ENVIRONMENT_CONTEXT => show_environment_context(charm, host),
        other => {
            log::warn!("Received unknown action: '{}'", other);
            Err(ActionError::Unknown(other.to_owned()))
        }
    }
}
