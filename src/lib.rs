//! The reconciliation core of an operator that runs a Gunicorn application under Juju on Kubernetes.
//!
//! The host runtime delivers one event at a time, along with a `Host` implementation that exposes the
//! current config, the relations, and handles to the workload containers. Every event that could change
//! the workload ends up in a full reconciliation, which:
//!
//! 1. builds a template context out of the relation data and the persisted database credentials
//! 2. renders the operator's `environment` template against it, deferring if any variable is unresolved
//! 3. builds the layer for each container and submits all of them, or none of them
//! 4. reports a single `Status` back to the host
//!
//! ```no_run
//! use gunicorn_operator::prelude::*;
//!
//! fn deliver(host: &mut impl Host, dispatcher: &mut Dispatcher) {
//!     // events that are deferred are kept by the dispatcher and redelivered before the next one
//!     let outcome = dispatcher.dispatch(host, Event::ConfigChanged);
//!     if let Some(status) = outcome.status() {
//!         println!("unit is now {}", status);
//!     }
//! }
//!
//! let dispatcher = Dispatcher::new(Charm::bundled().expect("bundled metadata is invalid"));
//! ```
//!
//! The `testkit` feature provides `runner::testkit::TestHost`, an in-memory host that is useful for testing.

#[macro_use]
extern crate serde_derive;

pub mod action;
pub mod charm;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod handler;
pub mod ingress;
pub mod layer;
pub mod relations;
pub mod resource;
pub mod runner;
pub mod state;
pub mod template;

pub use serde;
pub use serde_json;
pub use serde_yaml;

pub mod prelude {
    pub use crate::charm::Charm;
    pub use crate::config::{CharmConfig, CharmMeta, ConfigOptions, ConfigSchema, ConfigValue};
    pub use crate::error::{ConfigError, EnvError, ReplanError};
    pub use crate::handler::{Container, Event, Host, Outcome, Status};
    pub use crate::ingress::{Ingress, IngressConfig};
    pub use crate::layer::{Layer, WorkloadDescriptor};
    pub use crate::resource::{Relation, RelationData};
    pub use crate::runner::Dispatcher;
    pub use crate::state::StateStore;
    pub use serde::{Deserialize, Serialize};
}
