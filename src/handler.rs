//! The seams between the reconciliation core and the host runtime. The host delivers one `Event` at a time
//! along with a `Host` implementation, which provides a snapshot of the model (config, relations,
//! leadership) and handles to the collaborators that the core drives (containers, ingress, persisted state).
use crate::config::ConfigOptions;
use crate::error::ReplanError;
use crate::ingress::Ingress;
use crate::layer::Layer;
use crate::relations::{mongodb, pg};
use crate::resource::{Relation, RelationData};
use crate::state::StateStore;

use std::fmt::{self, Display};

/// The coarse, human readable status of the unit. This is the only thing the reconciler ever reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", content = "message", rename_all = "lowercase")]
pub enum Status {
    Active,
    Blocked(String),
    Maintenance(String),
}

impl Status {
    /// The status a unit starts out in, before any event has been reconciled
    pub fn initial() -> Status {
        Status::Maintenance("starting".to_owned())
    }

    pub fn blocked(message: impl Into<String>) -> Status {
        Status::Blocked(message.into())
    }

    pub fn maintenance(message: impl Into<String>) -> Status {
        Status::Maintenance(message.into())
    }

    pub fn level(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Blocked(_) => "blocked",
            Status::Maintenance(_) => "maintenance",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Status::Active => "",
            Status::Blocked(msg) | Status::Maintenance(msg) => msg.as_str(),
        }
    }

    pub fn is_active(&self) -> bool {
        *self == Status::Active
    }
}

impl Default for Status {
    fn default() -> Status {
        Status::initial()
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message().is_empty() {
            f.write_str(self.level())
        } else {
            write!(f, "{}: {}", self.level(), self.message())
        }
    }
}

/// The result of handling a single event
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The event was handled, leaving the unit in this status
    Terminal(Status),
    /// The event must be delivered again later. The status, if any, should be shown in the meantime.
    RetryLater(Option<Status>),
    /// The event was handled without reconciling, so the status is left as it was
    Ignored,
}

impl Outcome {
    pub fn status(&self) -> Option<&Status> {
        match self {
            Outcome::Terminal(status) => Some(status),
            Outcome::RetryLater(status) => status.as_ref(),
            Outcome::Ignored => None,
        }
    }

    pub fn is_retry(&self) -> bool {
        match self {
            Outcome::RetryLater(_) => true,
            _ => false,
        }
    }
}

/// Events that the host delivers to the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    ConfigChanged,
    UpgradeCharm,
    PebbleReady { container: String },
    /// Any relation whose raw data is used for the template context
    RelationChanged { relation: String, id: u64 },
    PeerRelationChanged,
    PgRelationJoined(pg::RelationJoined),
    PgMasterChanged(pg::MasterChanged),
    PgStandbyChanged(pg::StandbyChanged),
    MongodbDatabaseCreated(mongodb::DatabaseCreated),
    MongodbEndpointsChanged(mongodb::EndpointsChanged),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ConfigChanged => "config-changed",
            Event::UpgradeCharm => "upgrade-charm",
            Event::PebbleReady { .. } => "pebble-ready",
            Event::RelationChanged { .. } => "relation-changed",
            Event::PeerRelationChanged => "peer-relation-changed",
            Event::PgRelationJoined(_) => "pg-relation-joined",
            Event::PgMasterChanged(_) => "pg-master-changed",
            Event::PgStandbyChanged(_) => "pg-standby-changed",
            Event::MongodbDatabaseCreated(_) => "mongodb-database-created",
            Event::MongodbEndpointsChanged(_) => "mongodb-endpoints-changed",
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A handle to the supervisor running inside one workload container
pub trait Container {
    /// Returns false until the supervisor inside the container is reachable
    fn can_connect(&self) -> bool;

    /// Adds a layer with the given label. When `combine` is true and a layer with the same label already
    /// exists, the new layer is combined into it rather than being rejected.
    fn add_layer(&mut self, label: &str, layer: &Layer, combine: bool) -> Result<(), anyhow::Error>;

    /// Starts, stops and restarts services so that they match the current plan. Services whose
    /// definitions are unchanged are left running.
    fn replan(&mut self) -> Result<(), ReplanError>;
}

/// Everything the core needs from the host runtime while handling an event. All calls are synchronous,
/// and the host guarantees that only one event is in flight at a time.
pub trait Host {
    fn app_name(&self) -> &str;

    fn is_leader(&self) -> bool;

    /// The raw option values for this event
    fn config(&self) -> &ConfigOptions;

    /// Every relation instance currently established, including peer relations
    fn relations(&self) -> &[Relation];

    /// The application data bag of the peer relation, if the peer relation exists
    fn peer_app_data(&self) -> Option<&RelationData>;

    /// Writes the given keys into the peer relation's application data. Only the leader may do this.
    fn set_peer_app_data(&mut self, data: RelationData) -> Result<(), anyhow::Error>;

    /// Publishes the name of the database this application wants on the given relation
    fn request_database(&mut self, relation: &str, database: &str) -> Result<(), anyhow::Error>;

    fn store(&mut self) -> &mut dyn StateStore;

    fn container(&mut self, name: &str) -> Option<&mut dyn Container>;

    fn ingress(&mut self) -> &mut dyn Ingress;

    fn set_status(&mut self, status: &Status);
}
