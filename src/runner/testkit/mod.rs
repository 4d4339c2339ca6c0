//! An in-memory `Host` for tests. `TestHost` plays the part of the host runtime: it holds the config and
//! relations for the next event, records every status that gets set, and provides fake containers whose
//! supervisor combines layers and replans the way a real one would.
use crate::{
    config::{ConfigOptions, ConfigValue},
    error::ReplanError,
    handler::{Container, Host, Status},
    ingress::{Ingress, IngressConfig},
    layer::{Layer, Service, EXPORTER_CONTAINER},
    resource::{Relation, RelationData},
    state::{MemoryStore, StateStore, StoredRelations},
};

use anyhow::anyhow;
use serde::Serialize;
use serde_json::Value;

use std::collections::BTreeMap;

pub trait ToJson {
    fn to_json(&self) -> Value;
}

impl<T: Serialize> ToJson for T {
    fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("failed to serialize value")
    }
}

/// A container whose supervisor keeps layers in memory
#[derive(Debug, Clone, Default)]
pub struct FakeContainer {
    reachable: bool,
    start_failure: Option<String>,
    layers: BTreeMap<String, Layer>,
    running: BTreeMap<String, Service>,
    replan_count: usize,
    restart_count: usize,
}

impl FakeContainer {
    pub fn reachable() -> FakeContainer {
        FakeContainer {
            reachable: true,
            ..Default::default()
        }
    }

    pub fn unreachable() -> FakeContainer {
        FakeContainer::default()
    }

    pub fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    /// Makes every following replan fail as if the service exited immediately after starting
    pub fn fail_to_start(&mut self, message: impl Into<String>) {
        self.start_failure = Some(message.into());
    }

    pub fn layer(&self, label: &str) -> Option<&Layer> {
        self.layers.get(label)
    }

    /// The combination of every layer, which is what the supervisor would run
    pub fn plan(&self) -> Layer {
        let mut plan = Layer::default();
        for layer in self.layers.values() {
            plan.combine(layer);
        }
        plan
    }

    pub fn running_services(&self) -> &BTreeMap<String, Service> {
        &self.running
    }

    pub fn replan_count(&self) -> usize {
        self.replan_count
    }

    /// The number of times a service was (re)started because its definition changed
    pub fn restart_count(&self) -> usize {
        self.restart_count
    }
}

impl Container for FakeContainer {
    fn can_connect(&self) -> bool {
        self.reachable
    }

    fn add_layer(&mut self, label: &str, layer: &Layer, combine: bool) -> Result<(), anyhow::Error> {
        if !self.reachable {
            return Err(anyhow!("cannot connect to supervisor"));
        }
        match self.layers.get_mut(label) {
            Some(existing) if combine => existing.combine(layer),
            Some(_) => return Err(anyhow!("layer '{}' already exists", label)),
            None => {
                self.layers.insert(label.to_owned(), layer.clone());
            }
        }
        Ok(())
    }

    fn replan(&mut self) -> Result<(), ReplanError> {
        if !self.reachable {
            return Err(ReplanError::Connection(anyhow!("cannot connect to supervisor")));
        }
        self.replan_count += 1;
        if let Some(message) = self.start_failure.as_ref() {
            return Err(ReplanError::Change(message.clone()));
        }
        let plan = self.plan();
        for (name, service) in plan.services.iter() {
            if self.running.get(name) != Some(service) {
                self.restart_count += 1;
            }
        }
        self.running = plan.services;
        Ok(())
    }
}

/// Records every distinct config it's given
#[derive(Debug, Clone, Default)]
pub struct RecordingIngress {
    configs: Vec<IngressConfig>,
    fail: bool,
}

impl RecordingIngress {
    pub fn configs(&self) -> &[IngressConfig] {
        &self.configs
    }

    pub fn last(&self) -> Option<&IngressConfig> {
        self.configs.last()
    }

    pub fn set_failing(&mut self, fail: bool) {
        self.fail = fail;
    }
}

impl Ingress for RecordingIngress {
    fn update_config(&mut self, config: &IngressConfig) -> Result<(), anyhow::Error> {
        if self.fail {
            return Err(anyhow!("ingress relation is unavailable"));
        }
        if self.configs.last() != Some(config) {
            self.configs.push(config.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TestHost {
    app_name: String,
    leader: bool,
    config: ConfigOptions,
    relations: Vec<Relation>,
    peer_app_data: Option<RelationData>,
    requested_databases: Vec<(String, String)>,
    store: MemoryStore,
    containers: BTreeMap<String, FakeContainer>,
    ingress: RecordingIngress,
    statuses: Vec<Status>,
}

impl TestHost {
    /// Creates a host with a reachable container for the workload and for the exporter sidecar
    pub fn new(app_name: impl Into<String>) -> TestHost {
        let mut containers = BTreeMap::new();
        containers.insert("gunicorn".to_owned(), FakeContainer::reachable());
        containers.insert(EXPORTER_CONTAINER.to_owned(), FakeContainer::reachable());
        TestHost {
            app_name: app_name.into(),
            leader: false,
            config: ConfigOptions::new(),
            relations: Vec::new(),
            peer_app_data: None,
            requested_databases: Vec::new(),
            store: MemoryStore::new(),
            containers,
            ingress: RecordingIngress::default(),
            statuses: Vec::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.set_config(key, value);
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.add_relation(relation);
        self
    }

    /// Replaces the container with the given name, or adds it
    pub fn with_container(mut self, name: &str, container: FakeContainer) -> Self {
        self.containers.insert(name.to_owned(), container);
        self
    }

    /// Starts out with the state that earlier events persisted
    pub fn with_stored(mut self, snapshot: StoredRelations) -> Self {
        self.store = MemoryStore::from_snapshot(snapshot);
        self
    }

    pub fn as_leader(mut self) -> Self {
        self.leader = true;
        self
    }

    pub fn with_peer_relation(mut self) -> Self {
        self.peer_app_data = Some(RelationData::new());
        self
    }

    pub fn set_config(&mut self, key: &str, value: impl Into<ConfigValue>) {
        self.config.insert(key.to_owned(), value.into());
    }

    pub fn unset_config(&mut self, key: &str) {
        self.config.remove(key);
    }

    pub fn set_leader(&mut self, leader: bool) {
        self.leader = leader;
    }

    /// Adds the relation, replacing any existing relation with the same name and id
    pub fn add_relation(&mut self, relation: Relation) {
        self.remove_relation(&relation.name, relation.id);
        self.relations.push(relation);
    }

    pub fn remove_relation(&mut self, name: &str, id: u64) {
        self.relations.retain(|r| !(r.name == name && r.id == id));
    }

    pub fn fake_container(&mut self, name: &str) -> &mut FakeContainer {
        self.containers
            .get_mut(name)
            .unwrap_or_else(|| panic!("no container named '{}'", name))
    }

    pub fn ingress_recorder(&mut self) -> &mut RecordingIngress {
        &mut self.ingress
    }

    pub fn stored(&self) -> &MemoryStore {
        &self.store
    }

    pub fn peer_data(&self) -> Option<&RelationData> {
        self.peer_app_data.as_ref()
    }

    pub fn requested_databases(&self) -> &[(String, String)] {
        &self.requested_databases
    }

    /// The most recent status set by the core
    pub fn status(&self) -> Option<&Status> {
        self.statuses.last()
    }

    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    pub fn assert_status(&self, expected: &Status) {
        match self.status() {
            Some(actual) if actual == expected => {}
            Some(actual) => panic!("Expected status '{}' but was '{}'", expected, actual),
            None => panic!("Expected status '{}' but no status was set", expected),
        }
    }
}

impl Host for TestHost {
    fn app_name(&self) -> &str {
        self.app_name.as_str()
    }

    fn is_leader(&self) -> bool {
        self.leader
    }

    fn config(&self) -> &ConfigOptions {
        &self.config
    }

    fn relations(&self) -> &[Relation] {
        self.relations.as_slice()
    }

    fn peer_app_data(&self) -> Option<&RelationData> {
        self.peer_app_data.as_ref()
    }

    fn set_peer_app_data(&mut self, data: RelationData) -> Result<(), anyhow::Error> {
        if !self.leader {
            return Err(anyhow!("only the leader may write application data"));
        }
        let peer = self
            .peer_app_data
            .as_mut()
            .ok_or_else(|| anyhow!("peer relation has not been established"))?;
        peer.extend(data);
        Ok(())
    }

    fn request_database(&mut self, relation: &str, database: &str) -> Result<(), anyhow::Error> {
        self.requested_databases
            .push((relation.to_owned(), database.to_owned()));
        Ok(())
    }

    fn store(&mut self) -> &mut dyn StateStore {
        &mut self.store
    }

    fn container(&mut self, name: &str) -> Option<&mut dyn Container> {
        self.containers
            .get_mut(name)
            .map(|c| c as &mut dyn Container)
    }

    fn ingress(&mut self) -> &mut dyn Ingress {
        &mut self.ingress
    }

    fn set_status(&mut self, status: &Status) {
        self.statuses.push(status.clone());
    }
}
