//! The reconciler. Every event ends up in `Charm::reconcile`, which rebuilds the complete workload
//! description from the current inputs and either applies all of it or none of it.
use crate::config::{CharmConfig, CharmMeta, ConfigSchema, REQUIRED_OPTIONS};
use crate::context::{build_context, Context};
use crate::env::{build_env, Env};
use crate::error::{EnvError, ReplanError};
use crate::handler::{Event, Host, Outcome, Status};
use crate::ingress::IngressConfig;
use crate::layer::{build_descriptor, build_exporter_descriptor, WorkloadDescriptor, EXPORTER_CONTAINER};
use crate::relations::{mongodb, pg};

pub const MALFORMED_ENV_MESSAGE: &str =
    "Could not parse Juju config 'environment' as a YAML dict - check \"juju debug-log -l ERROR\"";
pub const STARTUP_FAILED_MESSAGE: &str = "Charm's startup command may be wrong, please check the config";
pub const WAITING_FOR_PEBBLE_MESSAGE: &str = "waiting for pebble to start";

#[derive(Debug, Clone, PartialEq)]
pub struct Charm {
    meta: CharmMeta,
    schema: ConfigSchema,
    required: Vec<String>,
}

impl Charm {
    pub fn new(meta: CharmMeta, schema: ConfigSchema) -> Charm {
        Charm {
            meta,
            schema,
            required: REQUIRED_OPTIONS.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    /// Replaces the options that must be set before the workload is configured
    pub fn with_required_options<S: Into<String>>(mut self, required: impl IntoIterator<Item = S>) -> Self {
        self.required = required.into_iter().map(Into::into).collect();
        self
    }

    /// Creates a `Charm` from the `metadata.yaml` and `config.yaml` that ship with this crate
    pub fn bundled() -> Result<Charm, serde_yaml::Error> {
        Ok(Charm::new(CharmMeta::bundled()?, ConfigSchema::bundled()?))
    }

    pub fn meta(&self) -> &CharmMeta {
        &self.meta
    }

    /// Routes a single event. Events that carry credentials update the persisted relation state first,
    /// and only trigger a reconciliation if that state actually changed.
    pub fn handle<H: Host + ?Sized>(&self, host: &mut H, event: &Event) -> Outcome {
        log::debug!("Handling event: {}", event);
        let app_name = host.app_name().to_owned();
        match event {
            Event::ConfigChanged
            | Event::UpgradeCharm
            | Event::PebbleReady { .. }
            | Event::RelationChanged { .. } => self.reconcile(host),
            Event::PeerRelationChanged => {
                let peer_data = host.peer_app_data().cloned();
                let changed = mongodb::on_peer_relation_changed(host.store(), &app_name, peer_data.as_ref());
                self.reconcile_if(changed, host)
            }
            Event::PgRelationJoined(joined) => {
                match pg::on_relation_joined(joined, &app_name, host.is_leader()) {
                    pg::JoinAction::RequestDatabase(database) => {
                        if let Err(err) = host.request_database(pg::RELATION_NAME, &database) {
                            log::error!("Failed to request database '{}': {:?}", database, err);
                        }
                        Outcome::Ignored
                    }
                    pg::JoinAction::Defer => Outcome::RetryLater(None),
                    pg::JoinAction::Nothing => Outcome::Ignored,
                }
            }
            Event::PgMasterChanged(changed) => {
                let changed = pg::on_master_changed(host.store(), &app_name, changed);
                self.reconcile_if(changed, host)
            }
            Event::PgStandbyChanged(changed) => {
                let changed = pg::on_standby_changed(host.store(), &app_name, changed);
                self.reconcile_if(changed, host)
            }
            Event::MongodbDatabaseCreated(created) => {
                if host.is_leader() {
                    let data = mongodb::peer_data_for(&app_name, created);
                    if let Err(err) = host.set_peer_app_data(data) {
                        log::error!("Failed to publish MongoDB credentials to peer relation: {:?}", err);
                    }
                }
                Outcome::Ignored
            }
            Event::MongodbEndpointsChanged(changed) => {
                if host.is_leader() {
                    let update = mongodb::endpoints_update_for(&app_name, host.peer_app_data(), changed);
                    if let Some(data) = update {
                        if let Err(err) = host.set_peer_app_data(data) {
                            log::error!("Failed to publish MongoDB endpoints to peer relation: {:?}", err);
                        }
                    }
                }
                Outcome::Ignored
            }
        }
    }

    fn reconcile_if<H: Host + ?Sized>(&self, changed: bool, host: &mut H) -> Outcome {
        if changed {
            self.reconcile(host)
        } else {
            log::debug!("Stored relation data unchanged, skipping reconcile");
            Outcome::Ignored
        }
    }

    /// Builds the template context from the persisted relation state and the current relation data
    pub fn context<H: Host + ?Sized>(&self, host: &mut H) -> Context {
        let stored = host.store().snapshot();
        build_context(&stored, host.relations())
    }

    /// Builds the environment for the workload from the current config and relation data
    pub fn env<H: Host + ?Sized>(&self, host: &mut H, config: &CharmConfig) -> Result<Env, EnvError> {
        let ctx = self.context(host);
        build_env(config, &ctx)
    }

    /// Builds every descriptor to apply: the main workload first, followed by any sidecars
    pub fn descriptors(&self, config: &CharmConfig, env: &Env) -> Vec<WorkloadDescriptor> {
        let mut descriptors = vec![build_descriptor(self.meta.container_name(), config, env)];
        if self.meta.sidecar_names().any(|name| name == EXPORTER_CONTAINER) {
            descriptors.push(build_exporter_descriptor());
        }
        descriptors
    }

    /// Brings the workload in line with the current inputs. Safe to call any number of times: with
    /// unchanged inputs it submits identical layers and ends in the same status.
    pub fn reconcile<H: Host + ?Sized>(&self, host: &mut H) -> Outcome {
        let config = match CharmConfig::from_options(&self.schema, host.config()) {
            Ok(config) => config,
            Err(err) => return Outcome::Terminal(Status::blocked(err.to_string())),
        };

        let env = match self.env(host, &config) {
            Ok(env) => env,
            Err(EnvError::Missing(vars)) => {
                let names: Vec<&str> = vars.iter().map(String::as_str).collect();
                let message = format!("Waiting for {} relation(s)", names.join(", "));
                log::info!("{}, will retry", message);
                return Outcome::RetryLater(Some(Status::blocked(message)));
            }
            Err(err) => {
                log::error!("Error getting pod_env_config: {}: {}", MALFORMED_ENV_MESSAGE, err);
                return Outcome::Terminal(Status::blocked(format!(
                    "Error getting pod_env_config: {}",
                    MALFORMED_ENV_MESSAGE
                )));
            }
        };

        if let Err(err) = config.validate_with(&self.required[..]) {
            return Outcome::Terminal(Status::blocked(err.to_string()));
        }

        let descriptors = self.descriptors(&config, &env);

        let port = descriptors[0].port.unwrap_or(config.external_port);
        let ingress_config = IngressConfig::new(host.app_name(), &config, port);
        if let Err(err) = host.ingress().update_config(&ingress_config) {
            log::error!("Failed to update ingress config {:?}: {:?}", ingress_config, err);
        }

        for descriptor in descriptors.iter() {
            let reachable = host
                .container(&descriptor.container)
                .map(|c| c.can_connect())
                .unwrap_or(false);
            if !reachable {
                log::debug!("{} for container '{}'", WAITING_FOR_PEBBLE_MESSAGE, descriptor.container);
                return Outcome::Terminal(Status::maintenance(WAITING_FOR_PEBBLE_MESSAGE));
            }
        }

        for descriptor in descriptors.iter() {
            if let Err(status) = apply_layer(host, descriptor) {
                return Outcome::Terminal(status);
            }
        }
        for descriptor in descriptors.iter() {
            if let Err(status) = replan(host, &descriptor.container) {
                return Outcome::Terminal(status);
            }
        }

        log::info!("Workload configured for '{}'", host.app_name());
        Outcome::Terminal(Status::Active)
    }
}

fn apply_layer<H: Host + ?Sized>(host: &mut H, descriptor: &WorkloadDescriptor) -> Result<(), Status> {
    match descriptor.layer.to_yaml() {
        Ok(yaml) => log::debug!(
            "About to add_layer to container '{}' with layer:\n{}",
            descriptor.container,
            yaml
        ),
        Err(err) => log::debug!("Failed to render layer as YAML for logging: {}", err),
    }
    let container = host
        .container(&descriptor.container)
        .ok_or_else(|| Status::maintenance(WAITING_FOR_PEBBLE_MESSAGE))?;
    container
        .add_layer(&descriptor.container, &descriptor.layer, true)
        .map_err(|err| {
            log::error!("Failed to add layer to container '{}': {:?}", descriptor.container, err);
            Status::maintenance(WAITING_FOR_PEBBLE_MESSAGE)
        })
}

fn replan<H: Host + ?Sized>(host: &mut H, container_name: &str) -> Result<(), Status> {
    let container = host
        .container(container_name)
        .ok_or_else(|| Status::maintenance(WAITING_FOR_PEBBLE_MESSAGE))?;
    match container.replan() {
        Ok(()) => Ok(()),
        Err(ReplanError::Change(message)) => {
            log::error!("Failed to start services in container '{}': {}", container_name, message);
            Err(Status::blocked(STARTUP_FAILED_MESSAGE))
        }
        Err(err @ ReplanError::Connection(_)) => {
            log::error!("Failed to replan container '{}': {}", container_name, err);
            Err(Status::maintenance(WAITING_FOR_PEBBLE_MESSAGE))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ContainerMeta;

    #[test]
    fn bundled_charm_configures_workload_and_exporter() {
        let charm = Charm::bundled().expect("failed to load bundled charm");
        let descriptors = charm.descriptors(&CharmConfig::new("example.com"), &Env::new());
        let containers: Vec<&str> = descriptors.iter().map(|d| d.container.as_str()).collect();
        assert_eq!(vec!["gunicorn", EXPORTER_CONTAINER], containers);
        assert_eq!(Some(80), descriptors[0].port);
    }

    #[test]
    fn exporter_is_skipped_when_container_is_not_declared() {
        let mut meta = CharmMeta::bundled().unwrap();
        meta.containers.remove(EXPORTER_CONTAINER);
        meta.containers.insert("gunicorn".to_owned(), ContainerMeta { resource: None });
        let charm = Charm::new(meta, ConfigSchema::bundled().unwrap());

        let descriptors = charm.descriptors(&CharmConfig::new("example.com"), &Env::new());
        assert_eq!(1, descriptors.len());
    }
}
