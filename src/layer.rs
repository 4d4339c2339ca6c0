//! Workload descriptors: the layers submitted to the container supervisor. These are rebuilt from scratch
//! on every reconciliation, and all maps are ordered so that identical inputs serialize identically.
use crate::config::CharmConfig;
use crate::env::Env;

use std::collections::BTreeMap;

pub const GUNICORN_SERVICE: &str = "gunicorn";
pub const GUNICORN_READY_CHECK: &str = "gunicorn-ready";

pub const EXPORTER_CONTAINER: &str = "statsd-prometheus-exporter";
pub const EXPORTER_SERVICE: &str = "statsd-prometheus-exporter";
pub const EXPORTER_READY_CHECK: &str = "statsd-exporter-ready";
pub const EXPORTER_COMMAND: &str = "/bin/statsd_exporter --statsd.mapping-config=/statsd.conf \
                                    --statsd.read-buffer=8388608 --statsd.listen-udp=:9125 \
                                    --web.listen-address=:9102";
pub const EXPORTER_METRICS_URL: &str = "http://localhost:9102/metrics";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Override {
    Merge,
    Replace,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    Enabled,
    Disabled,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Alive,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "override")]
    pub override_: Override,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<Startup>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

impl Service {
    /// Applies `other` on top of this service. A `replace` override discards everything that was here,
    /// while `merge` only overwrites the fields that `other` actually sets.
    fn combine(&mut self, other: &Service) {
        match other.override_ {
            Override::Replace => *self = other.clone(),
            Override::Merge => {
                if other.summary.is_some() {
                    self.summary = other.summary.clone();
                }
                if other.command.is_some() {
                    self.command = other.command.clone();
                }
                if other.startup.is_some() {
                    self.startup = other.startup;
                }
                for (k, v) in other.environment.iter() {
                    self.environment.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCheck {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    #[serde(rename = "override")]
    pub override_: Override,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<CheckLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpCheck>,
}

impl Check {
    pub fn http_ready(url: impl Into<String>) -> Check {
        Check {
            override_: Override::Replace,
            level: Some(CheckLevel::Ready),
            http: Some(HttpCheck { url: url.into() }),
        }
    }

    fn combine(&mut self, other: &Check) {
        match other.override_ {
            Override::Replace => *self = other.clone(),
            Override::Merge => {
                if other.level.is_some() {
                    self.level = other.level;
                }
                if other.http.is_some() {
                    self.http = other.http.clone();
                }
            }
        }
    }
}

/// A layer of service and check definitions, in the format the supervisor accepts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, Check>,
}

impl Layer {
    /// Combines `other` into this layer, the way the supervisor does when a layer is added with
    /// `combine` set. Services and checks that `other` doesn't mention are left untouched.
    pub fn combine(&mut self, other: &Layer) {
        if !other.summary.is_empty() {
            self.summary = other.summary.clone();
        }
        if !other.description.is_empty() {
            self.description = other.description.clone();
        }
        for (name, service) in other.services.iter() {
            match self.services.get_mut(name) {
                Some(existing) => existing.combine(service),
                None => {
                    self.services.insert(name.clone(), service.clone());
                }
            }
        }
        for (name, check) in other.checks.iter() {
            match self.checks.get_mut(name) {
                Some(existing) => existing.combine(check),
                None => {
                    self.checks.insert(name.clone(), check.clone());
                }
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Everything needed to configure one container: the layer to submit and the port it serves on, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub container: String,
    pub layer: Layer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl WorkloadDescriptor {
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Builds the descriptor for the main gunicorn container
pub fn build_descriptor(container: &str, config: &CharmConfig, env: &Env) -> WorkloadDescriptor {
    let service = Service {
        override_: Override::Replace,
        summary: Some("gunicorn service".to_owned()),
        command: Some(config.command().to_owned()),
        startup: Some(Startup::Enabled),
        environment: env.clone(),
    };
    let mut layer = Layer {
        summary: "gunicorn layer".to_owned(),
        description: "gunicorn layer".to_owned(),
        ..Default::default()
    };
    layer.services.insert(GUNICORN_SERVICE.to_owned(), service);
    layer.checks.insert(
        GUNICORN_READY_CHECK.to_owned(),
        Check::http_ready(format!("http://127.0.0.1:{}", config.external_port)),
    );

    WorkloadDescriptor {
        container: container.to_owned(),
        layer,
        port: Some(config.external_port),
    }
}

/// Builds the descriptor for the metrics exporter sidecar, which never depends on config or relation data
pub fn build_exporter_descriptor() -> WorkloadDescriptor {
    let service = Service {
        override_: Override::Replace,
        summary: Some("statsd exporter service".to_owned()),
        command: Some(EXPORTER_COMMAND.to_owned()),
        startup: Some(Startup::Enabled),
        environment: BTreeMap::new(),
    };
    let mut layer = Layer {
        summary: "statsd exporter layer".to_owned(),
        description: "statsd exporter layer".to_owned(),
        ..Default::default()
    };
    layer.services.insert(EXPORTER_SERVICE.to_owned(), service);
    layer
        .checks
        .insert(EXPORTER_READY_CHECK.to_owned(), Check::http_ready(EXPORTER_METRICS_URL));

    WorkloadDescriptor {
        container: EXPORTER_CONTAINER.to_owned(),
        layer,
        port: None,
    }
}
