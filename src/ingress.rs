use crate::config::CharmConfig;

use serde_json::{json, Value};

pub const SSL_REDIRECT_ANNOTATION: &str = "nginx.ingress.kubernetes.io/ssl-redirect";

/// What the ingress controller needs to route external traffic to the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IngressConfig {
    pub service_hostname: String,
    pub service_name: String,
    pub service_port: u16,
}

impl IngressConfig {
    pub fn new(app_name: &str, config: &CharmConfig, port: u16) -> IngressConfig {
        IngressConfig {
            service_hostname: config.external_hostname.clone(),
            service_name: app_name.to_owned(),
            service_port: port,
        }
    }
}

/// The ingress relation, as seen from this side. Implementations publish the config to the remote
/// ingress controller, and should treat publishing an unchanged config as a no-op.
pub trait Ingress {
    fn update_config(&mut self, config: &IngressConfig) -> Result<(), anyhow::Error>;
}

/// Builds a Kubernetes `Ingress` resource that routes `/` on the external hostname to the application's
/// service, for hosts that take raw resources rather than an ingress relation.
pub fn k8s_ingress(config: &IngressConfig) -> Value {
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": format!("{}-ingress", config.service_name),
            "annotations": {
                SSL_REDIRECT_ANNOTATION: "false",
            },
        },
        "spec": {
            "rules": [
                {
                    "host": config.service_hostname,
                    "http": {
                        "paths": [
                            {
                                "path": "/",
                                "pathType": "Prefix",
                                "backend": {
                                    "service": {
                                        "name": config.service_name,
                                        "port": {
                                            "number": config.service_port,
                                        },
                                    },
                                },
                            },
                        ],
                    },
                },
            ],
        },
    })
}
