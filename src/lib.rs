use serde::Deserialize;

pub mod config;
pub mod errors;
pub mod gateways;
pub mod reconciler;
pub mod reload;
pub mod spec;
pub mod status;
pub mod utils;

pub use config::{PrometheusConfig, PrometheusOptions};
pub use errors::Error;
pub use reconciler::{Event, Outcome, ReconciliationState, Reconciler};
pub use spec::WorkloadSpec;
pub use status::{UnitStatus, WorkloadState};

/// Process-level configuration of the operator binary, loaded from the
/// environment the runtime invokes hooks with.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct OperatorEnvironmentConfig {
    pub app_name: String,
    pub model_name: String,
    pub unit_name: String,
    pub api_server: String,
    pub prometheus_url: String,
    pub server_host: String,
    pub config_path: String,
    pub state_path: String,
    pub spec_path: String,
    pub endpoint_path: String,
    pub image_resource_name: String,
    pub image_resource_path: String,
    pub relation_data_path: String,
    pub service_token_path: String,
}

impl Default for OperatorEnvironmentConfig {
    fn default() -> Self {
        OperatorEnvironmentConfig {
            app_name: "prometheus".to_owned(),
            model_name: "default".to_owned(),
            unit_name: "prometheus/0".to_owned(),
            api_server: "https://kubernetes.default.svc".to_owned(),
            prometheus_url: "http://localhost:9090".to_owned(),
            server_host: "prometheus.default.svc".to_owned(),
            config_path: "/etc/operator/config.json".to_owned(),
            state_path: "/var/lib/operator/state.json".to_owned(),
            spec_path: "/var/lib/operator/podspec.json".to_owned(),
            endpoint_path: "/var/lib/operator/http-endpoint.json".to_owned(),
            image_resource_name: "prometheus-image".to_owned(),
            image_resource_path: "/etc/operator/prometheus-image.yaml".to_owned(),
            relation_data_path: "/etc/operator/relation-data.json".to_owned(),
            service_token_path: "/var/run/secrets/kubernetes.io/serviceaccount/token".to_owned(),
        }
    }
}
