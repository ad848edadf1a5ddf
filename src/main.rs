use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_json::Value;

use prometheus_operator::gateways::{
    FileImageRegistry, HookRuntime, KubeStatusApi, PrometheusHttpApi, Runtime,
};
use prometheus_operator::reload::RetryPolicy;
use prometheus_operator::{
    errors, Event, OperatorEnvironmentConfig, Outcome, PrometheusOptions, ReconciliationState,
    Reconciler,
};

#[tokio::main]
async fn main() -> Result<(), errors::Error> {
    env_logger::init();

    let env_config: OperatorEnvironmentConfig = match envy::from_env() {
        Ok(config) => config,
        Err(error) => panic!("Failed to load environment config: {:#?}", error),
    };
    debug!("Environment config: {:?}", &env_config);

    let hook = std::env::args().nth(1).unwrap_or_else(|| "start".to_owned());
    info!("Dispatching hook: {}", hook);

    let runtime = HookRuntime {
        spec_path: PathBuf::from(&env_config.spec_path),
        endpoint_path: PathBuf::from(&env_config.endpoint_path),
    };

    let event = match parse_event(&hook, &env_config) {
        Some(event) => event,
        None => {
            warn!("Unknown hook '{}', nothing to do", hook);
            return Ok(());
        }
    };

    // Options are validated once here at the boundary; a malformed bag
    // blocks the unit instead of crashing the hook.
    let options = match load_options(&env_config.config_path) {
        Ok(options) => options,
        Err(err) => {
            runtime.set_unit_status(&err.to_unit_status());
            return Ok(());
        }
    };

    let images = FileImageRegistry {
        resource_name: env_config.image_resource_name.clone(),
        path: PathBuf::from(&env_config.image_resource_path),
    };
    let status_api = KubeStatusApi {
        api_server: env_config.api_server.clone(),
        namespace: env_config.model_name.clone(),
        app_name: env_config.app_name.clone(),
        unit_name: env_config.unit_name.clone(),
        token: std::fs::read_to_string(&env_config.service_token_path).ok(),
        client: reqwest::Client::new(),
    };
    let prometheus_api = PrometheusHttpApi {
        base_url: env_config.prometheus_url.clone(),
        token: std::fs::read_to_string(&env_config.service_token_path).ok(),
        client: reqwest::Client::new(),
    };

    let reconciler = Reconciler {
        app_name: env_config.app_name.clone(),
        server_host: env_config.server_host.clone(),
        options,
        images: &images,
        status_api: &status_api,
        prometheus_api: &prometheus_api,
        runtime: &runtime,
        status_retry: RetryPolicy::default(),
        reload_retry: RetryPolicy::default(),
    };

    let state_path = Path::new(&env_config.state_path);
    let mut state = ReconciliationState::load(state_path);

    let outcome = reconciler.handle(event, &mut state).await?;

    // State must be durable before the runtime delivers the next event.
    if let Err(err) = state.store(state_path) {
        panic!("Failed to persist reconciliation state: {}", err);
    }

    match outcome {
        Outcome::Completed => info!("Hook '{}' completed", hook),
        Outcome::Blocked(status) => warn!("Hook '{}' blocked: {}", hook, status),
        Outcome::Deferred => info!("Hook '{}' deferred, expecting redelivery", hook),
    }
    Ok(())
}

fn parse_event(hook: &str, env_config: &OperatorEnvironmentConfig) -> Option<Event> {
    match hook {
        "start" => Some(Event::Start),
        "config-changed" => Some(Event::ConfigChanged),
        "upgrade-charm" | "upgrade" => Some(Event::Upgrade),
        "stop" => Some(Event::Stop),
        "http-relation-joined" => Some(Event::HttpClientJoined),
        "alerting-relation-changed" | "alerting-relation-joined" => {
            let data = std::fs::read_to_string(&env_config.relation_data_path)
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or(Value::Null);
            Some(Event::AlertingChanged(data))
        }
        _ => None,
    }
}

fn load_options(path: &str) -> Result<PrometheusOptions, errors::Error> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let value: Value = serde_json::from_str(&raw).map_err(errors::Error::InvalidOptions)?;
            PrometheusOptions::from_value(value)
        }
        Err(_) => {
            debug!("No config bag at {}, using defaults", path);
            Ok(PrometheusOptions::default())
        }
    }
}
