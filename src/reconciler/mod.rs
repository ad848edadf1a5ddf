use std::path::Path;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{
    build_cli_args, build_prometheus_config, PrometheusConfig, PrometheusOptions, ADVERTISED_PORT,
};
use crate::errors::Error;
use crate::gateways::{ImageRegistry, PrometheusApi, Runtime, StatusApi};
use crate::reload::{reload_configuration, RetryPolicy};
use crate::spec::build_workload_spec;
use crate::status::{classify, UnitStatus, WorkloadState};

/// Lifecycle events delivered by the orchestration runtime, at most one in
/// flight at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    ConfigChanged,
    Upgrade,
    Stop,
    AlertingChanged(Value),
    HttpClientJoined,
}

/// How an event pass ended. `Deferred` relies on the runtime contract that
/// deferred events are redelivered later.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Blocked(UnitStatus),
    Deferred,
}

/// The only state that outlives a single event: persisted by the runtime
/// between deliveries, loaded before and stored after each pass.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReconciliationState {
    pub spec_applied: bool,
    pub recently_started: bool,
    pub config_propagated: bool,
    pub alerting_config: Value,
}

impl Default for ReconciliationState {
    fn default() -> Self {
        ReconciliationState {
            spec_applied: false,
            recently_started: false,
            config_propagated: false,
            alerting_config: Value::Null,
        }
    }
}

impl ReconciliationState {
    /// Load persisted state, falling back to defaults on first run.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!("Could not parse persisted state, starting fresh: {}", err);
                ReconciliationState::default()
            }),
            Err(_) => ReconciliationState::default(),
        }
    }

    pub fn store(&self, path: &Path) -> std::io::Result<()> {
        let serialized = serde_json::to_string(self)
            .expect("ReconciliationState was not serializable, should never happen");
        std::fs::write(path, serialized)
    }
}

/// Event-driven orchestrator: decides whether to rebuild and resubmit the
/// workload spec, whether to wait for readiness, and whether to drive the
/// configuration reload handshake.
pub struct Reconciler<'a> {
    pub app_name: String,
    pub server_host: String,
    pub options: PrometheusOptions,
    pub images: &'a dyn ImageRegistry,
    pub status_api: &'a dyn StatusApi,
    pub prometheus_api: &'a dyn PrometheusApi,
    pub runtime: &'a dyn Runtime,
    pub status_retry: RetryPolicy,
    pub reload_retry: RetryPolicy,
}

impl<'a> Reconciler<'a> {
    /// Handle one delivered event. Validation and resource failures are
    /// converted to a `Blocked` outcome here; an `Err` escapes only for
    /// defensive programming errors that must not be masked.
    pub async fn handle(
        &self,
        event: Event,
        state: &mut ReconciliationState,
    ) -> Result<Outcome, Error> {
        debug!("Handling event: {:?}, state: {:?}", event, state);
        match event {
            Event::Start => self.on_start(state).await,
            Event::Upgrade => {
                // An upgrade always re-applies the spec.
                state.spec_applied = false;
                self.on_start(state).await
            }
            Event::ConfigChanged => self.on_config_changed(state).await,
            Event::AlertingChanged(data) => self.on_alerting_changed(data, state).await,
            Event::HttpClientJoined => self.on_http_client_joined().await,
            Event::Stop => {
                self.runtime.set_unit_status(&UnitStatus::Terminating);
                Ok(Outcome::Completed)
            }
        }
    }

    /// Idempotent: once a spec has been applied, a repeated start is a
    /// no-op reporting the unit as active.
    async fn on_start(&self, state: &mut ReconciliationState) -> Result<Outcome, Error> {
        if state.spec_applied {
            info!("Workload spec already applied, nothing to do");
            self.runtime.set_unit_status(&UnitStatus::Active);
            return Ok(Outcome::Completed);
        }

        match self.apply_spec(&state.alerting_config).await {
            Ok(_) => {
                state.spec_applied = true;
                state.recently_started = true;
                self.runtime
                    .set_unit_status(&UnitStatus::maintenance("Configuring pod"));
                Ok(Outcome::Completed)
            }
            Err(err) => Ok(self.blocked(err)),
        }
    }

    /// The configuration may have changed, so the spec is always rebuilt
    /// and resubmitted. Afterwards the pod is polled until ready (bounded,
    /// deferring on exhaustion) and the config-reload handshake is driven
    /// unless the mounted file already carries the new content.
    async fn on_config_changed(&self, state: &mut ReconciliationState) -> Result<Outcome, Error> {
        let expected = match self.apply_spec(&state.alerting_config).await {
            Ok(config) => config,
            Err(err) => return Ok(self.blocked(err)),
        };

        if !self.wait_until_ready().await? {
            info!(
                "Pod not ready within {} polls, deferring",
                self.status_retry.attempts
            );
            return Ok(Outcome::Deferred);
        }

        if state.recently_started {
            // The pod came up with the freshly mounted file, no reload
            // handshake needed.
            state.recently_started = false;
            state.config_propagated = true;
            self.runtime.set_unit_status(&UnitStatus::Active);
            return Ok(Outcome::Completed);
        }

        if state.config_propagated {
            // Optimistically assume the running configuration is now stale
            // and let the redelivered event drive the reload.
            state.config_propagated = false;
            self.runtime
                .set_unit_status(&UnitStatus::maintenance("Waiting for config to propagate"));
            return Ok(Outcome::Deferred);
        }

        if reload_configuration(self.prometheus_api, &expected, &self.reload_retry).await {
            state.config_propagated = true;
            self.runtime.set_unit_status(&UnitStatus::Active);
            Ok(Outcome::Completed)
        } else {
            warn!("Configuration reload not confirmed, will try again on redelivery");
            self.runtime
                .set_unit_status(&UnitStatus::maintenance("Waiting for config to propagate"));
            Ok(Outcome::Deferred)
        }
    }

    /// A peer sent a new alerting overlay: remember it and resubmit the
    /// spec with the overlay merged into the configuration.
    async fn on_alerting_changed(
        &self,
        data: Value,
        state: &mut ReconciliationState,
    ) -> Result<Outcome, Error> {
        info!("Received alerting configuration from peer relation");
        state.alerting_config = data;

        match self.apply_spec(&state.alerting_config).await {
            Ok(_) => {
                self.runtime
                    .set_unit_status(&UnitStatus::maintenance("Configuring pod"));
                Ok(Outcome::Completed)
            }
            Err(err) => Ok(self.blocked(err)),
        }
    }

    /// A client joined the http relation: advertise where the Prometheus
    /// server can be reached. Publish failures are non-fatal, the relation
    /// fires again on the next membership change.
    async fn on_http_client_joined(&self) -> Result<Outcome, Error> {
        info!(
            "Advertising http endpoint {}:{} to related units",
            self.server_host, ADVERTISED_PORT
        );
        if let Err(err) = self
            .runtime
            .publish_http_endpoint(&self.server_host, ADVERTISED_PORT)
            .await
        {
            warn!("Could not publish http endpoint: {}", err);
        }
        Ok(Outcome::Completed)
    }

    /// Build a candidate config and spec from current inputs and submit it.
    /// Returns the config so the caller can verify propagation against it.
    async fn apply_spec(&self, alerting: &Value) -> Result<PrometheusConfig, Error> {
        let image = self.images.resolve().await?;
        let config = build_prometheus_config(&self.options, alerting)?;
        let cli_args = build_cli_args(&self.options);
        let spec = build_workload_spec(&self.app_name, &image, &config, cli_args, &self.options)?;
        self.runtime.submit_spec(&spec).await?;
        Ok(config)
    }

    /// Poll the status API until the workload is ready, reporting the
    /// mapped unit status on every iteration. Returns false when the retry
    /// bound runs out first.
    async fn wait_until_ready(&self) -> Result<bool, Error> {
        for attempt in 1..=self.status_retry.attempts {
            let workload_state = match self.status_api.get_pod().await {
                Ok(pod) => classify(pod.as_ref())?,
                Err(err) if err.is_recoverable() => {
                    warn!("Could not fetch pod status (attempt {}): {}", attempt, err);
                    WorkloadState::Unknown
                }
                Err(err) => return Err(err),
            };

            self.runtime.set_unit_status(&workload_state.to_unit_status());

            if workload_state == WorkloadState::Ready {
                return Ok(true);
            }
            if attempt < self.status_retry.attempts {
                self.status_retry.wait().await;
            }
        }
        Ok(false)
    }

    fn blocked(&self, err: Error) -> Outcome {
        error!("Reconciliation pass failed: {}", err);
        let status = err.to_unit_status();
        self.runtime.set_unit_status(&status);
        Outcome::Blocked(status)
    }
}
