use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use log::info;
use serde_json::json;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::Error;
use crate::spec::WorkloadSpec;
use crate::status::UnitStatus;

const UNIT_ANNOTATION: &str = "juju.io/unit";

/// Resolved container image reference. Produced once per reconciliation
/// pass and treated as immutable input from there on.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ImageMeta {
    #[serde(rename = "registrypath")]
    pub registry_path: String,
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn resolve(&self) -> Result<ImageMeta, Error>;
}

#[async_trait]
pub trait StatusApi: Send + Sync {
    /// Fetch this unit's pod record, or `None` when no pod exists yet.
    async fn get_pod(&self) -> Result<Option<Pod>, Error>;
}

/// The live workload's own HTTP API: reload signal plus effective-config
/// readback.
#[async_trait]
pub trait PrometheusApi: Send + Sync {
    async fn trigger_reload(&self) -> Result<(), Error>;
    async fn current_config(&self) -> Result<String, Error>;
}

/// The orchestration runtime's sinks: spec submission, unit status, and
/// the http relation over which the server advertises its endpoint.
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn submit_spec(&self, spec: &WorkloadSpec) -> Result<(), Error>;
    fn set_unit_status(&self, status: &UnitStatus);
    async fn publish_http_endpoint(&self, host: &str, port: u16) -> Result<(), Error>;
}

/// Reads the image metadata YAML the runtime places on disk for us.
pub struct FileImageRegistry {
    pub resource_name: String,
    pub path: PathBuf,
}

#[async_trait]
impl ImageRegistry for FileImageRegistry {
    async fn resolve(&self) -> Result<ImageMeta, Error> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|_| Error::MissingResource(self.resource_name.clone()))?;
        if raw.trim().is_empty() {
            return Err(Error::MissingResource(self.resource_name.clone()));
        }
        serde_yaml::from_str(&raw).map_err(|_| Error::InvalidResource(self.resource_name.clone()))
    }
}

/// Pod-status lookup against the cluster API server, selecting the pod
/// annotated with this unit's name.
pub struct KubeStatusApi {
    pub api_server: String,
    pub namespace: String,
    pub app_name: String,
    pub unit_name: String,
    pub token: Option<String>,
    pub client: reqwest::Client,
}

#[async_trait]
impl StatusApi for KubeStatusApi {
    async fn get_pod(&self) -> Result<Option<Pod>, Error> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods?labelSelector=juju-app={}",
            self.api_server, self.namespace, self.app_name
        );
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let pod_list: Value = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        select_unit_pod(&pod_list, &self.unit_name)
    }
}

/// Pick this unit's pod record out of a status API response. A response
/// that is not a `PodList` violates the API contract and is surfaced as
/// an error, never mistaken for "no pod yet".
fn select_unit_pod(pod_list: &Value, unit_name: &str) -> Result<Option<Pod>, Error> {
    let kind = pod_list.get("kind").and_then(Value::as_str);
    if kind != Some("PodList") {
        return Err(Error::UnexpectedPodStatus(format!(
            "expected a PodList, got kind: {:?}",
            kind
        )));
    }

    let record = pod_list
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| {
            items
                .iter()
                .find(|item| {
                    item["metadata"]["annotations"][UNIT_ANNOTATION].as_str() == Some(unit_name)
                })
                .cloned()
        });

    match record {
        None => Ok(None),
        Some(record) => serde_json::from_value(record)
            .map(Some)
            .map_err(|err| Error::UnexpectedPodStatus(err.to_string())),
    }
}

/// Bearer-token authenticated client for the Prometheus HTTP API.
pub struct PrometheusHttpApi {
    pub base_url: String,
    pub token: Option<String>,
    pub client: reqwest::Client,
}

impl PrometheusHttpApi {
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl PrometheusApi for PrometheusHttpApi {
    async fn trigger_reload(&self) -> Result<(), Error> {
        let url = format!("{}/-/reload", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .send()
            .await
            .map_err(|err| Error::PrometheusApi(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::PrometheusApi(format!(
                "reload returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn current_config(&self) -> Result<String, Error> {
        let url = format!("{}/api/v1/status/config", self.base_url);
        let body: Value = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|err| Error::PrometheusApi(err.to_string()))?
            .error_for_status()
            .map_err(|err| Error::PrometheusApi(err.to_string()))?
            .json()
            .await
            .map_err(|err| Error::PrometheusApi(err.to_string()))?;

        body["data"]["yaml"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::PrometheusApi("config endpoint returned no yaml field".to_string()))
    }
}

/// Runtime adapter used by the hook binary: the spec and the advertised
/// endpoint land as JSON at the paths the runtime collects them from,
/// statuses go to the log.
pub struct HookRuntime {
    pub spec_path: PathBuf,
    pub endpoint_path: PathBuf,
}

#[async_trait]
impl Runtime for HookRuntime {
    async fn submit_spec(&self, spec: &WorkloadSpec) -> Result<(), Error> {
        let serialized = serde_json::to_string_pretty(spec)
            .map_err(|err| Error::SpecSubmission(err.to_string()))?;
        std::fs::write(&self.spec_path, serialized)
            .map_err(|err| Error::SpecSubmission(err.to_string()))?;
        info!("Submitted workload spec to {}", self.spec_path.display());
        Ok(())
    }

    fn set_unit_status(&self, status: &UnitStatus) {
        info!("Unit status: {}", status);
    }

    async fn publish_http_endpoint(&self, host: &str, port: u16) -> Result<(), Error> {
        let payload = json!({ "host": host, "port": port.to_string() });
        std::fs::write(&self.endpoint_path, payload.to_string())
            .map_err(|err| Error::SpecSubmission(err.to_string()))?;
        info!("Published http endpoint {}:{}", host, port);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_list(kind: &str, unit_name: &str) -> Value {
        json!({
            "kind": kind,
            "items": [{
                "metadata": {
                    "annotations": { UNIT_ANNOTATION: unit_name }
                },
                "status": {
                    "phase": "Running",
                    "conditions": [{"type": "ContainersReady", "status": "True"}]
                }
            }]
        })
    }

    #[test]
    fn test_select_unit_pod_finds_annotated_record() {
        let pod = select_unit_pod(&pod_list("PodList", "prometheus/0"), "prometheus/0")
            .unwrap()
            .unwrap();
        assert_eq!(pod.status.unwrap().phase.unwrap(), "Running");
    }

    #[test]
    fn test_select_unit_pod_ignores_other_units() {
        let result = select_unit_pod(&pod_list("PodList", "prometheus/1"), "prometheus/0");
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_select_unit_pod_rejects_non_pod_list_response() {
        let err = select_unit_pod(&pod_list("SomethingElse", "prometheus/0"), "prometheus/0")
            .unwrap_err();
        match err {
            Error::UnexpectedPodStatus(message) => assert!(message.contains("SomethingElse")),
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_select_unit_pod_rejects_malformed_record() {
        let malformed = json!({
            "kind": "PodList",
            "items": [{
                "metadata": {
                    "annotations": { UNIT_ANNOTATION: "prometheus/0" }
                },
                "status": "not-an-object"
            }]
        });
        assert!(matches!(
            select_unit_pod(&malformed, "prometheus/0"),
            Err(Error::UnexpectedPodStatus(_))
        ));
    }
}
