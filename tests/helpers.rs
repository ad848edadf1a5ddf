#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};

use prometheus_operator::errors::Error;
use prometheus_operator::gateways::{
    ImageMeta, ImageRegistry, PrometheusApi, Runtime, StatusApi,
};
use prometheus_operator::reload::RetryPolicy;
use prometheus_operator::{PrometheusOptions, Reconciler, UnitStatus, WorkloadSpec};

pub fn image_meta() -> ImageMeta {
    ImageMeta {
        registry_path: "registry.example.com/prometheus:v2.18.1".to_string(),
        username: "user".to_string(),
        password: "secret".to_string(),
    }
}

pub fn pod(phase: &str, ready: &str) -> Pod {
    Pod {
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            conditions: Some(vec![PodCondition {
                type_: "ContainersReady".to_string(),
                status: ready.to_string(),
                ..PodCondition::default()
            }]),
            ..PodStatus::default()
        }),
        ..Pod::default()
    }
}

pub fn ready_pod() -> Option<Pod> {
    Some(pod("Running", "True"))
}

pub fn pending_pod() -> Option<Pod> {
    Some(pod("Pending", "False"))
}

// Image registry which either resolves to fixed metadata or fails the way
// a missing runtime resource does.
pub struct FakeImageRegistry {
    pub meta: Option<ImageMeta>,
}

impl FakeImageRegistry {
    pub fn available() -> Self {
        FakeImageRegistry {
            meta: Some(image_meta()),
        }
    }

    pub fn missing() -> Self {
        FakeImageRegistry { meta: None }
    }
}

#[async_trait]
impl ImageRegistry for FakeImageRegistry {
    async fn resolve(&self) -> Result<ImageMeta, Error> {
        self.meta
            .clone()
            .ok_or_else(|| Error::MissingResource("prometheus-image".to_string()))
    }
}

// Status API fed with a scripted sequence of pod records; the last entry
// repeats once the script runs out. Optionally fails a number of calls
// first, the way a briefly unreachable API server does.
pub struct FakeStatusApi {
    responses: Mutex<VecDeque<Option<Pod>>>,
    failures_before_response: Mutex<u32>,
}

impl FakeStatusApi {
    pub fn scripted(responses: Vec<Option<Pod>>) -> Self {
        FakeStatusApi {
            responses: Mutex::new(responses.into()),
            failures_before_response: Mutex::new(0),
        }
    }

    pub fn always(response: Option<Pod>) -> Self {
        Self::scripted(vec![response])
    }

    pub fn flaky(failures: u32, responses: Vec<Option<Pod>>) -> Self {
        FakeStatusApi {
            responses: Mutex::new(responses.into()),
            failures_before_response: Mutex::new(failures),
        }
    }
}

#[async_trait]
impl StatusApi for FakeStatusApi {
    async fn get_pod(&self) -> Result<Option<Pod>, Error> {
        let mut failures = self.failures_before_response.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(Error::PrometheusApi("status API unreachable".to_string()));
        }

        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            Ok(responses.pop_front().unwrap())
        } else {
            Ok(responses.front().cloned().unwrap_or(None))
        }
    }
}

// Prometheus API which counts reload signals and echoes scripted config
// documents; the last document repeats once the script runs out.
pub struct FakePrometheusApi {
    pub reload_succeeds: bool,
    pub reload_calls: Mutex<u32>,
    config_bodies: Mutex<VecDeque<String>>,
}

impl FakePrometheusApi {
    pub fn echoing(bodies: Vec<String>) -> Self {
        FakePrometheusApi {
            reload_succeeds: true,
            reload_calls: Mutex::new(0),
            config_bodies: Mutex::new(bodies.into()),
        }
    }

    pub fn unreachable() -> Self {
        FakePrometheusApi {
            reload_succeeds: false,
            reload_calls: Mutex::new(0),
            config_bodies: Mutex::new(VecDeque::new()),
        }
    }

    pub fn reload_call_count(&self) -> u32 {
        *self.reload_calls.lock().unwrap()
    }
}

#[async_trait]
impl PrometheusApi for FakePrometheusApi {
    async fn trigger_reload(&self) -> Result<(), Error> {
        *self.reload_calls.lock().unwrap() += 1;
        if self.reload_succeeds {
            Ok(())
        } else {
            Err(Error::PrometheusApi("reload returned 500".to_string()))
        }
    }

    async fn current_config(&self) -> Result<String, Error> {
        let mut bodies = self.config_bodies.lock().unwrap();
        let body = if bodies.len() > 1 {
            bodies.pop_front()
        } else {
            bodies.front().cloned()
        };
        body.ok_or_else(|| Error::PrometheusApi("config endpoint unreachable".to_string()))
    }
}

// Orchestration runtime double recording every submitted spec, every
// reported unit status and every published endpoint.
pub struct RecordingRuntime {
    pub specs: Mutex<Vec<WorkloadSpec>>,
    pub statuses: Mutex<Vec<UnitStatus>>,
    pub endpoints: Mutex<Vec<(String, u16)>>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        RecordingRuntime {
            specs: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            endpoints: Mutex::new(Vec::new()),
        }
    }

    pub fn spec_count(&self) -> usize {
        self.specs.lock().unwrap().len()
    }

    pub fn last_status(&self) -> Option<UnitStatus> {
        self.statuses.lock().unwrap().last().cloned()
    }

    pub fn status_log(&self) -> Vec<UnitStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn published_endpoints(&self) -> Vec<(String, u16)> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runtime for RecordingRuntime {
    async fn submit_spec(&self, spec: &WorkloadSpec) -> Result<(), Error> {
        self.specs.lock().unwrap().push(spec.clone());
        Ok(())
    }

    fn set_unit_status(&self, status: &UnitStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    async fn publish_http_endpoint(&self, host: &str, port: u16) -> Result<(), Error> {
        self.endpoints.lock().unwrap().push((host.to_string(), port));
        Ok(())
    }
}

// A reconciler wired to fakes, polling without delays so tests run fast.
pub fn reconciler<'a>(
    options: PrometheusOptions,
    images: &'a FakeImageRegistry,
    status_api: &'a FakeStatusApi,
    prometheus_api: &'a FakePrometheusApi,
    runtime: &'a RecordingRuntime,
) -> Reconciler<'a> {
    Reconciler {
        app_name: "prometheus".to_string(),
        server_host: "prometheus.default.svc".to_string(),
        options,
        images,
        status_api,
        prometheus_api,
        runtime,
        status_retry: RetryPolicy::new(5, Duration::from_millis(0)),
        reload_retry: RetryPolicy::new(5, Duration::from_millis(0)),
    }
}
