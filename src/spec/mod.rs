use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{
    PrometheusConfig, PrometheusOptions, ADVERTISED_PORT, CONFIG_FILE_NAME, CONFIG_MOUNT_PATH,
};
use crate::errors::Error;
use crate::gateways::ImageMeta;
use crate::utils::get_revision;

const TLS_PROXY_IMAGE: &str = "nginx:1.19-alpine";
const TLS_MOUNT_PATH: &str = "/etc/nginx/ssl";
const TLS_PORT: u16 = 443;

/// Declarative description of the workload submitted to the orchestration
/// runtime. Built fresh on every reconciliation pass and never mutated;
/// a new value replaces the old one entirely.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub containers: Vec<ContainerSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image_details: ImageDetails,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileSet>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetails {
    pub image_path: String,
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
    pub protocol: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub http_get: HttpGet,
    pub initial_delay_seconds: u32,
    pub timeout_seconds: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HttpGet {
    pub path: String,
    pub port: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSet {
    pub name: String,
    pub mount_path: String,
    pub files: BTreeMap<String, String>,
}

impl From<&ImageMeta> for ImageDetails {
    fn from(image: &ImageMeta) -> Self {
        ImageDetails {
            image_path: image.registry_path.clone(),
            username: image.username.clone(),
            password: image.password.clone(),
        }
    }
}

/// Compose the workload spec: the Prometheus container with its rendered
/// configuration mounted at the fixed path, and optionally a TLS-terminating
/// reverse proxy in front of it.
pub fn build_workload_spec(
    app_name: &str,
    image: &ImageMeta,
    config: &PrometheusConfig,
    cli_args: Vec<String>,
    options: &PrometheusOptions,
) -> Result<WorkloadSpec, Error> {
    let mut config_files = BTreeMap::new();
    config_files.insert(CONFIG_FILE_NAME.to_string(), config.render()?);

    let mut files = vec![FileSet {
        name: "config".to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        files: config_files,
    }];

    if options.force_pod_restart {
        // Workaround for runtimes which only re-deploy on a spec diff: a
        // file whose content changes on every pass guarantees the diff.
        let mut restart_files = BTreeMap::new();
        restart_files.insert("restarted-at".to_string(), get_revision());
        files.push(FileSet {
            name: "force-restart".to_string(),
            mount_path: "/tmp/force-restart".to_string(),
            files: restart_files,
        });
    }

    let mut containers = vec![ContainerSpec {
        name: app_name.to_string(),
        image_details: ImageDetails::from(image),
        args: cli_args,
        ports: vec![ContainerPort {
            container_port: ADVERTISED_PORT,
            protocol: "TCP".to_string(),
        }],
        readiness_probe: Some(Probe {
            http_get: HttpGet {
                path: "/-/ready".to_string(),
                port: ADVERTISED_PORT,
            },
            initial_delay_seconds: 10,
            timeout_seconds: 30,
        }),
        liveness_probe: Some(Probe {
            http_get: HttpGet {
                path: "/-/healthy".to_string(),
                port: ADVERTISED_PORT,
            },
            initial_delay_seconds: 30,
            timeout_seconds: 30,
        }),
        files,
    }];

    if let Some(tls_proxy) = build_tls_proxy(app_name, options)? {
        containers.push(tls_proxy);
    }

    Ok(WorkloadSpec { containers })
}

/// The TLS material must be supplied as a pair: a certificate without a key
/// (or the reverse) is a configuration mistake, while supplying neither
/// simply means no proxy container.
fn build_tls_proxy(
    app_name: &str,
    options: &PrometheusOptions,
) -> Result<Option<ContainerSpec>, Error> {
    let (cert, key) = match (&options.ssl_cert, &options.ssl_key) {
        (Some(cert), Some(key)) => (cert, key),
        (None, None) => return Ok(None),
        _ => return Err(Error::IncompleteTlsMaterial),
    };

    let mut tls_files = BTreeMap::new();
    tls_files.insert("tls.crt".to_string(), cert.clone());
    tls_files.insert("tls.key".to_string(), key.clone());

    Ok(Some(ContainerSpec {
        name: format!("{}-tls", app_name),
        image_details: ImageDetails {
            image_path: TLS_PROXY_IMAGE.to_string(),
            username: String::new(),
            password: String::new(),
        },
        args: Vec::new(),
        ports: vec![ContainerPort {
            container_port: TLS_PORT,
            protocol: "TCP".to_string(),
        }],
        readiness_probe: None,
        liveness_probe: None,
        files: vec![FileSet {
            name: "tls".to_string(),
            mount_path: TLS_MOUNT_PATH.to_string(),
            files: tls_files,
        }],
    }))
}
