use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::Error;

/// There is never a need to customize the advertised port of a containerized
/// Prometheus instance, so it is statically pinned to its typical 9090.
pub const ADVERTISED_PORT: u16 = 9090;

pub const CONFIG_MOUNT_PATH: &str = "/etc/prometheus";
pub const CONFIG_FILE_NAME: &str = "prometheus.yml";

const SELF_SCRAPE_INTERVAL: &str = "5s";
const ALLOWED_LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error", "fatal"];

/// Scrape-job bundle appended when the `monitor-k8s` option is set.
const CLUSTER_SCRAPE_TEMPLATE: &str = include_str!("../../templates/prometheus-k8s.yml");

/// Typed schema for the raw option bag handed over by the orchestration
/// runtime. Validated once here at the boundary; downstream code never
/// re-validates.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", default)]
pub struct PrometheusOptions {
    pub external_labels: String,
    pub scrape_interval: String,
    pub scrape_timeout: String,
    pub evaluation_interval: String,
    pub log_level: Option<String>,
    pub web_enable_admin_api: bool,
    pub web_page_title: Option<String>,
    pub tsdb_wal_compression: bool,
    pub web_max_connections: Option<u32>,
    pub tsdb_retention_time: Option<String>,
    pub alertmanager_notification_queue_capacity: Option<u32>,
    pub alertmanager_timeout: Option<String>,
    pub monitor_k8s: bool,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
    pub force_pod_restart: bool,
}

impl Default for PrometheusOptions {
    fn default() -> Self {
        PrometheusOptions {
            external_labels: String::new(),
            scrape_interval: "15s".to_owned(),
            scrape_timeout: "10s".to_owned(),
            evaluation_interval: "1m".to_owned(),
            log_level: None,
            web_enable_admin_api: false,
            web_page_title: None,
            tsdb_wal_compression: false,
            web_max_connections: None,
            tsdb_retention_time: None,
            alertmanager_notification_queue_capacity: None,
            alertmanager_timeout: None,
            monitor_k8s: false,
            ssl_cert: None,
            ssl_key: None,
            force_pod_restart: false,
        }
    }
}

impl PrometheusOptions {
    pub fn from_value(raw: Value) -> Result<Self, Error> {
        serde_json::from_value(raw).map_err(Error::InvalidOptions)
    }
}

/// The `global` block of a Prometheus configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GlobalOpts {
    pub scrape_interval: String,
    pub scrape_timeout: String,
    pub evaluation_interval: String,
    pub external_labels: BTreeMap<String, String>,
}

/// In-memory model of the scrape/alerting configuration.
/// https://prometheus.io/docs/prometheus/latest/configuration/configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PrometheusConfig {
    pub global: GlobalOpts,
    pub scrape_configs: Vec<Value>,
    pub alerting: Value,
}

impl PrometheusConfig {
    pub fn add_scrape_config(&mut self, scrape_config: Value) {
        self.scrape_configs.push(scrape_config);
    }

    /// Render the deterministic YAML document mounted into the workload.
    pub fn render(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(Error::from)
    }

    pub fn parse(document: &str) -> Result<Self, Error> {
        serde_yaml::from_str(document).map_err(Error::from)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("PrometheusConfig was not serializable, should never happen")
    }
}

/// Normalize a parsed configuration document so that documents differing
/// only in the representation of empty optional sections compare equal.
pub fn normalize(config: &mut Value) {
    if let Some(object) = config.as_object_mut() {
        let alerting = object.entry("alerting").or_insert_with(|| json!({}));
        if alerting.is_null() {
            *alerting = json!({});
        }
        if let Some(global) = object.get_mut("global").and_then(Value::as_object_mut) {
            let labels = global.entry("external_labels").or_insert_with(|| json!({}));
            if labels.is_null() {
                *labels = json!({});
            }
        }
    }
}

/// Parse the `external-labels` option: a JSON object with string-only values.
/// An empty string means no labels, which is not an error.
pub fn parse_external_labels(raw_labels: &str) -> Result<BTreeMap<String, String>, Error> {
    if raw_labels.is_empty() {
        return Ok(BTreeMap::new());
    }

    let parsed: Value = serde_json::from_str(raw_labels)
        .map_err(|_| Error::ExternalLabelParse(raw_labels.to_string()))?;

    let object = match parsed.as_object() {
        Some(object) => object,
        None => {
            return Err(Error::ExternalLabelParse(format!(
                "expected object, got: {}",
                raw_labels
            )))
        }
    };

    let mut labels = BTreeMap::new();
    for (key, value) in object {
        match value.as_str() {
            Some(value) => {
                labels.insert(key.to_owned(), value.to_owned());
            }
            None => {
                return Err(Error::ExternalLabelParse(format!(
                    "external-labels.{} value has to be a string, got: {}",
                    key, value
                )))
            }
        }
    }
    Ok(labels)
}

/// Validate a Prometheus time string: `<integer><unit>` with unit one of
/// y/w/d/h/m/s/ms. Returns the string unchanged on success.
pub fn parse_duration(key: &str, value: &str) -> Result<String, Error> {
    let abort = || Error::TimeStringParse {
        key: key.to_string(),
        value: value.to_string(),
    };

    if value.is_empty() {
        return Err(abort());
    }

    // `ms` is two characters, so it must be checked before the
    // single-character units or the trailing `s` would match first.
    let digits = if let Some(prefix) = value.strip_suffix("ms") {
        prefix
    } else {
        let mut chars = value.chars();
        match chars.next_back() {
            Some('y') | Some('w') | Some('d') | Some('h') | Some('m') | Some('s') => chars.as_str(),
            _ => return Err(abort()),
        }
    };

    if digits.is_empty() || digits.parse::<u64>().is_err() {
        return Err(abort());
    }

    Ok(value.to_string())
}

/// Build the full Prometheus configuration from validated options plus the
/// alerting overlay received from the peer relation (empty when unrelated).
pub fn build_prometheus_config(
    options: &PrometheusOptions,
    alerting: &Value,
) -> Result<PrometheusConfig, Error> {
    let global = GlobalOpts {
        scrape_interval: parse_duration("scrape-interval", &options.scrape_interval)?,
        scrape_timeout: parse_duration("scrape-timeout", &options.scrape_timeout)?,
        evaluation_interval: parse_duration("evaluation-interval", &options.evaluation_interval)?,
        external_labels: parse_external_labels(&options.external_labels)?,
    };

    let alerting = if alerting.is_null() {
        json!({})
    } else {
        alerting.clone()
    };

    let mut config = PrometheusConfig {
        global,
        scrape_configs: Vec::new(),
        alerting,
    };

    // Prometheus always scrapes its own metrics endpoint.
    config.add_scrape_config(json!({
        "job_name": "prometheus",
        "scrape_interval": SELF_SCRAPE_INTERVAL,
        "metrics_path": "/metrics",
        "honor_timestamps": true,
        "scheme": "http",
        "static_configs": [{
            "targets": [format!("localhost:{}", ADVERTISED_PORT)]
        }]
    }));

    if options.monitor_k8s {
        for scrape_config in cluster_scrape_configs()? {
            config.add_scrape_config(scrape_config);
        }
    }

    debug!("Built prometheus config: {:?}", config);
    Ok(config)
}

/// The cluster-metrics jobs are loaded verbatim from the static template
/// and appended in file order.
fn cluster_scrape_configs() -> Result<Vec<Value>, Error> {
    let template: Value = serde_yaml::from_str(CLUSTER_SCRAPE_TEMPLATE)?;
    Ok(template
        .get("scrape_configs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

/// Render the Prometheus CLI argument list: the immutable baseline from the
/// upstream Dockerfile, `--web.enable-lifecycle` so configuration can be
/// reloaded over HTTP, and the tunables from the options.
pub fn build_cli_args(options: &PrometheusOptions) -> Vec<String> {
    let mut args: Vec<String> = [
        "--config.file=/etc/prometheus/prometheus.yml",
        "--storage.tsdb.path=/prometheus",
        "--web.enable-lifecycle",
        "--web.console.templates=/usr/share/prometheus/consoles",
        "--web.console.libraries=/usr/share/prometheus/console_libraries",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();

    // Two historical fallbacks, kept distinct: an invalid level falls back
    // to "debug" with a warning, while an absent level defaults to "info".
    let log_level = match &options.log_level {
        Some(level) => {
            let level = level.to_lowercase();
            if ALLOWED_LOG_LEVELS.contains(&level.as_str()) {
                level
            } else {
                warn!(
                    "Invalid loglevel: {} given, {} allowed. Falling back to DEBUG loglevel.",
                    level,
                    ALLOWED_LOG_LEVELS.join("/")
                );
                "debug".to_string()
            }
        }
        None => "info".to_string(),
    };
    args.push(format!("--log.level={}", log_level));

    if options.web_enable_admin_api {
        args.push("--web.enable-admin-api".to_string());
    }
    if let Some(title) = &options.web_page_title {
        args.push(format!("--web.page-title=\"{}\"", title));
    }
    if options.tsdb_wal_compression {
        args.push("--storage.tsdb.wal-compression".to_string());
    }
    if let Some(value) = options.web_max_connections {
        args.push(format!("--web.max-connections={}", value));
    }
    if let Some(value) = &options.tsdb_retention_time {
        args.push(format!("--storage.tsdb.retention.time={}", value));
    }
    if let Some(value) = options.alertmanager_notification_queue_capacity {
        args.push(format!("--alertmanager.notification-queue-capacity={}", value));
    }
    if let Some(value) = &options.alertmanager_timeout {
        args.push(format!("--alertmanager.timeout={}", value));
    }

    debug!("Rendered CLI args: {}", args.join(" "));
    args
}
