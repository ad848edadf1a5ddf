use thiserror::Error;

use crate::status::UnitStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("external-labels malformed JSON: {0}")]
    ExternalLabelParse(String),

    #[error("Invalid time definition for key {key} - got: {value}")]
    TimeStringParse { key: String, value: String },

    #[error("Invalid config options: {0}")]
    InvalidOptions(#[source] serde_json::Error),

    #[error("Missing resource: {0}")]
    MissingResource(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("ssl-cert and ssl-key must be supplied together")]
    IncompleteTlsMaterial,

    #[error("Prometheus API error: {0}")]
    PrometheusApi(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to submit workload spec: {0}")]
    SpecSubmission(String),

    #[error("Unexpected pod status received: {0}")]
    UnexpectedPodStatus(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

impl Error {
    /// Render this error as the unit status the runtime should display.
    /// Validation and resource errors block the unit with the offending
    /// input echoed for diagnosis.
    pub fn to_unit_status(&self) -> UnitStatus {
        UnitStatus::Blocked(format!("{}", self))
    }

    /// Recoverable errors are retried by the caller; everything else is
    /// fatal to the current reconciliation pass.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::PrometheusApi(_) | Error::Request(_))
    }
}
