use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

const RUNNING: &str = "Running";
const CONTAINERS_READY: &str = "ContainersReady";
const TRUE: &str = "True";

/// Operational state of the workload as derived from the pod-status API.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadState {
    Unknown,
    Starting,
    BecomingReady,
    Ready,
}

/// The unit status reported back to the orchestration runtime. Output-only,
/// recomputed on every pass.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum UnitStatus {
    Maintenance(String),
    Active,
    Blocked(String),
    Terminating,
}

impl UnitStatus {
    pub fn maintenance(message: &str) -> Self {
        UnitStatus::Maintenance(message.to_string())
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitStatus::Maintenance(message) => write!(f, "maintenance: {}", message),
            UnitStatus::Active => write!(f, "active"),
            UnitStatus::Blocked(message) => write!(f, "blocked: {}", message),
            UnitStatus::Terminating => write!(f, "maintenance: Terminating"),
        }
    }
}

/// Map a pod record into the closed set of workload states.
/// Precedence order is strict and first-match-wins: no record at all,
/// not yet running, running but not ready, ready.
///
/// A pod record with no status or phase is not classifiable and indicates
/// a contract violation on the status API side; it is surfaced as an error
/// rather than silently defaulted.
pub fn classify(pod: Option<&Pod>) -> Result<WorkloadState, Error> {
    let pod = match pod {
        None => return Ok(WorkloadState::Unknown),
        Some(pod) => pod,
    };

    let status = pod
        .status
        .as_ref()
        .ok_or_else(|| Error::UnexpectedPodStatus("pod record has no status".to_string()))?;
    let phase = status
        .phase
        .as_deref()
        .ok_or_else(|| Error::UnexpectedPodStatus("pod status has no phase".to_string()))?;

    if phase != RUNNING {
        return Ok(WorkloadState::Starting);
    }

    let is_ready = status
        .conditions
        .iter()
        .flatten()
        .any(|condition| condition.type_ == CONTAINERS_READY && condition.status == TRUE);

    if is_ready {
        Ok(WorkloadState::Ready)
    } else {
        Ok(WorkloadState::BecomingReady)
    }
}

impl WorkloadState {
    pub fn to_unit_status(self) -> UnitStatus {
        match self {
            WorkloadState::Unknown => UnitStatus::maintenance("Waiting for pod to appear"),
            WorkloadState::Starting => UnitStatus::maintenance("Pod is starting"),
            WorkloadState::BecomingReady => UnitStatus::maintenance("Pod is getting ready"),
            WorkloadState::Ready => UnitStatus::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};

    fn pod(phase: &str, ready: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: CONTAINERS_READY.to_string(),
                    status: ready.to_string(),
                    ..PodCondition::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn test_classify_no_record() {
        assert_eq!(classify(None).unwrap(), WorkloadState::Unknown);
    }

    #[test]
    fn test_classify_pending_pod() {
        assert_eq!(
            classify(Some(&pod("Pending", "False"))).unwrap(),
            WorkloadState::Starting
        );
    }

    #[test]
    fn test_classify_running_but_not_ready() {
        assert_eq!(
            classify(Some(&pod("Running", "False"))).unwrap(),
            WorkloadState::BecomingReady
        );
    }

    #[test]
    fn test_classify_ready() {
        assert_eq!(
            classify(Some(&pod("Running", "True"))).unwrap(),
            WorkloadState::Ready
        );
    }

    #[test]
    fn test_classify_running_without_conditions() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..PodStatus::default()
            }),
            ..Pod::default()
        };
        assert_eq!(classify(Some(&pod)).unwrap(), WorkloadState::BecomingReady);
    }

    #[test]
    fn test_classify_malformed_record_is_an_error() {
        let pod = Pod::default();
        assert!(matches!(
            classify(Some(&pod)),
            Err(Error::UnexpectedPodStatus(_))
        ));
    }

    #[test]
    fn test_workload_state_to_unit_status() {
        assert_eq!(
            WorkloadState::Unknown.to_unit_status(),
            UnitStatus::maintenance("Waiting for pod to appear")
        );
        assert_eq!(
            WorkloadState::Starting.to_unit_status(),
            UnitStatus::maintenance("Pod is starting")
        );
        assert_eq!(
            WorkloadState::BecomingReady.to_unit_status(),
            UnitStatus::maintenance("Pod is getting ready")
        );
        assert_eq!(WorkloadState::Ready.to_unit_status(), UnitStatus::Active);
    }
}
