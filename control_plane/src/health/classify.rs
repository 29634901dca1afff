use getset::{CopyGetters, Getters};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use typed_builder::TypedBuilder;

pub const UNKNOWN_ERROR: &str = "unknown error";

#[derive(TypedBuilder, Getters, CopyGetters, Clone, Debug, Default, PartialEq)]
pub struct HealthStatus {
    #[getset(get_copy = "pub")]
    #[builder(default)]
    failed: bool,

    #[getset(get = "pub")]
    #[builder(default, setter(strip_option, into))]
    message: Option<String>,

    /// Creation time of the failing pod.
    #[getset(get = "pub")]
    #[builder(default)]
    created_at: Option<Time>,
}

fn tracked_container<'a>(
    statuses: &'a [ContainerStatus],
    container: &str,
) -> Option<&'a ContainerStatus> {
    statuses
        .iter()
        .find(|status| status.name == container)
        .or_else(|| statuses.first())
}

fn termination_message(status: &ContainerStatus) -> String {
    status
        .last_state
        .as_ref()
        .and_then(|state| state.terminated.as_ref())
        .and_then(|terminated| {
            terminated
                .message
                .clone()
                .or_else(|| terminated.reason.clone())
        })
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
}

/// Classifies an instance from its pods. The first pod whose tracked container
/// is not ready after at least one restart marks the instance as failed.
pub fn classify_pods(pods: &[Pod], container: &str) -> HealthStatus {
    for pod in pods {
        let Some(statuses) = pod
            .status
            .as_ref()
            .and_then(|status| status.container_statuses.as_deref())
        else {
            continue;
        };
        let Some(status) = tracked_container(statuses, container) else {
            continue;
        };

        if !status.ready && status.restart_count >= 1 {
            return HealthStatus::builder()
                .failed(true)
                .message(termination_message(status))
                .created_at(pod.metadata.creation_timestamp.clone())
                .build();
        }
    }

    HealthStatus::default()
}
