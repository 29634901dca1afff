use k8s_openapi::api::apps::v1::Deployment;

/// A workload is ready once its controller has observed the current generation,
/// enough replicas are available, and the `Available` condition (when reported)
/// is `True`.
pub fn is_workload_ready(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };

    let generation = deployment.metadata.generation.unwrap_or_default();
    let observed_generation = status.observed_generation.unwrap_or_default();
    if observed_generation < generation {
        return false;
    }

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    if status.available_replicas.unwrap_or_default() < desired {
        return false;
    }

    status
        .conditions
        .iter()
        .flatten()
        .find(|condition| condition.type_ == "Available")
        .is_none_or(|condition| condition.status == "True")
}
