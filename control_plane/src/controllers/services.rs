use super::{ControllerError, DeferReason, Outcome, is_workload_ready};
use crate::listener::ObjectCache;
use crate::publisher::Publisher;
use canopy_api::constants::{LATEST_INSTANCE_LABEL, REVISION_LABEL};
use canopy_api::labels::latest_instance_labels;
use canopy_api::v1alpha1::{Application, Instance};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

/// True unless some service already sends traffic to the hash and revision of `desired`.
pub fn service_update_required(services: &[Arc<Service>], desired: &Instance) -> bool {
    let revision = desired.revision.to_string();
    !services.iter().any(|service| {
        let labels = service.labels();
        labels.get(LATEST_INSTANCE_LABEL) == Some(&desired.hash_of_spec)
            && labels.get(REVISION_LABEL) == Some(&revision)
    })
}

/// Moves the application's service onto the desired instance once its workload is ready.
pub struct ServiceController {
    workloads: ObjectCache<Deployment>,
    services: ObjectCache<Service>,
    publisher: Arc<dyn Publisher<Service>>,
}

impl ServiceController {
    pub fn new(
        workloads: ObjectCache<Deployment>,
        services: ObjectCache<Service>,
        publisher: Arc<dyn Publisher<Service>>,
    ) -> Self {
        Self {
            workloads,
            services,
            publisher,
        }
    }

    /// `Unchanged` and `Published` both mean the service now points at `desired`.
    pub async fn reconcile(
        &self,
        application: &Application,
        desired: &Instance,
    ) -> Result<Outcome, ControllerError> {
        let services = self.services.by_parent(application);
        if !service_update_required(&services, desired) {
            return Ok(Outcome::Unchanged);
        }

        let workloads = self.workloads.by_instance(desired);
        let Some(workload) = workloads.first() else {
            debug!(
                "Service update for {} deferred, no workload for {} r{} yet",
                desired.realm_id, desired.hash_of_spec, desired.revision
            );
            return Ok(Outcome::Deferred(DeferReason::WorkloadMissing));
        };

        if !is_workload_ready(workload) {
            debug!(
                "Service update for {} deferred, workload {} not ready",
                desired.realm_id,
                workload.name_any()
            );
            return Ok(Outcome::Deferred(DeferReason::WorkloadNotReady));
        }

        info!(
            "Switching service of {} to instance {} r{}",
            desired.realm_id, desired.hash_of_spec, desired.revision
        );
        self.publisher
            .publish(application, desired, &latest_instance_labels(desired))
            .await
            .map_err(|source| ControllerError::Publish {
                kind: "Service",
                source,
            })?;

        Ok(Outcome::Published)
    }
}
