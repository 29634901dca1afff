use super::{ControllerError, DeferReason, Outcome};
use crate::listener::ObjectCache;
use crate::publisher::Publisher;
use canopy_api::constants::LATEST_INSTANCE_LABEL;
use canopy_api::labels::latest_instance_labels;
use canopy_api::v1alpha1::{Application, ApplicationStatus, Instance};
use gateway_api::apis::standard::httproutes::HTTPRoute;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::info;

/// True unless some route is already tagged with the hash of `latest`.
pub fn route_update_required(routes: &[Arc<HTTPRoute>], latest: &Instance) -> bool {
    !routes
        .iter()
        .any(|route| route.labels().get(LATEST_INSTANCE_LABEL) == Some(&latest.hash_of_spec))
}

/// Keeps the application's route tagged with the latest instance. Routes only
/// point at the service, so there is no readiness gate here.
pub struct RouteController {
    routes: ObjectCache<HTTPRoute>,
    publisher: Arc<dyn Publisher<HTTPRoute>>,
}

impl RouteController {
    pub fn new(routes: ObjectCache<HTTPRoute>, publisher: Arc<dyn Publisher<HTTPRoute>>) -> Self {
        Self { routes, publisher }
    }

    pub async fn reconcile(
        &self,
        application: &Application,
        status: &ApplicationStatus,
    ) -> Result<Outcome, ControllerError> {
        let Some(latest) = status.latest_instance() else {
            return Ok(Outcome::Deferred(DeferReason::NoLatestInstance));
        };

        if !route_update_required(&self.routes.by_parent(application), latest) {
            return Ok(Outcome::Unchanged);
        }

        info!(
            "Updating route of {} for instance {}",
            latest.realm_id, latest.hash_of_spec
        );
        self.publisher
            .publish(application, latest, &latest_instance_labels(latest))
            .await
            .map_err(|source| ControllerError::Publish {
                kind: "HTTPRoute",
                source,
            })?;

        Ok(Outcome::Published)
    }
}
