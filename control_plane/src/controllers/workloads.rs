use super::{ControllerError, Outcome};
use crate::listener::ObjectCache;
use crate::publisher::Publisher;
use canopy_api::labels::instance_labels;
use canopy_api::v1alpha1::{Application, Instance};
use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use tracing::{debug, info};

/// Makes sure the desired instance has a workload.
pub struct WorkloadController {
    workloads: ObjectCache<Deployment>,
    publisher: Arc<dyn Publisher<Deployment>>,
}

impl WorkloadController {
    pub fn new(
        workloads: ObjectCache<Deployment>,
        publisher: Arc<dyn Publisher<Deployment>>,
    ) -> Self {
        Self {
            workloads,
            publisher,
        }
    }

    pub async fn reconcile(
        &self,
        application: &Application,
        desired: &Instance,
    ) -> Result<Outcome, ControllerError> {
        if !self.workloads.by_instance(desired).is_empty() {
            debug!(
                "Workload for {} r{} exists",
                desired.hash_of_spec, desired.revision
            );
            return Ok(Outcome::Unchanged);
        }

        info!(
            "Creating workload for {} instance {} r{}",
            desired.realm_id, desired.hash_of_spec, desired.revision
        );
        self.publisher
            .publish(application, desired, &instance_labels(desired))
            .await
            .map_err(|source| ControllerError::Publish {
                kind: "Deployment",
                source,
            })?;

        Ok(Outcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{application, instance, workload};
    use super::*;
    use crate::publisher::{MockPublisher, PublishError};
    use assertables::assert_ok;
    use canopy_api::constants::{INSTANCE_HASH_LABEL, LATEST_INSTANCE_LABEL};

    #[test_log::test(tokio::test)]
    async fn test_publishes_missing_workload() {
        let mut publisher = MockPublisher::<Deployment>::new();
        publisher
            .expect_publish()
            .withf(|_, instance, labels| {
                instance.hash_of_spec == "bbbbbbbbbb"
                    && labels.get(INSTANCE_HASH_LABEL).map(String::as_str) == Some("bbbbbbbbbb")
                    && !labels.contains_key(LATEST_INSTANCE_LABEL)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let controller = WorkloadController::new(
            ObjectCache::from_objects([workload(&instance("aaaaaaaaaa", 1, true), true)]),
            Arc::new(publisher),
        );

        let outcome = assert_ok!(
            controller
                .reconcile(&application(), &instance("bbbbbbbbbb", 1, false))
                .await
        );
        assert_eq!(outcome, Outcome::Published);
    }

    #[test_log::test(tokio::test)]
    async fn test_existing_workload_is_left_alone() {
        let desired = instance("aaaaaaaaaa", 1, false);
        let mut publisher = MockPublisher::<Deployment>::new();
        publisher.expect_publish().never();

        let controller = WorkloadController::new(
            ObjectCache::from_objects([workload(&desired, false)]),
            Arc::new(publisher),
        );

        let outcome = assert_ok!(controller.reconcile(&application(), &desired).await);
        assert_eq!(outcome, Outcome::Unchanged);
    }

    #[test_log::test(tokio::test)]
    async fn test_workload_of_promoted_instance_is_still_found() {
        let created_for = instance("aaaaaaaaaa", 1, false);
        let mut publisher = MockPublisher::<Deployment>::new();
        publisher.expect_publish().never();

        let controller = WorkloadController::new(
            ObjectCache::from_objects([workload(&created_for, true)]),
            Arc::new(publisher),
        );

        let outcome = assert_ok!(
            controller
                .reconcile(&application(), &instance("aaaaaaaaaa", 1, true))
                .await
        );
        assert_eq!(outcome, Outcome::Unchanged);
    }

    #[test_log::test(tokio::test)]
    async fn test_publish_failure_is_reported() {
        let mut publisher = MockPublisher::<Deployment>::new();
        publisher.expect_publish().times(1).returning(|_, _, _| {
            Err(PublishError::Factory(
                crate::factory::FactoryError::MissingMetadata("uid"),
            ))
        });

        let controller =
            WorkloadController::new(ObjectCache::from_objects([]), Arc::new(publisher));

        let result = controller
            .reconcile(&application(), &instance("aaaaaaaaaa", 1, false))
            .await;
        assert!(matches!(
            result,
            Err(ControllerError::Publish {
                kind: "Deployment",
                ..
            })
        ));
    }
}
