use crate::controllers::{
    ControllerError, Outcome, RouteController, ServiceController, WorkloadController,
};
use crate::kubernetes::objects::ObjectRef;
use crate::listener::ObjectCache;
use crate::options::Options;
use crate::status::{StatusError, StatusWriter};
use crate::triggers::Trigger;
use canopy_api::v1alpha1::Application;
use canopy_core::task::Builder as TaskBuilder;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to hash application spec: {0}")]
    Hash(#[from] serde_json::Error),
    #[error("Application {0} has no namespace or name")]
    MissingMetadata(ObjectRef),
    #[error("Failed to write status: {0}")]
    Status(#[from] StatusError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

/// What one reconcile pass did for an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub created_instance: bool,
    pub promoted_instance: bool,
    pub workload: Outcome,
    pub service: Outcome,
    pub route: Outcome,
}

/// Moves every triggered application towards its desired state, one at a time.
pub struct Driver {
    options: Arc<Options>,
    applications: ObjectCache<Application>,
    workloads: WorkloadController,
    services: ServiceController,
    routes: RouteController,
    status_writer: Arc<dyn StatusWriter>,
}

/// Drains every trigger that is already queued behind `first` into one set of parents.
pub fn coalesce(first: Trigger, rx: &mut mpsc::Receiver<Trigger>) -> BTreeSet<ObjectRef> {
    let mut pending = BTreeSet::new();
    let mut next = Some(first);
    while let Some(trigger) = next {
        trace!(
            "{} change for {} (instance {:?})",
            trigger.source_kind(),
            trigger.realm_id(),
            trigger.instance_hash()
        );
        pending.insert(trigger.parent_ref());
        next = rx.try_recv().ok();
    }
    pending
}

impl Driver {
    pub fn new(
        options: Arc<Options>,
        applications: ObjectCache<Application>,
        workloads: WorkloadController,
        services: ServiceController,
        routes: RouteController,
        status_writer: Arc<dyn StatusWriter>,
    ) -> Self {
        Self {
            options,
            applications,
            workloads,
            services,
            routes,
            status_writer,
        }
    }

    pub fn start(self, task_builder: &TaskBuilder, rx: mpsc::Receiver<Trigger>) {
        let token = task_builder.cancellation_token();
        task_builder
            .new_task("driver")
            .spawn(async move { self.run(rx, token).await });
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Trigger>, token: CancellationToken) {
        let mut resync = interval(self.options.resync_interval());
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; initial state arrives as triggers anyway.
        resync.reset();

        loop {
            let pending = select! {
                () = token.cancelled() => {
                    debug!("Driver cancelled");
                    break;
                }
                trigger = rx.recv() => match trigger {
                    Some(trigger) => coalesce(trigger, &mut rx),
                    None => {
                        info!("Trigger channel closed, driver exiting");
                        break;
                    }
                },
                _ = resync.tick() => self.known_applications(),
            };

            for application in pending {
                if let Err(err) = self.reconcile(&application).await {
                    error!("Failed to reconcile {}: {}", application, err);
                }
            }
        }
    }

    fn known_applications(&self) -> BTreeSet<ObjectRef> {
        self.applications
            .all()
            .iter()
            .filter_map(|application| ObjectRef::for_object(application.as_ref()).ok())
            .collect()
    }

    /// Runs one pass for `application_ref`. `Ok(None)` means it is gone or going.
    #[instrument(skip(self, application_ref), fields(application = %application_ref))]
    pub async fn reconcile(
        &self,
        application_ref: &ObjectRef,
    ) -> Result<Option<Reconciled>, DriverError> {
        let Some(application) = self
            .applications
            .get(application_ref.namespace(), application_ref.name())
        else {
            debug!("Application no longer exists");
            return Ok(None);
        };
        if application.metadata.deletion_timestamp.is_some() {
            debug!("Application is being deleted");
            return Ok(None);
        }

        let mut status = application.status.clone().unwrap_or_default();
        let hash = application.spec.content_hash()?;

        let (desired, created_instance) = match status.desired_instance() {
            Some(desired) if desired.hash_of_spec == hash => (desired.clone(), false),
            _ => {
                let instance = application
                    .next_instance(&hash)
                    .ok_or_else(|| DriverError::MissingMetadata(application_ref.clone()))?;
                info!(
                    "Spec changed, creating instance {} r{}",
                    instance.hash_of_spec, instance.revision
                );
                status.record(instance.clone());
                self.status_writer.write(&application, &status).await?;
                (instance, true)
            }
        };

        let workload = self.workloads.reconcile(&application, &desired).await?;
        let service = self.services.reconcile(&application, &desired).await?;

        // The service points at the desired instance, so it now receives traffic.
        let promoted_instance = matches!(service, Outcome::Unchanged | Outcome::Published)
            && status.promote(&desired.hash_of_spec, desired.revision);
        if promoted_instance {
            info!(
                "Instance {} r{} is now the latest",
                desired.hash_of_spec, desired.revision
            );
            self.status_writer.write(&application, &status).await?;
        }

        let route = self.routes.reconcile(&application, &status).await?;
        debug!(
            "Reconciled: workload {:?}, service {:?}, route {:?}",
            workload, service, route
        );

        Ok(Some(Reconciled {
            created_instance,
            promoted_instance,
            workload,
            service,
            route,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::DeferReason;
    use crate::controllers::fixtures::{application, instance, pointing_at, status, workload};
    use crate::publisher::MockPublisher;
    use crate::status::MockStatusWriter;
    use assertables::{assert_none, assert_ok, assert_some};
    use canopy_api::v1alpha1::{ApplicationStatus, Instance};
    use gateway_api::apis::standard::httproutes::HTTPRoute;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Service;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    type Written = Arc<Mutex<Vec<ApplicationStatus>>>;

    fn publisher<K: Send + Sync + 'static>(times: usize) -> Arc<MockPublisher<K>> {
        let mut publisher = MockPublisher::<K>::new();
        publisher
            .expect_publish()
            .times(times)
            .returning(|_, _, _| Ok(()));
        Arc::new(publisher)
    }

    #[derive(Default)]
    struct Cluster {
        applications: Vec<Application>,
        workloads: Vec<Deployment>,
        services: Vec<Service>,
        routes: Vec<HTTPRoute>,
    }

    #[derive(Default)]
    struct Calls {
        workloads: usize,
        services: usize,
        routes: usize,
        status_writes: usize,
    }

    fn driver(cluster: Cluster, calls: Calls) -> (Driver, Written) {
        let written = Written::default();
        let mut status_writer = MockStatusWriter::new();
        let sink = written.clone();
        status_writer
            .expect_write()
            .times(calls.status_writes)
            .returning(move |_, status| {
                sink.lock().unwrap().push(status.clone());
                Ok(())
            });

        let driver = Driver::new(
            Arc::new(Options::default()),
            ObjectCache::from_objects(cluster.applications),
            WorkloadController::new(
                ObjectCache::from_objects(cluster.workloads.clone()),
                publisher::<Deployment>(calls.workloads),
            ),
            ServiceController::new(
                ObjectCache::from_objects(cluster.workloads),
                ObjectCache::from_objects(cluster.services),
                publisher::<Service>(calls.services),
            ),
            RouteController::new(
                ObjectCache::from_objects(cluster.routes),
                publisher::<HTTPRoute>(calls.routes),
            ),
            Arc::new(status_writer),
        );
        (driver, written)
    }

    fn storefront() -> ObjectRef {
        ObjectRef::of_kind::<Application>()
            .namespace("shop")
            .name("storefront")
            .build()
    }

    fn with_status(instances: Vec<Instance>) -> Application {
        let mut application = application();
        application.status = Some(status(instances));
        application
    }

    fn current_hash() -> String {
        application().spec.content_hash().unwrap()
    }

    fn service(instance: &Instance) -> Service {
        pointing_at("v1", "Service", instance)
    }

    fn route(instance: &Instance) -> HTTPRoute {
        pointing_at("gateway.networking.k8s.io/v1", "HTTPRoute", instance)
    }

    fn latest_of(status: &ApplicationStatus) -> Option<(String, u32)> {
        status
            .latest_instance()
            .map(|latest| (latest.hash_of_spec.clone(), latest.revision))
    }

    #[test_log::test(tokio::test)]
    async fn test_new_application_records_instance_without_promoting_it() {
        let (driver, written) = driver(
            Cluster {
                applications: vec![application()],
                ..Cluster::default()
            },
            Calls {
                workloads: 1,
                status_writes: 1,
                ..Calls::default()
            },
        );

        let reconciled = assert_some!(assert_ok!(driver.reconcile(&storefront()).await));
        assert!(reconciled.created_instance);
        assert!(!reconciled.promoted_instance);
        assert_eq!(reconciled.workload, Outcome::Published);
        assert_eq!(
            reconciled.service,
            Outcome::Deferred(DeferReason::WorkloadMissing)
        );
        assert_eq!(
            reconciled.route,
            Outcome::Deferred(DeferReason::NoLatestInstance)
        );

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].instances.len(), 1);
        assert_eq!(written[0].spec_hash, Some(current_hash()));
        assert_none!(written[0].latest_instance());
    }

    #[test_log::test(tokio::test)]
    async fn test_spec_change_keeps_traffic_on_latest_instance() {
        let old = instance("aaaaaaaaaa", 1, true);
        let (driver, written) = driver(
            Cluster {
                applications: vec![with_status(vec![old.clone()])],
                workloads: vec![workload(&old, true)],
                services: vec![service(&old)],
                routes: vec![route(&old)],
            },
            Calls {
                workloads: 1,
                status_writes: 1,
                ..Calls::default()
            },
        );

        let reconciled = assert_some!(assert_ok!(driver.reconcile(&storefront()).await));
        assert!(reconciled.created_instance);
        assert!(!reconciled.promoted_instance);
        assert_eq!(
            reconciled.service,
            Outcome::Deferred(DeferReason::WorkloadMissing)
        );
        assert_eq!(reconciled.route, Outcome::Unchanged);

        let written = written.lock().unwrap();
        assert_eq!(written[0].instances.len(), 2);
        assert_eq!(written[0].spec_hash, Some(current_hash()));
        assert_eq!(latest_of(&written[0]), Some(("aaaaaaaaaa".to_string(), 1)));
    }

    #[test_log::test(tokio::test)]
    async fn test_unready_workload_does_not_change_latest() {
        let old = instance("aaaaaaaaaa", 1, true);
        let desired = instance(&current_hash(), 1, false);
        let (driver, _) = driver(
            Cluster {
                applications: vec![with_status(vec![old.clone(), desired.clone()])],
                workloads: vec![workload(&old, true), workload(&desired, false)],
                services: vec![service(&old)],
                routes: vec![route(&old)],
            },
            Calls::default(),
        );

        let reconciled = assert_some!(assert_ok!(driver.reconcile(&storefront()).await));
        assert!(!reconciled.created_instance);
        assert!(!reconciled.promoted_instance);
        assert_eq!(reconciled.workload, Outcome::Unchanged);
        assert_eq!(
            reconciled.service,
            Outcome::Deferred(DeferReason::WorkloadNotReady)
        );
        assert_eq!(reconciled.route, Outcome::Unchanged);
    }

    #[test_log::test(tokio::test)]
    async fn test_ready_workload_moves_service_then_promotes() {
        let old = instance("aaaaaaaaaa", 1, true);
        let desired = instance(&current_hash(), 1, false);
        let (driver, written) = driver(
            Cluster {
                applications: vec![with_status(vec![old.clone(), desired.clone()])],
                workloads: vec![workload(&old, true), workload(&desired, true)],
                services: vec![service(&old)],
                routes: vec![route(&old)],
            },
            Calls {
                services: 1,
                routes: 1,
                status_writes: 1,
                ..Calls::default()
            },
        );

        let reconciled = assert_some!(assert_ok!(driver.reconcile(&storefront()).await));
        assert!(reconciled.promoted_instance);
        assert_eq!(reconciled.service, Outcome::Published);
        assert_eq!(reconciled.route, Outcome::Published);

        let written = written.lock().unwrap();
        assert_eq!(latest_of(&written[0]), Some((current_hash(), 1)));
        assert_eq!(
            written[0]
                .instances
                .iter()
                .filter(|i| i.is_latest_instance)
                .count(),
            1
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_converged_application_is_unchanged() {
        let latest = instance(&current_hash(), 1, true);
        let (driver, _) = driver(
            Cluster {
                applications: vec![with_status(vec![latest.clone()])],
                workloads: vec![workload(&latest, true)],
                services: vec![service(&latest)],
                routes: vec![route(&latest)],
            },
            Calls::default(),
        );

        let reconciled = assert_some!(assert_ok!(driver.reconcile(&storefront()).await));
        assert!(!reconciled.created_instance);
        assert!(!reconciled.promoted_instance);
        assert_eq!(reconciled.workload, Outcome::Unchanged);
        assert_eq!(reconciled.service, Outcome::Unchanged);
        assert_eq!(reconciled.route, Outcome::Unchanged);
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_application_is_skipped() {
        let (driver, _) = driver(Cluster::default(), Calls::default());

        assert_none!(assert_ok!(driver.reconcile(&storefront()).await));
    }

    #[test_log::test(tokio::test)]
    async fn test_coalesce_deduplicates_parents() {
        let (tx, mut rx) = mpsc::channel(8);
        let trigger = |name: &str, kind: &str| {
            Trigger::builder()
                .realm_id(format!("shop.{name}"))
                .name(name)
                .namespace("shop")
                .source_kind(kind)
                .build()
        };

        tx.send(trigger("storefront", "Service")).await.unwrap();
        tx.send(trigger("checkout", "Deployment")).await.unwrap();
        tx.send(trigger("storefront", "HTTPRoute")).await.unwrap();

        let pending = coalesce(trigger("storefront", "Deployment"), &mut rx);
        assert_eq!(pending.len(), 2);
        assert!(pending.contains(&storefront()));
        assert!(rx.try_recv().is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_run_exits_when_channel_closes() {
        let (driver, _) = driver(Cluster::default(), Calls::default());

        let (tx, rx) = mpsc::channel(8);
        tx.send(
            Trigger::builder()
                .realm_id("shop.storefront")
                .name("storefront")
                .namespace("shop")
                .source_kind("Application")
                .build(),
        )
        .await
        .unwrap();
        drop(tx);

        let result = timeout(
            Duration::from_secs(5),
            driver.run(rx, CancellationToken::new()),
        )
        .await;
        assert!(result.is_ok(), "Driver should exit once all senders are gone");
    }
}
