mod classify;

pub use classify::{HealthStatus, UNKNOWN_ERROR, classify_pods};

use crate::alerts::AlertSink;
use crate::listener::ObjectCache;
use crate::options::Options;
use async_trait::async_trait;
use canopy_api::constants::APP_CONTAINER_NAME;
use canopy_api::labels::{instance_labels, selector};
use canopy_api::v1alpha1::{Application, Instance};
use canopy_core::task::Builder as TaskBuilder;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::select;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Failed to list pods: {0}")]
    ListPods(#[from] kube::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, HealthError>;
}

pub struct KubePodLister {
    client: Client,
}

impl KubePodLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodLister for KubePodLister {
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, HealthError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods.items)
    }
}

/// Periodically inspects the pods of every known instance and raises an alert
/// for each instance that is crash-looping.
#[derive(Clone)]
pub struct HealthPoller {
    options: Arc<Options>,
    applications: ObjectCache<Application>,
    pods: Arc<dyn PodLister>,
    alerts: Arc<dyn AlertSink>,
    token: CancellationToken,
    started: Arc<AtomicBool>,
}

impl HealthPoller {
    pub fn new(
        options: Arc<Options>,
        applications: ObjectCache<Application>,
        pods: Arc<dyn PodLister>,
        alerts: Arc<dyn AlertSink>,
        token: CancellationToken,
    ) -> Self {
        Self {
            options,
            applications,
            pods,
            alerts,
            token,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(&self, task_builder: &TaskBuilder) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Health poller already started");
            return;
        }

        let poller = self.clone();
        task_builder.new_task("health_poller").spawn(async move {
            let period = poller.options.health_poll_interval();
            info!("Polling instance health every {:?}", period);

            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    () = poller.token.cancelled() => {
                        debug!("Health poller stopped");
                        break;
                    }
                    _ = ticks.tick() => {
                        // The poll itself is not raced against cancellation so
                        // calls already in flight complete.
                        match AssertUnwindSafe(poller.poll_once()).catch_unwind().await {
                            Ok(alerts) => debug!("Health poll raised {} alerts", alerts),
                            Err(_) => error!("Health poll panicked, continuing with next tick"),
                        }
                    }
                }
            }
        });
    }

    /// Stops future ticks. Safe to call repeatedly.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Runs one poll over every instance of every known application, latest or
    /// not. Returns the number of alerts raised.
    pub async fn poll_once(&self) -> usize {
        let mut alerts = 0;

        for application in self.applications.all() {
            let Some(status) = application.status.as_ref() else {
                continue;
            };

            for instance in &status.instances {
                match self.check(instance).await {
                    Ok(health) if health.failed() => {
                        let message = health.message().as_deref().unwrap_or(UNKNOWN_ERROR);
                        self.alerts.alert(&application, instance, message).await;
                        alerts += 1;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(
                        "Health check of {} instance {} r{} failed: {}",
                        instance.realm_id, instance.hash_of_spec, instance.revision, err
                    ),
                }
            }
        }

        alerts
    }

    async fn check(&self, instance: &Instance) -> Result<HealthStatus, HealthError> {
        let pods = self
            .pods
            .list(&instance.namespace, &selector(&instance_labels(instance)))
            .await?;
        Ok(classify_pods(&pods, APP_CONTAINER_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MockAlertSink;
    use crate::factory::fixtures::application as application_with_uid;
    use crate::factory::{DeploymentFactory, Factory};
    use canopy_api::labels::LabelSet;
    use canopy_api::v1alpha1::ApplicationStatus;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn instance(hash: &str, latest: bool) -> Instance {
        Instance::builder()
            .hash_of_spec(hash)
            .revision(1)
            .realm_id("shop.storefront")
            .namespace("shop")
            .is_latest_instance(latest)
            .build()
    }

    fn application(instances: Vec<Instance>) -> Application {
        let mut application: Application = serde_json::from_value(json!({
            "apiVersion": "canopy.dev/v1alpha1",
            "kind": "Application",
            "metadata": { "name": "storefront", "namespace": "shop" },
            "spec": { "image": "nginx:1.27", "gatewayRef": { "name": "public" } }
        }))
        .unwrap();
        application.status = Some(ApplicationStatus {
            instances,
            spec_hash: None,
        });
        application
    }

    fn crash_looping_pod(labels: &LabelSet) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "storefront-bbbbbbbbbb-r1-x",
                "namespace": "shop",
                "labels": labels
            },
            "status": {
                "containerStatuses": [{
                    "name": "app",
                    "ready": false,
                    "restartCount": 4,
                    "image": "nginx:1.27",
                    "imageID": "",
                    "lastState": { "terminated": { "exitCode": 137, "message": "OOMKilled" } }
                }]
            }
        }))
        .unwrap()
    }

    /// Serves `pods` through the equality selector the poller sends.
    fn lister_of(pods: Vec<Pod>) -> MockPodLister {
        let mut lister = MockPodLister::new();
        lister.expect_list().returning(move |namespace, selector| {
            let required = selector
                .split(',')
                .filter_map(|pair| pair.split_once('='))
                .collect::<Vec<_>>();
            Ok(pods
                .iter()
                .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
                .filter(|pod| {
                    let labels = pod.metadata.labels.clone().unwrap_or_default();
                    required
                        .iter()
                        .all(|(key, value)| labels.get(*key).map(String::as_str) == Some(*value))
                })
                .cloned()
                .collect())
        });
        lister
    }

    fn lister() -> MockPodLister {
        let latest = instance("bbbbbbbbbb", true);
        lister_of(vec![crash_looping_pod(&instance_labels(&latest))])
    }

    fn poller(pods: MockPodLister, alerts: MockAlertSink) -> HealthPoller {
        HealthPoller::new(
            Arc::new(Options::default()),
            ObjectCache::from_objects([application(vec![
                instance("aaaaaaaaaa", false),
                instance("bbbbbbbbbb", true),
            ])]),
            Arc::new(pods),
            Arc::new(alerts),
            CancellationToken::new(),
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_alerts_failing_instance_once_per_poll() {
        let mut alerts = MockAlertSink::new();
        alerts
            .expect_alert()
            .withf(|application, instance, message| {
                application.metadata.name.as_deref() == Some("storefront")
                    && instance.hash_of_spec == "bbbbbbbbbb"
                    && message.to_string() == "OOMKilled"
            })
            .times(2)
            .return_const(());

        let poller = poller(lister(), alerts);

        // No dedup across polls: a still-failing instance alerts again.
        assert_eq!(poller.poll_once().await, 1);
        assert_eq!(poller.poll_once().await, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_superseded_instance_is_still_polled() {
        let mut application = application_with_uid();
        let mut status = ApplicationStatus::default();
        status.record(instance("aaaaaaaaaa", false));
        assert!(status.promote("aaaaaaaaaa", 1));

        // Pods carry the labels of the workload built while the instance was latest.
        let workload = DeploymentFactory
            .build(
                &application,
                &status.instances[0],
                &instance_labels(&status.instances[0]),
            )
            .unwrap();
        let pod_labels = workload
            .spec
            .and_then(|spec| spec.template.metadata)
            .and_then(|metadata| metadata.labels)
            .unwrap();

        status.record(instance("bbbbbbbbbb", false));
        assert!(status.promote("bbbbbbbbbb", 1));
        application.status = Some(status);

        let mut alerts = MockAlertSink::new();
        alerts
            .expect_alert()
            .withf(|_, instance, _| {
                instance.hash_of_spec == "aaaaaaaaaa" && !instance.is_latest_instance
            })
            .times(1)
            .return_const(());

        let poller = HealthPoller::new(
            Arc::new(Options::default()),
            ObjectCache::from_objects([application]),
            Arc::new(lister_of(vec![crash_looping_pod(&pod_labels)])),
            Arc::new(alerts),
            CancellationToken::new(),
        );

        assert_eq!(poller.poll_once().await, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_list_errors_do_not_stop_the_poll() {
        let failing_labels = instance_labels(&instance("bbbbbbbbbb", true));
        let mut pods = MockPodLister::new();
        pods.expect_list().returning(move |_, selector| {
            if selector.contains("canopy.dev/instance-hash=aaaaaaaaaa") {
                Err(HealthError::ListPods(kube::Error::ReadEvents(
                    std::io::Error::other("connection reset"),
                )))
            } else {
                Ok(vec![crash_looping_pod(&failing_labels)])
            }
        });
        let mut alerts = MockAlertSink::new();
        alerts.expect_alert().times(1).return_const(());

        assert_eq!(poller(pods, alerts).poll_once().await, 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_applications_without_status_are_skipped() {
        let mut pods = MockPodLister::new();
        pods.expect_list().never();
        let mut alerts = MockAlertSink::new();
        alerts.expect_alert().never();

        let mut application = application(vec![]);
        application.status = None;
        let poller = HealthPoller::new(
            Arc::new(Options::default()),
            ObjectCache::from_objects([application]),
            Arc::new(pods),
            Arc::new(alerts),
            CancellationToken::new(),
        );

        assert_eq!(poller.poll_once().await, 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_stop_ends_polling_and_is_idempotent() {
        let mut alerts = MockAlertSink::new();
        alerts.expect_alert().return_const(());
        let poller = poller(lister(), alerts);

        let task_builder = TaskBuilder::default();
        poller.start(&task_builder);
        poller.start(&task_builder);
        assert_eq!(task_builder.len(), 1);

        poller.stop();
        poller.stop();

        let result = timeout(Duration::from_secs(5), task_builder.join_all()).await;
        assert!(result.is_ok(), "Stopped poller should finish");
    }
}
